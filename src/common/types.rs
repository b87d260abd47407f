//! Operation identifiers and command taxonomy

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one cluster operation (a backup run, a restore, a slicing
/// round). Locks and backup metadata are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId(Uuid);

impl OpId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Sentinel id used to wake the slicer without attributing the wake-up
    /// to any operation.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for OpId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster operation kinds that take locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cmd {
    Backup,
    Restore,
    Resync,
    Pitr,
}

impl std::fmt::Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cmd::Backup => write!(f, "backup"),
            Cmd::Restore => write!(f, "restore"),
            Cmd::Resync => write!(f, "resync"),
            Cmd::Pitr => write!(f, "pitr"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_opid() {
        assert!(OpId::nil().is_nil());
        assert!(!OpId::new().is_nil());
        assert_eq!(OpId::nil(), OpId::nil());
    }

    #[test]
    fn test_opid_unique() {
        assert_ne!(OpId::new(), OpId::new());
    }
}
