//! Cluster-held configuration
//!
//! The configuration document lives in the metadata store and is re-read on
//! every control-loop tick. Agents never load it from disk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pitr: PitrConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    /// Bumped by the control plane on every configuration change.
    #[serde(default)]
    pub epoch: u64,
}

/// Point-in-time-recovery section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PitrConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Slice the oplog without periodic base backups.
    #[serde(default)]
    pub oplog_only: bool,

    /// Election weight per node. Nodes missing from the map score 1.0.
    #[serde(default)]
    pub priority: HashMap<String, f64>,

    /// Target span of one oplog slice, in seconds.
    #[serde(default = "default_slicing_interval_secs")]
    pub slicing_interval_secs: u64,

    #[serde(default)]
    pub compression: Compression,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<i32>,
}

fn default_slicing_interval_secs() -> u64 {
    600
}

impl PitrConfig {
    pub fn slicing_interval(&self) -> Duration {
        Duration::from_secs(self.slicing_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    #[default]
    Snappy,
    Lz4,
    S2,
    Zstd,
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Snappy => write!(f, "snappy"),
            Compression::Lz4 => write!(f, "lz4"),
            Compression::S2 => write!(f, "s2"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

/// Backup section; the slicer only consumes the timeouts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeouts {
    /// How long to wait for a backup to reach the starting status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting_status_secs: Option<u64>,
}

impl Timeouts {
    pub fn starting_status(&self) -> Duration {
        Duration::from_secs(self.starting_status_secs.unwrap_or(33))
    }
}
