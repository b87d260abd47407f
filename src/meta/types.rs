//! Control-plane entities
//!
//! Shapes of the documents the agents share through the metadata store.
//! The exact wire format is the adapter's concern.

use serde::{Deserialize, Serialize};

use crate::common::OpId;

/// Cluster-wide slicing status, kept on the singleton meta document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Starting,
    Ready,
    Running,
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Starting => write!(f, "starting"),
            Status::Ready => write!(f, "ready"),
            Status::Running => write!(f, "running"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// One nomination round for one replica set: the candidate list the leader
/// last published, and the winner once a candidate acquired the lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NomineeSet {
    pub replset: String,
    pub nodes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<String>,
}

/// A node that confirmed it observed the cluster-wide `ready` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyMember {
    pub replset: String,
    pub node: String,
}

/// The cluster-wide singleton PITR meta document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitrMeta {
    pub status: Status,
    #[serde(default)]
    pub nominations: Vec<NomineeSet>,
    #[serde(default)]
    pub ready: Vec<ReadyMember>,
}

impl PitrMeta {
    pub fn new() -> Self {
        Self {
            status: Status::Starting,
            nominations: Vec::new(),
            ready: Vec::new(),
        }
    }

    pub fn nomination(&self, replset: &str) -> Option<&NomineeSet> {
        self.nominations.iter().find(|n| n.replset == replset)
    }
}

impl Default for PitrMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration epoch; logged with every control-loop error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch(pub u64);

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local identity of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBrief {
    pub replset: String,
    pub node: String,
}

/// Status an agent reports about its node, as seen by the whole cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub replset: String,
    pub node: String,
    pub healthy: bool,
    pub hidden: bool,
    pub arbiter: bool,
}

impl AgentStatus {
    /// Fit agents take part in elections and the ready handshake.
    pub fn is_fit(&self) -> bool {
        self.healthy && !self.arbiter
    }
}

/// Fresh replication state of the local node, queried per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub replset: String,
    pub node: String,
    pub is_primary: bool,
    /// Primary of the configuration replica set in a sharded deployment.
    pub is_cluster_leader: bool,
    pub healthy: bool,
    pub hidden: bool,
    pub arbiter: bool,
}

impl NodeInfo {
    /// Whether this node may run the slicer at all.
    pub fn suits_for_slicing(&self) -> bool {
        self.healthy && !self.arbiter
    }
}

/// Kinds of backups; only physical ones may overlap with slicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Logical,
    Physical,
    Incremental,
    External,
}

impl BackupKind {
    pub fn is_physical(&self) -> bool {
        !matches!(self, BackupKind::Logical)
    }
}

/// Backup metadata, looked up by the opid found on a lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMeta {
    pub opid: OpId,
    pub name: String,
    pub kind: BackupKind,
}
