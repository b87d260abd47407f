//! Metadata store adapter

use async_trait::async_trait;

use crate::common::{Config, OpId, Result};
use crate::meta::types::{
    AgentBrief, AgentStatus, BackupMeta, Epoch, NodeInfo, NomineeSet, PitrMeta, ReadyMember, Status,
};

/// Entity-level interface to the cluster's metadata store.
///
/// Optional documents come back as `None`; pollers treat that as "keep
/// waiting", never as an error. All writes are single-document atomic.
#[async_trait]
pub trait MetaStore: Send + Sync {
    // === Configuration ===

    async fn get_config(&self) -> Result<Option<Config>>;
    async fn get_epoch(&self) -> Result<Epoch>;
    async fn cluster_time(&self) -> Result<u64>;

    // === PITR meta ===

    /// Create the singleton meta document in `starting` status if absent.
    /// Idempotent.
    async fn init_meta(&self) -> Result<()>;
    async fn get_meta(&self) -> Result<Option<PitrMeta>>;
    async fn set_cluster_status(&self, status: Status) -> Result<()>;
    async fn get_cluster_status(&self) -> Result<Option<Status>>;

    /// Whether any live slicer still holds an op-lock.
    async fn is_oplog_slicing(&self) -> Result<bool>;

    // === Nomination rounds ===

    /// Reset the nomination record for a replica set, opening a new round.
    async fn set_nomination(&self, replset: &str) -> Result<()>;
    async fn set_nominees(&self, replset: &str, nodes: &[String]) -> Result<()>;
    async fn get_nominees(&self, replset: &str) -> Result<Option<NomineeSet>>;
    async fn set_nominee_ack(&self, replset: &str, node: &str) -> Result<()>;

    // === Ready handshake ===

    async fn set_ready_rs_status(&self, replset: &str, node: &str) -> Result<()>;
    async fn members_with_status(&self, status: Status) -> Result<Vec<ReadyMember>>;

    // === Topology ===

    async fn list_agents(&self) -> Result<Vec<AgentStatus>>;
    async fn cluster_members(&self) -> Result<Vec<String>>;
    async fn node_info(&self, brief: &AgentBrief) -> Result<NodeInfo>;

    // === Backups ===

    async fn get_backup_by_opid(&self, opid: OpId) -> Result<Option<BackupMeta>>;
}
