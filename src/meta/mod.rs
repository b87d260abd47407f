//! Metadata store adapter and control-plane entities

pub mod store;
pub mod types;

pub use store::MetaStore;
pub use types::{
    AgentBrief, AgentStatus, BackupKind, BackupMeta, Epoch, NodeInfo, NomineeSet, PitrMeta,
    ReadyMember, Status,
};
