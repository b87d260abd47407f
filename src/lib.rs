//! # pitrd
//!
//! Point-in-time-recovery coordinator for distributed database backup
//! agents. Every replica-set member runs an agent; the agents elect exactly
//! one oplog **slicer** per replica set, which continuously copies the
//! operation log into object storage so the cluster can be restored to any
//! instant.
//!
//! There is no consensus protocol and no RPC between agents. The only
//! shared medium is a set of metadata documents and advisory locks in the
//! cluster's metadata store, which every agent polls:
//!
//! ```text
//!            ┌──────────────────────────────────┐
//!            │          Metadata store          │
//!            │  config · pitr meta · op-locks   │
//!            └───┬───────────┬───────────┬──────┘
//!                │ poll      │ poll      │ poll
//!          ┌─────▼────┐ ┌────▼─────┐ ┌───▼──────┐
//!          │ Agent A  │ │ Agent B  │ │ Agent C  │
//!          │ (leader: │ │          │ │ ┌──────┐ │
//!          │ nominate)│ │          │ │ │slicer│ │
//!          └──────────┘ └──────────┘ └─┴──────┴─┘
//! ```
//!
//! Each agent ticks every 15 seconds: read the config, tear down on
//! disable or mode change, pause while a logical backup runs, reconcile
//! the running slicer's span, or, when nothing slices for its replica
//! set, enter the election: the cluster leader publishes priority-ordered
//! candidate tiers, candidates poll for their nomination, and the winner
//! takes the heartbeat-backed op-lock and streams until cancelled or
//! failed. A failed slicer sits out one penalty period so a healthier peer
//! wins the next round.
//!
//! The slicer itself, the metadata store, and the lock primitive are
//! external; this crate talks to them through the [`slicer::Slicer`],
//! [`meta::MetaStore`], and [`lock::LockService`] traits. The [`sim`]
//! module has in-process implementations of all three, used by the test
//! suite and the `pitrd sim` demo:
//!
//! ```bash
//! pitrd sim --replsets rs0,rs1 --nodes 3 --interval 1m
//! ```

pub mod agent;
pub mod common;
pub mod lock;
pub mod meta;
pub mod sim;
pub mod slicer;

pub use agent::{Agent, AgentSnapshot};
pub use common::{Config, Error, Result};
pub use lock::{LockService, OpLock};
pub use meta::MetaStore;
pub use slicer::{Slicer, SlicerFactory};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
