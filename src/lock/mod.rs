//! Advisory, heartbeat-backed operation locks
//!
//! Two tables live in the metadata store: the regular lock table, where
//! backups, restores and resyncs register themselves, and the op-lock
//! table, which holds at most one entry per replica set and backs the
//! slicer election. `LockService` is the adapter over both; `OpLock` is the
//! owned handle an agent keeps while it slices, refreshing the heartbeat in
//! the background until released.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{Cmd, OpId, Result};

/// A lock holder goes stale when its heartbeat lags the cluster time by
/// more than this many seconds.
pub const STALE_FRAME_SEC: u64 = 30;

/// How often a held op-lock refreshes its heartbeat.
const HEARTBEAT_FRAME: Duration = Duration::from_secs(5);

/// Identity of a lock holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHeader {
    pub cmd: Cmd,
    pub replset: String,
    pub node: String,
    pub opid: OpId,
    pub epoch: u64,
}

impl std::fmt::Display for LockHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}, node: {}, opid: {}]",
            self.cmd, self.replset, self.node, self.opid
        )
    }
}

/// A lock document as stored: holder identity plus its last heartbeat, in
/// cluster-time seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockData {
    pub header: LockHeader,
    pub heartbeat: u64,
}

impl LockData {
    /// Stale iff the heartbeat plus the stale frame lies strictly before
    /// the cluster time. A lock exactly at the boundary is still live.
    pub fn is_stale(&self, cluster_time: u64) -> bool {
        self.heartbeat + STALE_FRAME_SEC < cluster_time
    }
}

/// Filter for lock queries; `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct LockFilter {
    pub cmd: Option<Cmd>,
    pub replset: Option<String>,
}

impl LockFilter {
    pub fn matches(&self, header: &LockHeader) -> bool {
        self.cmd.map_or(true, |c| c == header.cmd)
            && self.replset.as_ref().map_or(true, |r| *r == header.replset)
    }
}

/// Adapter over the cluster's lock tables.
///
/// `try_acquire` reclaims stale holders and reports a live one as
/// `Error::ConcurrentOp` with the holder's header. `refresh` bumps the
/// heartbeat of a held op-lock to the current cluster time.
#[async_trait]
pub trait LockService: Send + Sync {
    async fn try_acquire(&self, header: &LockHeader) -> Result<bool>;
    async fn release(&self, header: &LockHeader) -> Result<()>;
    async fn refresh(&self, header: &LockHeader) -> Result<()>;

    /// Regular lock table (backups, restores, resyncs).
    async fn get_locks(&self, filter: &LockFilter) -> Result<Vec<LockData>>;

    /// Op-lock table (slicer election).
    async fn get_oplock_data(&self, filter: &LockFilter) -> Result<Option<LockData>>;
}

/// An op-lock handle owned by one agent.
///
/// Acquiring spawns the heartbeat refresh task; releasing stops it and
/// deletes the lock document. Dropping the handle only stops the heartbeat,
/// leaving the document to go stale for reclamation.
pub struct OpLock {
    svc: Arc<dyn LockService>,
    header: LockHeader,
    heartbeat: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl OpLock {
    pub fn new(svc: Arc<dyn LockService>, header: LockHeader) -> Self {
        Self {
            svc,
            header,
            heartbeat: Mutex::new(None),
        }
    }

    pub fn header(&self) -> &LockHeader {
        &self.header
    }

    pub async fn acquire(&self) -> Result<bool> {
        let got = self.svc.try_acquire(&self.header).await?;
        if !got {
            return Ok(false);
        }

        let svc = self.svc.clone();
        let header = self.header.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT_FRAME).await;
                if let Err(err) = svc.refresh(&header).await {
                    tracing::warn!("lock heartbeat {}: {}", header, err);
                }
            }
        });
        *self.heartbeat.lock().unwrap() = Some(handle);

        Ok(true)
    }

    pub async fn release(&self) -> Result<()> {
        if let Some(hb) = self.heartbeat.lock().unwrap().take() {
            hb.abort();
        }
        self.svc.release(&self.header).await
    }
}

impl Drop for OpLock {
    fn drop(&mut self) {
        if let Some(hb) = self.heartbeat.lock().unwrap().take() {
            hb.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_at(heartbeat: u64) -> LockData {
        LockData {
            header: LockHeader {
                cmd: Cmd::Pitr,
                replset: "rs0".into(),
                node: "rs0/a".into(),
                opid: OpId::nil(),
                epoch: 1,
            },
            heartbeat,
        }
    }

    #[test]
    fn test_staleness_boundary() {
        let lk = lock_at(100);

        // exactly at heartbeat + frame: still live
        assert!(!lk.is_stale(100 + STALE_FRAME_SEC));
        // strictly past the frame: stale
        assert!(lk.is_stale(100 + STALE_FRAME_SEC + 1));
        // fresh
        assert!(!lk.is_stale(100));
    }

    #[test]
    fn test_filter_matches() {
        let lk = lock_at(0);

        assert!(LockFilter::default().matches(&lk.header));
        assert!(LockFilter {
            cmd: Some(Cmd::Pitr),
            replset: Some("rs0".into()),
        }
        .matches(&lk.header));
        assert!(!LockFilter {
            cmd: Some(Cmd::Backup),
            replset: None,
        }
        .matches(&lk.header));
        assert!(!LockFilter {
            cmd: None,
            replset: Some("rs1".into()),
        }
        .matches(&lk.header));
    }
}
