//! Oplog slicer interface
//!
//! How the oplog is read, compressed and written to storage is an external
//! component's business. The coordinator only builds a slicer, tunes its
//! span, runs catchup, and drives `stream` until it is cancelled or fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::common::{Compression, Config, OpId, Result, Timeouts};

pub type WakeSender = mpsc::Sender<OpId>;
pub type WakeReceiver = mpsc::Receiver<OpId>;

/// Single-slot rendezvous channel used to make the slicer cut a slice on
/// demand instead of waiting for its span tick. Sends may be dropped while
/// the slicer is busy mid-slice.
pub fn wake_channel() -> (WakeSender, WakeReceiver) {
    mpsc::channel(1)
}

#[async_trait]
pub trait Slicer: Send + Sync {
    /// Target span of one slice.
    fn set_span(&self, span: Duration);
    fn span(&self) -> Duration;

    /// Close the gap between the last persisted oplog chunk and now,
    /// anchored to the most recent base backup.
    async fn catchup(&self, cancel: CancellationToken) -> Result<()>;

    /// Catchup for oplog-only operation, with no base backup to anchor to.
    async fn oplog_only_catchup(&self, cancel: CancellationToken) -> Result<()>;

    /// Continuously write slices until `stop` is cancelled or the stream
    /// fails. A wake message cuts a slice immediately.
    async fn stream(
        &self,
        stop: CancellationToken,
        wake: WakeReceiver,
        compression: Compression,
        compression_level: Option<i32>,
        timeouts: Timeouts,
    ) -> Result<()>;
}

/// Builds a slicer for one replica set from the current configuration.
pub trait SlicerFactory: Send + Sync {
    fn build(&self, replset: &str, config: &Config) -> Result<Arc<dyn Slicer>>;
}
