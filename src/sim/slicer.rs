//! Simulated oplog slicer
//!
//! Counts the slices it would have written instead of touching storage.
//! Failures are injectable, which is how the test suite exercises the
//! catchup and streaming error paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::common::{Compression, Config, Error, Result, Timeouts};
use crate::slicer::{Slicer, SlicerFactory, WakeReceiver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchupKind {
    Backup,
    OplogOnly,
}

pub struct SimSlicer {
    replset: String,
    span: Mutex<Duration>,
    catchup_kind: Mutex<Option<CatchupKind>>,
    fail_catchup: AtomicBool,
    slices: AtomicU64,
    wake_slices: AtomicU64,
    streaming: AtomicBool,
    cancelled: AtomicBool,
    fail: Mutex<Option<Error>>,
    fail_notify: Notify,
}

impl SimSlicer {
    pub fn new(replset: &str) -> Arc<Self> {
        Arc::new(Self {
            replset: replset.to_string(),
            span: Mutex::new(Duration::from_secs(600)),
            catchup_kind: Mutex::new(None),
            fail_catchup: AtomicBool::new(false),
            slices: AtomicU64::new(0),
            wake_slices: AtomicU64::new(0),
            streaming: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            fail: Mutex::new(None),
            fail_notify: Notify::new(),
        })
    }

    pub fn replset(&self) -> &str {
        &self.replset
    }

    /// Total slices cut so far.
    pub fn slices(&self) -> u64 {
        self.slices.load(Ordering::SeqCst)
    }

    /// Slices cut because of a wake-up rather than the span tick.
    pub fn wake_slices(&self) -> u64 {
        self.wake_slices.load(Ordering::SeqCst)
    }

    pub fn catchup_kind(&self) -> Option<CatchupKind> {
        *self.catchup_kind.lock().unwrap()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Whether the stream ended through cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Make the next catchup fail.
    pub fn fail_next_catchup(&self) {
        self.fail_catchup.store(true, Ordering::SeqCst);
    }

    /// Terminate the running stream with the given error.
    pub fn fail_stream(&self, err: Error) {
        *self.fail.lock().unwrap() = Some(err);
        self.fail_notify.notify_one();
    }

    fn cut_slice(&self, woken: bool) {
        self.slices.fetch_add(1, Ordering::SeqCst);
        if woken {
            self.wake_slices.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Slicer for SimSlicer {
    fn set_span(&self, span: Duration) {
        *self.span.lock().unwrap() = span;
    }

    fn span(&self) -> Duration {
        *self.span.lock().unwrap()
    }

    async fn catchup(&self, _cancel: CancellationToken) -> Result<()> {
        if self.fail_catchup.swap(false, Ordering::SeqCst) {
            return Err(Error::Catchup("no base backup to anchor to".into()));
        }
        *self.catchup_kind.lock().unwrap() = Some(CatchupKind::Backup);
        Ok(())
    }

    async fn oplog_only_catchup(&self, _cancel: CancellationToken) -> Result<()> {
        if self.fail_catchup.swap(false, Ordering::SeqCst) {
            return Err(Error::Catchup("oplog history is gone".into()));
        }
        *self.catchup_kind.lock().unwrap() = Some(CatchupKind::OplogOnly);
        Ok(())
    }

    async fn stream(
        &self,
        stop: CancellationToken,
        mut wake: WakeReceiver,
        _compression: Compression,
        _compression_level: Option<i32>,
        _timeouts: Timeouts,
    ) -> Result<()> {
        self.streaming.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    self.cancelled.store(true, Ordering::SeqCst);
                    self.streaming.store(false, Ordering::SeqCst);
                    return Ok(());
                }
                _ = self.fail_notify.notified() => {
                    let err = self
                        .fail
                        .lock()
                        .unwrap()
                        .take()
                        .unwrap_or_else(|| Error::OplogStream("stream broke".into()));
                    self.streaming.store(false, Ordering::SeqCst);
                    return Err(err);
                }
                Some(_opid) = wake.recv() => self.cut_slice(true),
                _ = time::sleep(self.span()) => self.cut_slice(false),
            }
        }
    }
}

/// Builds `SimSlicer`s and remembers them so tests can reach the instance
/// an agent is driving.
#[derive(Default)]
pub struct SimSlicerFactory {
    built: Mutex<Vec<Arc<SimSlicer>>>,
    fail_next_catchup: AtomicBool,
}

impl SimSlicerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn built(&self) -> Vec<Arc<SimSlicer>> {
        self.built.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Arc<SimSlicer>> {
        self.built.lock().unwrap().last().cloned()
    }

    /// The next built slicer will fail its catchup.
    pub fn fail_next_catchup(&self) {
        self.fail_next_catchup.store(true, Ordering::SeqCst);
    }
}

impl SlicerFactory for SimSlicerFactory {
    fn build(&self, replset: &str, _config: &Config) -> Result<Arc<dyn Slicer>> {
        let slicer = SimSlicer::new(replset);
        if self.fail_next_catchup.swap(false, Ordering::SeqCst) {
            slicer.fail_next_catchup();
        }
        self.built.lock().unwrap().push(slicer.clone());
        Ok(slicer)
    }
}
