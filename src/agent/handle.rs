//! The single local slicer handle
//!
//! Each agent owns at most one running slicer. The slot is the only
//! process-local shared state; it lives behind the agent's mutex so tests
//! can run several agents in one process. Replacing the handle always
//! cancels the previous one first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::common::OpId;
use crate::slicer::{Slicer, WakeSender};

pub(crate) struct PitrJob {
    pub slicer: Arc<dyn Slicer>,
    pub wake: WakeSender,
    pub cancel: CancellationToken,
    pub generation: u64,
}

#[derive(Default)]
pub(crate) struct SlicerSlot {
    inner: Mutex<Option<PitrJob>>,
    generations: AtomicU64,
}

impl SlicerSlot {
    /// Install a new handle, cancelling any previous one. Returns the
    /// generation the streaming task later uses to clear exactly itself.
    pub fn install(
        &self,
        slicer: Arc<dyn Slicer>,
        wake: WakeSender,
        cancel: CancellationToken,
    ) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.replace(Some(PitrJob {
            slicer,
            wake,
            cancel,
            generation,
        }));
        generation
    }

    /// Cancel and drop the current handle, if any. Safe to call repeatedly.
    pub fn remove(&self) {
        self.replace(None);
    }

    /// Cancel and drop the current handle only if it still is the given
    /// generation. Lets a finished streaming task clean up after itself
    /// without tearing down a successor.
    pub fn clear_if(&self, generation: u64) {
        let mut slot = self.inner.lock().unwrap();
        if slot.as_ref().map(|job| job.generation) == Some(generation) {
            if let Some(job) = slot.take() {
                job.cancel.cancel();
            }
        }
    }

    /// Forward an op id into the wake channel. Dropped silently when no
    /// handle exists or the slicer is busy mid-slice.
    pub fn wake(&self, opid: OpId) {
        let slot = self.inner.lock().unwrap();
        if let Some(job) = slot.as_ref() {
            let _ = job.wake.try_send(opid);
        }
    }

    /// The running slicer, if a handle is installed.
    pub fn running(&self) -> Option<Arc<dyn Slicer>> {
        self.inner.lock().unwrap().as_ref().map(|job| job.slicer.clone())
    }

    pub fn is_installed(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    fn replace(&self, job: Option<PitrJob>) {
        let mut slot = self.inner.lock().unwrap();
        if let Some(prev) = slot.take() {
            prev.cancel.cancel();
        }
        *slot = job;
    }
}
