//! The backup agent's PITR coordinator
//!
//! Every replica-set member runs one agent. Agents elect exactly one oplog
//! slicer per replica set through documents and advisory locks in the
//! metadata store; the loop here re-evaluates that election every
//! `PITR_CHECK_PERIOD` and supervises the single local slicer handle.

pub mod gate;
pub mod handle;
pub mod http;
pub mod nomination;
pub mod prio;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::common::metrics::METRICS;
use crate::common::{Cmd, Error, OpId, Result};
use crate::lock::{LockFilter, LockHeader, LockService, OpLock};
use crate::meta::{AgentBrief, Epoch, MetaStore};
use crate::slicer::{wake_channel, SlicerFactory};

use handle::SlicerSlot;

pub const PITR_CHECK_PERIOD: Duration = Duration::from_secs(15);
pub const RENOMINATION_FRAME: Duration = Duration::from_secs(5);
pub const OPLOCK_POLL_CYCLE: Duration = Duration::from_secs(15);
pub const OPLOCK_POLL_TIMEOUT: Duration = Duration::from_secs(120);
pub const NOMINATION_POLL_CYCLE: Duration = Duration::from_secs(2);
pub const NOMINATION_POLL_TIMEOUT: Duration = Duration::from_secs(120);

/// Point-in-time snapshot of the agent, served over the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub replset: String,
    pub node: String,
    pub slicing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_secs: Option<u64>,
}

pub struct Agent {
    brief: AgentBrief,
    pub(crate) meta: Arc<dyn MetaStore>,
    locks: Arc<dyn LockService>,
    slicers: Arc<dyn SlicerFactory>,
    slot: SlicerSlot,
    prev_oplog_only: Mutex<Option<bool>>,
}

impl Agent {
    pub fn new(
        brief: AgentBrief,
        meta: Arc<dyn MetaStore>,
        locks: Arc<dyn LockService>,
        slicers: Arc<dyn SlicerFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            brief,
            meta,
            locks,
            slicers,
            slot: SlicerSlot::default(),
            prev_oplog_only: Mutex::new(None),
        })
    }

    pub fn brief(&self) -> &AgentBrief {
        &self.brief
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let span = self.slot.running().map(|s| s.span());
        AgentSnapshot {
            replset: self.brief.replset.clone(),
            node: self.brief.node.clone(),
            slicing: span.is_some(),
            span_secs: span.map(|s| s.as_secs()),
        }
    }

    /// Make the running slicer cut a slice right now instead of waiting for
    /// its span tick. A no-op when no slicer runs here.
    pub fn wake_slicer(&self, opid: OpId) {
        self.slot.wake(opid);
    }

    /// The PITR processing routine: ticks every `PITR_CHECK_PERIOD` until
    /// the token is cancelled, then tears the local slicer down.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!("starting PITR routine on {}", self.brief.node);

        loop {
            METRICS.ticks_total.inc();
            if let Err(err) = Arc::clone(&self).tick(&cancel).await {
                if !err.is_cancelled() {
                    METRICS.tick_errors_total.inc();
                    // epoch only adds context to the log line, best-effort
                    let epoch = self.meta.get_epoch().await.unwrap_or(Epoch(0));
                    tracing::error!("pitr (epoch {}): {}", epoch, err);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(PITR_CHECK_PERIOD) => {}
            }
        }

        self.slot.remove();
        tracing::info!("PITR routine on {} stopped", self.brief.node);
    }

    /// One control-loop iteration.
    async fn tick(self: Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        let cfg = self.meta.get_config().await?.unwrap_or_default();
        let interval = cfg.pitr.slicing_interval();

        if !cfg.pitr.enabled {
            self.slot.remove();
            self.update_gauges();
            return Ok(());
        }

        self.stop_on_oplog_only_change(cfg.pitr.oplog_only);

        if let Err(err) = gate::can_slice_now(self.meta.as_ref(), self.locks.as_ref()).await {
            if let Error::ConcurrentOp(header) = &err {
                METRICS.pauses_total.inc();
                tracing::info!("oplog slicer is paused for lock {}", header);
                self.update_gauges();
                return Ok(());
            }
            return Err(err);
        }

        if let Some(slicer) = self.slot.running() {
            // already doing the job; reconcile the span with the config
            let current = slicer.span();
            if current != interval {
                slicer.set_span(interval);

                // wake up the slicer only if the new interval is smaller,
                // so it cuts a short slice instead of finishing a long one
                if current > interval {
                    self.wake_slicer(OpId::nil());
                }
            }
            self.update_gauges();
            return Ok(());
        }

        // cheap check before the real locking, to avoid the heavy election
        // path while another member slices
        if !self.lock_pre_check().await? {
            tracing::debug!("pitr running on another RS member");
            return Ok(());
        }

        // after the pre-check on purpose: a failing node should stay quiet
        // while a healthy peer does the slicing
        let node = self.meta.node_info(&self.brief).await?;
        if !node.suits_for_slicing() {
            return Ok(());
        }

        if node.is_cluster_leader && !Arc::clone(&self).lead_nomination(&cfg, cancel).await? {
            return Ok(());
        }

        let nominated = self
            .wait_nomination(&node.replset, &node.node, cancel)
            .await?;
        if !nominated {
            tracing::debug!("skip after pitr nomination, probably started by another node");
            return Ok(());
        }

        let lock = Arc::new(OpLock::new(
            self.locks.clone(),
            LockHeader {
                cmd: Cmd::Pitr,
                replset: self.brief.replset.clone(),
                node: self.brief.node.clone(),
                opid: OpId::new(),
                epoch: cfg.epoch,
            },
        ));
        if !self.acquire_lock(&lock).await? {
            tracing::debug!("skip: lock not acquired");
            return Ok(());
        }

        // the election outcome is already decided by the lock; a failed ack
        // only costs the driver extra renomination frames
        if let Err(err) = self
            .meta
            .set_nominee_ack(&self.brief.replset, &self.brief.node)
            .await
        {
            tracing::warn!("set nominee ack: {}", err);
        }

        let slicer = self.slicers.build(&self.brief.replset, &cfg)?;
        slicer.set_span(interval);

        let catchup = if cfg.pitr.oplog_only {
            slicer.oplog_only_catchup(cancel.child_token()).await
        } else {
            slicer.catchup(cancel.child_token()).await
        };
        if let Err(err) = catchup {
            if let Err(err) = lock.release().await {
                tracing::error!("release lock: {}", err);
            }
            return Err(err);
        }

        METRICS.elections_won_total.inc();
        tracing::info!(
            "streaming oplog for {} on {}, span {:?}",
            self.brief.replset,
            self.brief.node,
            interval
        );

        let stream_cancel = cancel.child_token();
        let (wake_tx, wake_rx) = wake_channel();
        let generation = self
            .slot
            .install(slicer.clone(), wake_tx, stream_cancel.clone());
        self.update_gauges();

        let agent = Arc::clone(&self);
        tokio::spawn(async move {
            let res = slicer
                .stream(
                    stream_cancel,
                    wake_rx,
                    cfg.pitr.compression,
                    cfg.pitr.compression_level,
                    cfg.backup.timeouts.clone(),
                )
                .await;

            if let Err(err) = &res {
                METRICS.stream_errors_total.inc();
                if matches!(err, Error::OpMoved) {
                    tracing::info!("streaming oplog: {}", err);
                } else {
                    tracing::error!("streaming oplog: {}", err);
                }
            }

            if let Err(err) = lock.release().await {
                tracing::error!("release lock: {}", err);
            }

            // Penalty for the failed node so healthy peers win the next
            // round. The lock must be released first, otherwise peers would
            // block on it and the penalty would mean nothing. The handle
            // stays installed meanwhile, keeping this agent out of the
            // contest.
            if res.is_err() {
                time::sleep(PITR_CHECK_PERIOD * 2).await;
            }

            agent.slot.clear_if(generation);
            agent.update_gauges();
        });

        Ok(())
    }

    /// Tear the slicer down when the oplog-only mode flips, forcing a fresh
    /// catchup under the new mode.
    fn stop_on_oplog_only_change(&self, current: bool) {
        let mut prev = self.prev_oplog_only.lock().unwrap();
        match *prev {
            None => *prev = Some(current),
            Some(p) if p == current => {}
            Some(_) => {
                *prev = Some(current);
                self.slot.remove();
            }
        }
    }

    /// Cheap test whether the election is worth entering: true when no
    /// op-lock exists for this replica set or the holder went stale.
    async fn lock_pre_check(&self) -> Result<bool> {
        let ts = self.meta.cluster_time().await?;

        let filter = LockFilter {
            cmd: Some(Cmd::Pitr),
            replset: Some(self.brief.replset.clone()),
        };
        match self.locks.get_oplock_data(&filter).await? {
            // no lock, good to move on
            None => Ok(true),
            // stale means move on too; acquisition will reclaim it
            Some(lk) => Ok(lk.is_stale(ts)),
        }
    }

    /// Acquire with `ConcurrentOp` downgraded to an info-level skip.
    async fn acquire_lock(&self, lock: &OpLock) -> Result<bool> {
        match lock.acquire().await {
            Ok(got) => Ok(got),
            Err(Error::ConcurrentOp(header)) => {
                tracing::info!("another operation is running: {}", header);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Whether the cluster-wide meta document currently has this status.
    pub(crate) async fn is_cluster_status(&self, status: crate::meta::Status) -> bool {
        match self.meta.get_meta().await {
            Ok(Some(meta)) => meta.status == status,
            Ok(None) => false,
            Err(err) => {
                tracing::error!("get pitr meta for status check: {}", err);
                false
            }
        }
    }

    fn update_gauges(&self) {
        let span = self.slot.running().map(|s| s.span());
        METRICS.slicer_running.set(span.is_some() as i64);
        METRICS
            .slicer_span_secs
            .set(span.map_or(0, |s| s.as_secs() as i64));
    }
}
