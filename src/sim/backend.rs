//! In-process control plane
//!
//! One `SimCluster` plays the cluster's metadata store and lock service for
//! any number of agents living in the same process. State is a handful of
//! documents behind a mutex; the cluster clock is manual so tests control
//! staleness deterministically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::common::{timestamp_now, Cmd, Config, Error, OpId, Result};
use crate::lock::{LockData, LockFilter, LockHeader, LockService};
use crate::meta::{
    AgentBrief, AgentStatus, BackupMeta, Epoch, MetaStore, NodeInfo, NomineeSet, PitrMeta,
    ReadyMember, Status,
};

#[derive(Default)]
struct SimState {
    config: Option<Config>,
    cluster_time: u64,
    meta: Option<PitrMeta>,
    /// Regular lock table (backups, restores, resyncs), keyed by replset.
    locks: HashMap<String, LockData>,
    /// Op-lock table backing the slicer election, keyed by replset.
    oplocks: HashMap<String, LockData>,
    nodes: Vec<NodeInfo>,
    backups: HashMap<OpId, BackupMeta>,
}

pub struct SimCluster {
    state: Mutex<SimState>,
}

impl SimCluster {
    pub fn new() -> Arc<Self> {
        let state = SimState {
            cluster_time: timestamp_now(),
            ..Default::default()
        };
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    /// Register a node. The cluster leader is the primary of the
    /// configuration replica set; the database elects it, the simulation
    /// just declares it.
    pub fn add_node(&self, replset: &str, node: &str, primary: bool, cluster_leader: bool) {
        let mut state = self.state.lock().unwrap();
        state.nodes.push(NodeInfo {
            replset: replset.to_string(),
            node: node.to_string(),
            is_primary: primary,
            is_cluster_leader: cluster_leader,
            healthy: true,
            hidden: false,
            arbiter: false,
        });
    }

    pub fn set_node_health(&self, node: &str, healthy: bool) {
        let mut state = self.state.lock().unwrap();
        for n in state.nodes.iter_mut() {
            if n.node == node {
                n.healthy = healthy;
            }
        }
    }

    /// Move cluster leadership to another node, as a failover would.
    pub fn set_cluster_leader(&self, node: &str) {
        let mut state = self.state.lock().unwrap();
        for n in state.nodes.iter_mut() {
            n.is_cluster_leader = n.node == node;
        }
    }

    /// Apply a configuration change and bump the epoch.
    pub fn configure(&self, f: impl FnOnce(&mut Config)) {
        let mut state = self.state.lock().unwrap();
        let mut cfg = state.config.take().unwrap_or_default();
        f(&mut cfg);
        cfg.epoch += 1;
        state.config = Some(cfg);
    }

    pub fn advance_clock(&self, secs: u64) {
        self.state.lock().unwrap().cluster_time += secs;
    }

    pub fn put_backup(&self, backup: BackupMeta) {
        let mut state = self.state.lock().unwrap();
        state.backups.insert(backup.opid, backup);
    }

    /// Plant a lock in the regular table, the way a running backup or
    /// resync would.
    pub fn hold_lock(&self, header: LockHeader) {
        let mut state = self.state.lock().unwrap();
        let heartbeat = state.cluster_time;
        state
            .locks
            .insert(header.replset.clone(), LockData { header, heartbeat });
    }

    pub fn drop_lock(&self, replset: &str) {
        self.state.lock().unwrap().locks.remove(replset);
    }

    /// Plant an op-lock directly, bypassing acquisition. For staleness
    /// scenarios.
    pub fn plant_oplock(&self, header: LockHeader, heartbeat: u64) {
        let mut state = self.state.lock().unwrap();
        state
            .oplocks
            .insert(header.replset.clone(), LockData { header, heartbeat });
    }

    /// Node currently holding the op-lock for a replica set, if any.
    pub fn oplock_holder(&self, replset: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .oplocks
            .get(replset)
            .map(|lk| lk.header.node.clone())
    }
}

#[async_trait]
impl MetaStore for SimCluster {
    async fn get_config(&self) -> Result<Option<Config>> {
        Ok(self.state.lock().unwrap().config.clone())
    }

    async fn get_epoch(&self) -> Result<Epoch> {
        let state = self.state.lock().unwrap();
        Ok(Epoch(state.config.as_ref().map_or(0, |c| c.epoch)))
    }

    async fn cluster_time(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().cluster_time)
    }

    async fn init_meta(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.meta.get_or_insert_with(PitrMeta::new);
        Ok(())
    }

    async fn get_meta(&self) -> Result<Option<PitrMeta>> {
        Ok(self.state.lock().unwrap().meta.clone())
    }

    async fn set_cluster_status(&self, status: Status) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.meta.as_mut() {
            Some(meta) => {
                meta.status = status;
                Ok(())
            }
            None => Err(Error::Meta("pitr meta is not initialized".into())),
        }
    }

    async fn get_cluster_status(&self) -> Result<Option<Status>> {
        Ok(self.state.lock().unwrap().meta.as_ref().map(|m| m.status))
    }

    async fn is_oplog_slicing(&self) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let now = state.cluster_time;
        Ok(state.oplocks.values().any(|lk| !lk.is_stale(now)))
    }

    async fn set_nomination(&self, replset: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let meta = state.meta.get_or_insert_with(PitrMeta::new);
        meta.nominations.retain(|n| n.replset != replset);
        meta.nominations.push(NomineeSet {
            replset: replset.to_string(),
            nodes: Vec::new(),
            ack: None,
        });
        Ok(())
    }

    async fn set_nominees(&self, replset: &str, nodes: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let meta = state.meta.get_or_insert_with(PitrMeta::new);
        let idx = match meta.nominations.iter().position(|n| n.replset == replset) {
            Some(idx) => idx,
            None => {
                meta.nominations.push(NomineeSet {
                    replset: replset.to_string(),
                    nodes: Vec::new(),
                    ack: None,
                });
                meta.nominations.len() - 1
            }
        };
        let nomination = &mut meta.nominations[idx];

        // the round is decided; late nominee updates are dropped
        if nomination.ack.is_some() {
            return Ok(());
        }

        nomination.nodes = nodes.to_vec();
        Ok(())
    }

    async fn get_nominees(&self, replset: &str) -> Result<Option<NomineeSet>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .meta
            .as_ref()
            .and_then(|m| m.nomination(replset).cloned()))
    }

    async fn set_nominee_ack(&self, replset: &str, node: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let meta = state.meta.get_or_insert_with(PitrMeta::new);
        let idx = match meta.nominations.iter().position(|n| n.replset == replset) {
            Some(idx) => idx,
            None => {
                meta.nominations.push(NomineeSet {
                    replset: replset.to_string(),
                    nodes: Vec::new(),
                    ack: None,
                });
                meta.nominations.len() - 1
            }
        };
        let nomination = &mut meta.nominations[idx];

        // first ack wins the round
        if nomination.ack.is_none() {
            nomination.ack = Some(node.to_string());
        }
        Ok(())
    }

    async fn set_ready_rs_status(&self, replset: &str, node: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let meta = state.meta.get_or_insert_with(PitrMeta::new);
        let member = ReadyMember {
            replset: replset.to_string(),
            node: node.to_string(),
        };
        if !meta.ready.contains(&member) {
            meta.ready.push(member);
        }
        Ok(())
    }

    async fn members_with_status(&self, status: Status) -> Result<Vec<ReadyMember>> {
        let state = self.state.lock().unwrap();
        match (state.meta.as_ref(), status) {
            (Some(meta), Status::Ready) => Ok(meta.ready.clone()),
            _ => Ok(Vec::new()),
        }
    }

    async fn list_agents(&self) -> Result<Vec<AgentStatus>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .iter()
            .map(|n| AgentStatus {
                replset: n.replset.clone(),
                node: n.node.clone(),
                healthy: n.healthy,
                hidden: n.hidden,
                arbiter: n.arbiter,
            })
            .collect())
    }

    async fn cluster_members(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut members = Vec::new();
        for n in &state.nodes {
            if !members.contains(&n.replset) {
                members.push(n.replset.clone());
            }
        }
        Ok(members)
    }

    async fn node_info(&self, brief: &AgentBrief) -> Result<NodeInfo> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .find(|n| n.replset == brief.replset && n.node == brief.node)
            .cloned()
            .ok_or_else(|| Error::Meta(format!("unknown node {}/{}", brief.replset, brief.node)))
    }

    async fn get_backup_by_opid(&self, opid: OpId) -> Result<Option<BackupMeta>> {
        Ok(self.state.lock().unwrap().backups.get(&opid).cloned())
    }
}

#[async_trait]
impl LockService for SimCluster {
    async fn try_acquire(&self, header: &LockHeader) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let now = state.cluster_time;
        let table = if header.cmd == Cmd::Pitr {
            &mut state.oplocks
        } else {
            &mut state.locks
        };

        if let Some(existing) = table.get(&header.replset) {
            if !existing.is_stale(now) {
                return Err(Error::ConcurrentOp(existing.header.clone()));
            }
            // stale holder; fall through and reclaim
        }

        table.insert(
            header.replset.clone(),
            LockData {
                header: header.clone(),
                heartbeat: now,
            },
        );
        Ok(true)
    }

    async fn release(&self, header: &LockHeader) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let table = if header.cmd == Cmd::Pitr {
            &mut state.oplocks
        } else {
            &mut state.locks
        };

        let owned = table
            .get(&header.replset)
            .map_or(false, |existing| {
                existing.header.node == header.node && existing.header.opid == header.opid
            });
        if owned {
            table.remove(&header.replset);
        }
        Ok(())
    }

    async fn refresh(&self, header: &LockHeader) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let now = state.cluster_time;
        let table = if header.cmd == Cmd::Pitr {
            &mut state.oplocks
        } else {
            &mut state.locks
        };

        match table.get_mut(&header.replset) {
            Some(existing) if existing.header.opid == header.opid => {
                existing.heartbeat = now;
                Ok(())
            }
            _ => Err(Error::Lock(format!("lock is not held anymore: {}", header))),
        }
    }

    async fn get_locks(&self, filter: &LockFilter) -> Result<Vec<LockData>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .locks
            .values()
            .filter(|lk| filter.matches(&lk.header))
            .cloned()
            .collect())
    }

    async fn get_oplock_data(&self, filter: &LockFilter) -> Result<Option<LockData>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .oplocks
            .values()
            .find(|lk| filter.matches(&lk.header))
            .cloned())
    }
}
