//! Shared harness: an in-process cluster of agents on paused tokio time.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use pitrd::meta::AgentBrief;
use pitrd::sim::{SimCluster, SimSlicer, SimSlicerFactory};
use pitrd::Agent;

pub struct TestAgent {
    pub agent: Arc<Agent>,
    pub factory: Arc<SimSlicerFactory>,
}

impl TestAgent {
    pub fn node(&self) -> String {
        self.agent.brief().node.clone()
    }

    pub fn is_slicing(&self) -> bool {
        self.agent.snapshot().slicing
    }

    /// The slicer this agent built most recently.
    pub fn slicer(&self) -> Arc<SimSlicer> {
        self.factory.last().expect("agent has built no slicer")
    }
}

pub struct Cluster {
    pub sim: Arc<SimCluster>,
    pub agents: Vec<TestAgent>,
    pub cancel: CancellationToken,
}

impl Cluster {
    /// Build a cluster from `(replset, nodes)` pairs. The first node of the
    /// first replica set is the primary of the configuration replica set,
    /// i.e. the cluster leader.
    pub fn build(replsets: &[(&str, &[&str])]) -> Self {
        let sim = SimCluster::new();
        let mut agents = Vec::new();

        for (rs_idx, (rs, nodes)) in replsets.iter().enumerate() {
            for (node_idx, node) in nodes.iter().enumerate() {
                let primary = node_idx == 0;
                let leader = rs_idx == 0 && node_idx == 0;
                sim.add_node(rs, node, primary, leader);

                let factory = Arc::new(SimSlicerFactory::new());
                let agent = Agent::new(
                    AgentBrief {
                        replset: rs.to_string(),
                        node: node.to_string(),
                    },
                    sim.clone(),
                    sim.clone(),
                    factory.clone(),
                );
                agents.push(TestAgent { agent, factory });
            }
        }

        Self {
            sim,
            agents,
            cancel: CancellationToken::new(),
        }
    }

    pub fn enable_pitr(&self, interval_secs: u64) {
        self.sim.configure(|cfg| {
            cfg.pitr.enabled = true;
            cfg.pitr.slicing_interval_secs = interval_secs;
        });
    }

    pub fn spawn_all(&self) {
        for ta in &self.agents {
            tokio::spawn(ta.agent.clone().run(self.cancel.clone()));
        }
    }

    pub fn agent(&self, node: &str) -> &TestAgent {
        self.agents
            .iter()
            .find(|ta| ta.node() == node)
            .expect("no such agent")
    }

    /// Agents of one replica set currently running a slicer.
    pub fn slicing_nodes(&self, replset: &str) -> Vec<String> {
        self.agents
            .iter()
            .filter(|ta| ta.agent.brief().replset == replset && ta.is_slicing())
            .map(|ta| ta.node())
            .collect()
    }
}

/// Let the simulated cluster run for a stretch of (paused) time.
pub async fn settle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}
