//! Candidate priority tiers
//!
//! Maps the configured per-node weights and the agent list into ordered
//! candidate tiers per replica set. Tiers are offered one at a time by the
//! nomination driver; ties within a tier mean any member may win.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::meta::AgentStatus;

pub(crate) const DEFAULT_SCORE: f64 = 1.0;

/// Ordered candidate tiers, per replica set.
#[derive(Debug, Default)]
pub(crate) struct NodesPriority {
    tiers: HashMap<String, Vec<Vec<String>>>,
}

impl NodesPriority {
    /// Tiers for one replica set, highest priority first. Empty when the
    /// replica set has no fit candidates.
    pub fn rs(&self, replset: &str) -> Vec<Vec<String>> {
        self.tiers.get(replset).cloned().unwrap_or_default()
    }
}

/// Ranks fit agents by their configured weight, grouping equal weights into
/// one tier. Unfit agents (arbiters, unhealthy nodes) never appear.
pub(crate) fn calc_nodes_priority(
    explicit: &HashMap<String, f64>,
    agents: &[AgentStatus],
) -> NodesPriority {
    let mut scored: HashMap<String, Vec<(String, f64)>> = HashMap::new();
    for agent in agents {
        if !agent.is_fit() {
            continue;
        }
        let score = explicit.get(&agent.node).copied().unwrap_or(DEFAULT_SCORE);
        scored
            .entry(agent.replset.clone())
            .or_default()
            .push((agent.node.clone(), score));
    }

    let mut tiers = HashMap::new();
    for (replset, mut nodes) in scored {
        nodes.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut grouped: Vec<Vec<String>> = Vec::new();
        let mut current_score = f64::NAN;
        for (node, score) in nodes {
            if grouped.is_empty() || score != current_score {
                grouped.push(Vec::new());
                current_score = score;
            }
            grouped.last_mut().unwrap().push(node);
        }
        tiers.insert(replset, grouped);
    }

    NodesPriority { tiers }
}
