//! Nomination rounds
//!
//! The leader publishes priority tiers for each replica set, one tier per
//! renomination frame, until a candidate acknowledges. Every participating
//! node first syncs on the cluster-wide ready status, then polls the
//! nominee list for its own name.

use std::sync::Arc;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::agent::prio::calc_nodes_priority;
use crate::agent::{
    Agent, NOMINATION_POLL_CYCLE, NOMINATION_POLL_TIMEOUT, OPLOCK_POLL_CYCLE, OPLOCK_POLL_TIMEOUT,
    RENOMINATION_FRAME,
};
use crate::common::{Config, Error, Result};
use crate::meta::Status;

impl Agent {
    /// Leader branch of the tick: wait for all previous slicers to let go,
    /// bring the meta document to `ready`, and fan out one nomination task
    /// per replica set. Returns false if the tick should end here.
    pub(crate) async fn lead_nomination(
        self: Arc<Self>,
        cfg: &Config,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        tracing::debug!("checking locks in the whole cluster");
        if !self.wait_all_oplock_release(cancel).await? {
            tracing::debug!("there are still working pitr members, nomination will not be continued");
            return Ok(false);
        }

        self.meta.init_meta().await?;
        if !self.is_cluster_status(Status::Ready).await {
            self.meta.set_cluster_status(Status::Ready).await?;
        }

        let agents = self.meta.list_agents().await?;
        let priority = calc_nodes_priority(&cfg.pitr.priority, &agents);
        let replsets = self.meta.cluster_members().await?;
        let fit_agents = agents.iter().filter(|a| a.is_fit()).count();

        let driver = Arc::clone(&self);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            // Nominations only start after every fit agent confirmed the
            // ready status; a reconcile timeout abandons the round.
            if let Err(err) = driver.reconcile_ready_status(fit_agents, &cancel).await {
                if !err.is_cancelled() {
                    tracing::error!("reconcile ready status: {}", err);
                }
                return;
            }

            for replset in replsets {
                let tiers = priority.rs(&replset);
                let agent = Arc::clone(&driver);
                tokio::spawn(async move {
                    if let Err(err) = agent.nominate_rs(&replset, tiers).await {
                        tracing::error!("nodes nomination error for {}: {}", replset, err);
                    }
                });
            }
        });

        Ok(true)
    }

    /// Wait until no live op-lock remains anywhere in the cluster. Returns
    /// false when the polling deadline passes first.
    pub(crate) async fn wait_all_oplock_release(
        &self,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let mut tick = time::interval_at(
            time::Instant::now() + OPLOCK_POLL_CYCLE,
            OPLOCK_POLL_CYCLE,
        );
        let timeout = time::sleep(OPLOCK_POLL_TIMEOUT);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tick.tick() => {
                    if !self.meta.is_oplog_slicing().await? {
                        return Ok(true);
                    }
                    tracing::debug!("oplog slicing still running");
                }
                _ = &mut timeout => {
                    tracing::warn!("timeout while waiting for release of all op-locks");
                    return Ok(false);
                }
            }
        }
    }

    /// One nomination round for one replica set. Offers each tier in order,
    /// stopping as soon as some candidate acknowledged.
    pub(crate) async fn nominate_rs(&self, replset: &str, tiers: Vec<Vec<String>>) -> Result<()> {
        tracing::debug!("pitr nomination list for {}: {:?}", replset, tiers);
        self.meta.set_nomination(replset).await?;

        for tier in tiers {
            if tier.is_empty() {
                continue;
            }

            if let Some(nominees) = self.meta.get_nominees(replset).await? {
                if let Some(ack) = &nominees.ack {
                    tracing::debug!("pitr nomination: {} won by {}", replset, ack);
                    return Ok(());
                }
            }

            self.meta.set_nominees(replset, &tier).await?;
            tracing::debug!("pitr nomination {}, set candidates {:?}", replset, tier);

            time::sleep(RENOMINATION_FRAME).await;
        }

        Ok(())
    }

    /// Follower side: sync the ready handshake, then poll the nominee list
    /// for this node. Returns false when another node already acknowledged
    /// or the polling deadline passed.
    pub(crate) async fn wait_nomination(
        &self,
        replset: &str,
        node: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.confirm_ready_status(cancel).await?;

        let mut tick = time::interval_at(
            time::Instant::now() + NOMINATION_POLL_CYCLE,
            NOMINATION_POLL_CYCLE,
        );
        let timeout = time::sleep(NOMINATION_POLL_TIMEOUT);
        tokio::pin!(timeout);

        tracing::debug!("waiting pitr nomination");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tick.tick() => {
                    let Some(nominees) = self.meta.get_nominees(replset).await? else {
                        continue;
                    };
                    if nominees.ack.is_some() {
                        return Ok(false);
                    }
                    if nominees.nodes.iter().any(|n| n == node) {
                        return Ok(true);
                    }
                }
                _ = &mut timeout => return Ok(false),
            }
        }
    }

    /// Poll until the cluster status turns `ready`, then record this node
    /// in the ready set.
    pub(crate) async fn confirm_ready_status(&self, cancel: &CancellationToken) -> Result<()> {
        let mut tick = time::interval_at(
            time::Instant::now() + NOMINATION_POLL_CYCLE,
            NOMINATION_POLL_CYCLE,
        );
        let timeout = time::sleep(NOMINATION_POLL_TIMEOUT);
        tokio::pin!(timeout);

        tracing::debug!("waiting for cluster ready status");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tick.tick() => {
                    if self.meta.get_cluster_status().await? == Some(Status::Ready) {
                        self.meta
                            .set_ready_rs_status(&self.brief.replset, &self.brief.node)
                            .await?;
                        return Ok(());
                    }
                }
                _ = &mut timeout => return Err(Error::Timeout("waiting for cluster ready status")),
            }
        }
    }

    /// Leader side: wait until at least `want` agents confirmed the ready
    /// status.
    pub(crate) async fn reconcile_ready_status(
        &self,
        want: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut tick = time::interval_at(
            time::Instant::now() + NOMINATION_POLL_CYCLE,
            NOMINATION_POLL_CYCLE,
        );
        let timeout = time::sleep(NOMINATION_POLL_TIMEOUT);
        tokio::pin!(timeout);

        tracing::debug!("reconciling ready status from all agents");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tick.tick() => {
                    let ready = self.meta.members_with_status(Status::Ready).await?;
                    tracing::debug!("agents in ready: {}; waiting for agents: {}", ready.len(), want);
                    if ready.len() >= want {
                        return Ok(());
                    }
                }
                _ = &mut timeout => return Err(Error::Timeout("reconciling ready status")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{AgentBrief, MetaStore};
    use crate::sim::{SimCluster, SimSlicerFactory};
    use std::time::Duration;

    fn agent_on(cluster: &Arc<SimCluster>, replset: &str, node: &str) -> Arc<Agent> {
        Agent::new(
            AgentBrief {
                replset: replset.into(),
                node: node.into(),
            },
            cluster.clone(),
            cluster.clone(),
            Arc::new(SimSlicerFactory::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_stops_once_acked() {
        let cluster = SimCluster::new();
        cluster.add_node("rs0", "rs0/a", true, true);
        cluster.add_node("rs0", "rs0/b", false, false);
        let agent = agent_on(&cluster, "rs0", "rs0/a");

        let tiers = vec![vec!["rs0/a".to_string()], vec!["rs0/b".to_string()]];
        let driver = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.nominate_rs("rs0", tiers).await })
        };

        // let the driver publish the first tier and park in its frame
        time::sleep(Duration::from_secs(1)).await;
        let nominees = cluster.get_nominees("rs0").await.unwrap().unwrap();
        assert_eq!(nominees.nodes, vec!["rs0/a".to_string()]);

        cluster.set_nominee_ack("rs0", "rs0/a").await.unwrap();
        driver.await.unwrap().unwrap();

        // the second tier was never offered
        let nominees = cluster.get_nominees("rs0").await.unwrap().unwrap();
        assert_eq!(nominees.nodes, vec!["rs0/a".to_string()]);
        assert_eq!(nominees.ack.as_deref(), Some("rs0/a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_tiers_skip_the_frame() {
        let cluster = SimCluster::new();
        let agent = agent_on(&cluster, "rs0", "rs0/a");

        let start = time::Instant::now();
        agent
            .nominate_rs("rs0", vec![vec![], vec![]])
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        // a single non-empty tier costs exactly one frame
        let start = time::Instant::now();
        agent
            .nominate_rs("rs0", vec![vec![], vec!["rs0/a".to_string()]])
            .await
            .unwrap();
        assert_eq!(start.elapsed(), RENOMINATION_FRAME);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renomination_is_idempotent() {
        let cluster = SimCluster::new();
        cluster.add_node("rs0", "rs0/a", true, true);
        let agent = agent_on(&cluster, "rs0", "rs0/a");
        let tiers = vec![vec!["rs0/a".to_string()], vec!["rs0/b".to_string()]];

        for _ in 0..2 {
            let driver = {
                let agent = agent.clone();
                let tiers = tiers.clone();
                tokio::spawn(async move { agent.nominate_rs("rs0", tiers).await })
            };
            time::sleep(Duration::from_secs(1)).await;
            cluster.set_nominee_ack("rs0", "rs0/a").await.unwrap();
            driver.await.unwrap().unwrap();

            let nominees = cluster.get_nominees("rs0").await.unwrap().unwrap();
            assert_eq!(nominees.ack.as_deref(), Some("rs0/a"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_nomination_lost_round() {
        let cluster = SimCluster::new();
        cluster.add_node("rs0", "rs0/a", true, true);
        let agent = agent_on(&cluster, "rs0", "rs0/b");
        let cancel = CancellationToken::new();

        cluster.init_meta().await.unwrap();
        cluster.set_cluster_status(Status::Ready).await.unwrap();
        cluster.set_nomination("rs0").await.unwrap();
        cluster
            .set_nominees("rs0", &["rs0/a".to_string()])
            .await
            .unwrap();
        cluster.set_nominee_ack("rs0", "rs0/a").await.unwrap();

        let nominated = agent.wait_nomination("rs0", "rs0/b", &cancel).await.unwrap();
        assert!(!nominated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_nomination_times_out_without_round() {
        let cluster = SimCluster::new();
        let agent = agent_on(&cluster, "rs0", "rs0/a");
        let cancel = CancellationToken::new();

        cluster.init_meta().await.unwrap();
        cluster.set_cluster_status(Status::Ready).await.unwrap();

        let start = time::Instant::now();
        let nominated = agent.wait_nomination("rs0", "rs0/a", &cancel).await.unwrap();
        assert!(!nominated);
        assert!(start.elapsed() >= NOMINATION_POLL_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_ready_times_out_without_meta() {
        let cluster = SimCluster::new();
        let agent = agent_on(&cluster, "rs0", "rs0/a");
        let cancel = CancellationToken::new();

        let err = agent.confirm_ready_status(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
