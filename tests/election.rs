//! End-to-end election scenarios: cold start, failover, disable/enable.

mod common;

use common::{settle, Cluster};
use pitrd::common::Error;
use pitrd::meta::MetaStore;

/// Cold start with a primary and a secondary: the primary drives the
/// nomination, wins its own tier, takes the op-lock and slices; the
/// secondary observes the lock and idles.
#[tokio::test(start_paused = true)]
async fn cold_start_elects_the_priority_node() {
    let cluster = Cluster::build(&[("rs0", &["rs0/a", "rs0/b"])]);
    cluster.sim.configure(|cfg| {
        cfg.pitr.enabled = true;
        cfg.pitr.slicing_interval_secs = 600;
        cfg.pitr.priority.insert("rs0/a".to_string(), 2.0);
        cfg.pitr.priority.insert("rs0/b".to_string(), 1.0);
    });
    cluster.spawn_all();

    settle(60).await;

    assert_eq!(cluster.sim.oplock_holder("rs0").as_deref(), Some("rs0/a"));
    assert!(cluster.agent("rs0/a").is_slicing());
    assert!(!cluster.agent("rs0/b").is_slicing());

    let nominees = cluster.sim.get_nominees("rs0").await.unwrap().unwrap();
    assert_eq!(nominees.ack.as_deref(), Some("rs0/a"));
    assert!(cluster.agent("rs0/a").slicer().is_streaming());

    // cancelling the outer context clears every handle and releases every
    // lock within a bounded time
    cluster.cancel.cancel();
    settle(10).await;

    assert_eq!(cluster.sim.oplock_holder("rs0"), None);
    assert!(!cluster.agent("rs0/a").is_slicing());
    assert!(!cluster.agent("rs0/a").slicer().is_streaming());
}

/// The streaming node fails and goes unhealthy; leadership moves to the
/// surviving secondary, which elects itself in the next round.
#[tokio::test(start_paused = true)]
async fn failover_moves_the_slicer_to_a_healthy_peer() {
    let cluster = Cluster::build(&[("rs0", &["rs0/a", "rs0/b"])]);
    cluster.sim.configure(|cfg| {
        cfg.pitr.enabled = true;
        cfg.pitr.priority.insert("rs0/a".to_string(), 2.0);
        cfg.pitr.priority.insert("rs0/b".to_string(), 1.0);
    });
    cluster.spawn_all();

    settle(60).await;
    assert_eq!(cluster.sim.oplock_holder("rs0").as_deref(), Some("rs0/a"));

    // the node dies mid-stream; the database elects b as new primary
    cluster
        .agent("rs0/a")
        .slicer()
        .fail_stream(Error::OplogStream("connection reset".into()));
    cluster.sim.set_node_health("rs0/a", false);
    cluster.sim.set_cluster_leader("rs0/b");

    settle(120).await;

    assert_eq!(cluster.sim.oplock_holder("rs0").as_deref(), Some("rs0/b"));
    assert!(cluster.agent("rs0/b").is_slicing());
    assert!(!cluster.agent("rs0/a").is_slicing());

    let nominees = cluster.sim.get_nominees("rs0").await.unwrap().unwrap();
    assert_eq!(nominees.ack.as_deref(), Some("rs0/b"));
}

/// After a stream failure the lock is released promptly, but the failed
/// node sits out the penalty before contending again.
#[tokio::test(start_paused = true)]
async fn failed_node_sits_out_the_penalty() {
    let cluster = Cluster::build(&[("rs0", &["rs0/a"])]);
    cluster.enable_pitr(600);
    cluster.spawn_all();

    settle(60).await;
    assert_eq!(cluster.sim.oplock_holder("rs0").as_deref(), Some("rs0/a"));

    cluster
        .agent("rs0/a")
        .slicer()
        .fail_stream(Error::OplogStream("disk full".into()));

    // the lock goes first, the penalty counts from there
    settle(2).await;
    assert_eq!(cluster.sim.oplock_holder("rs0"), None);

    // well inside the 2 x check-period penalty: still out of the contest
    settle(25).await;
    assert_eq!(cluster.sim.oplock_holder("rs0"), None);
    assert!(!cluster.agent("rs0/a").is_slicing());

    // eventually the node re-contends and wins again
    settle(90).await;
    assert_eq!(cluster.sim.oplock_holder("rs0").as_deref(), Some("rs0/a"));
    assert!(cluster.agent("rs0/a").is_slicing());
}

/// Disabling tears the slicer down and releases the lock; the meta
/// document survives and the next enable reuses it.
#[tokio::test(start_paused = true)]
async fn disable_releases_everything_and_enable_reuses_meta() {
    let cluster = Cluster::build(&[("rs0", &["rs0/a", "rs0/b"])]);
    cluster.enable_pitr(600);
    cluster.spawn_all();

    settle(60).await;
    assert_eq!(cluster.slicing_nodes("rs0").len(), 1);

    cluster.sim.configure(|cfg| cfg.pitr.enabled = false);
    settle(30).await;

    assert!(cluster.slicing_nodes("rs0").is_empty());
    assert_eq!(cluster.sim.oplock_holder("rs0"), None);
    assert!(cluster.sim.get_meta().await.unwrap().is_some());

    cluster.sim.configure(|cfg| cfg.pitr.enabled = true);
    settle(90).await;

    assert_eq!(cluster.slicing_nodes("rs0").len(), 1);
    assert!(cluster.sim.oplock_holder("rs0").is_some());
}

/// A stale op-lock left by a crashed holder does not block the next
/// election: the pre-check treats it as reclaimable.
#[tokio::test(start_paused = true)]
async fn stale_lock_is_reclaimed_by_the_next_winner() {
    let cluster = Cluster::build(&[("rs0", &["rs0/a"])]);
    cluster.enable_pitr(600);

    // a crashed holder that stopped heartbeating long ago
    let now = cluster.sim.cluster_time().await.unwrap();
    cluster.sim.plant_oplock(
        pitrd::lock::LockHeader {
            cmd: pitrd::common::Cmd::Pitr,
            replset: "rs0".to_string(),
            node: "rs0/dead".to_string(),
            opid: pitrd::common::OpId::new(),
            epoch: 0,
        },
        now,
    );
    cluster.sim.advance_clock(pitrd::lock::STALE_FRAME_SEC + 1);

    cluster.spawn_all();
    settle(60).await;

    assert_eq!(cluster.sim.oplock_holder("rs0").as_deref(), Some("rs0/a"));
    assert!(cluster.agent("rs0/a").is_slicing());
}
