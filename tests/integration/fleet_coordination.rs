//! End-to-end coordination tests
//!
//! Several instances share one in-memory store, the way a scaled-out
//! deployment shares one Redis:
//! - Reporters publish heartbeats and snapshots
//! - Instructions reach only their target
//! - The aggregator sums whatever the fleet reported

use std::sync::{Arc, Barrier};
use std::time::Duration;

use fleet_monitor::{
    InstanceSnapshot,
    actors::{command_bus::dispatch, messages::InstructionKind},
    aggregator::{Aggregator, InstanceHealth},
    runtime::fibonacci,
    store::{HEARTBEATS_KEY, MemoryStore, SharedStore},
    util::now_ms,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_single_instance_fleet_totals() {
    let store = Arc::new(MemoryStore::new());
    let instance = TestInstance::idle(&store, "0", 10, 1024).await;

    instance.reporter.report_now().await.unwrap();
    let view = Aggregator::new(store.clone()).aggregate("0").await.unwrap();

    let own = view.per_instance["0"];
    assert_eq!(own.worker_count, 0);
    assert_eq!(own.memory_used_mib, 10.0);
    assert_eq!(own.memory_free_mib, 1014.0);
    assert_eq!(own.memory_total_mib, 1024.0);
    assert_eq!(view.totals, own);
    assert_eq!(
        view.liveness["0"].health(Duration::from_secs(5)),
        InstanceHealth::Up
    );

    instance.shutdown().await;
}

#[tokio::test]
async fn test_fleet_view_sums_every_instance() {
    let store = Arc::new(MemoryStore::new());
    let a = TestInstance::idle(&store, "0", 100, 512).await;
    let b = TestInstance::idle(&store, "1", 50, 256).await;
    let c = TestInstance::idle(&store, "2", 25, 128).await;

    for instance in [&a, &b, &c] {
        instance.reporter.report_now().await.unwrap();
    }

    let view = Aggregator::new(store.clone()).aggregate("1").await.unwrap();

    assert_eq!(view.instance_count(), 3);
    assert_eq!(view.requesting_instance_id, "1");

    let mut expected = InstanceSnapshot::default();
    for snapshot in view.per_instance.values() {
        expected.accumulate(snapshot);
    }
    assert_eq!(view.totals, expected);
    assert_eq!(view.totals.memory_used_mib, 175.0);
    assert_eq!(view.totals.memory_total_mib, 896.0);
    assert_eq!(view.totals.memory_free_mib, 721.0);

    for instance in [&a, &b, &c] {
        instance.shutdown().await;
    }
}

#[tokio::test]
async fn test_instruction_reaches_only_its_target() {
    let store = Arc::new(MemoryStore::new());
    let x = TestInstance::idle(&store, "0", 4, 64).await;
    let y = TestInstance::idle(&store, "1", 4, 64).await;

    let receivers = dispatch(&*store, "1", &InstructionKind::Leak)
        .await
        .unwrap();
    assert_eq!(receivers, 1);

    assert!(eventually(|| y.ctx.ballast_bytes() > 0).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(x.ctx.ballast_bytes(), 0);

    dispatch(&*store, "1", &InstructionKind::Clear)
        .await
        .unwrap();
    assert!(eventually(|| y.ctx.ballast_bytes() == 0).await);

    x.shutdown().await;
    y.shutdown().await;
}

#[tokio::test]
async fn test_compute_registers_and_releases_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let gate = Arc::new(Barrier::new(2));
    let job_gate = gate.clone();
    let ctx = create_test_context(
        "1",
        10,
        1024,
        Arc::new(move || {
            job_gate.wait();
            fibonacci(20)
        }),
    );
    let instance = TestInstance::spawn(&store, ctx).await;
    instance.reporter.report_now().await.unwrap();

    dispatch(&*store, "1", &InstructionKind::Compute)
        .await
        .unwrap();

    assert!(eventually(|| instance.ctx.active_tasks() == 1).await);
    let running = wait_for_snapshot(&store, "1", |s| s.worker_count == 1).await;

    gate.wait();

    assert!(running, "the running job should be published out of band");
    assert!(eventually(|| instance.ctx.active_tasks() == 0).await);
    assert!(wait_for_snapshot(&store, "1", |s| s.worker_count == 0).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(instance.ctx.active_tasks(), 0);

    instance.shutdown().await;
}

#[tokio::test]
async fn test_heartbeats_advance_with_the_timer() {
    let store = Arc::new(MemoryStore::new());
    let ctx = create_test_context("7", 1, 16, Arc::new(|| 0u64));
    let shared: Arc<dyn SharedStore> = store.clone();
    let reporter = fleet_monitor::actors::reporter::ReporterHandle::spawn(
        shared,
        ctx,
        Duration::from_millis(10),
    );

    let mut samples = Vec::new();
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let heartbeats = store.get_all_fields(HEARTBEATS_KEY).await.unwrap();
        if let Some(ts) = heartbeats.get("7") {
            samples.push(ts.parse::<i64>().unwrap());
        }
    }

    assert!(samples.len() >= 4);
    assert!(samples.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(*samples.last().unwrap() <= now_ms());

    reporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stopped_instance_becomes_stale() {
    let store = Arc::new(MemoryStore::new());
    let instance = TestInstance::idle(&store, "3", 1, 16).await;
    instance.reporter.report_now().await.unwrap();
    instance.shutdown().await;

    let aggregator = Aggregator::new(store.clone());
    let later = now_ms() + 10_000;
    let view = aggregator.aggregate_at("0", later).await.unwrap();

    // entries are never removed, only aged
    assert_eq!(view.instance_count(), 1);
    assert_eq!(
        view.liveness["3"].health(Duration::from_secs(5)),
        InstanceHealth::Stale
    );
    assert_eq!(
        view.liveness["3"].health(Duration::from_secs(60)),
        InstanceHealth::Up
    );
}
