//! Failure tests for the instance runtime
//!
//! These tests verify that the system handles failures gracefully:
//! - Store outages
//! - Malformed and unknown instructions
//! - Failing actions
//! - Lost subscriptions

use std::sync::Arc;
use std::time::Duration;

use fleet_monitor::{
    actors::{
        command_bus::{ActionTable, CommandBusHandle, dispatch},
        messages::{Delivery, InstructionKind},
    },
    aggregator::{AggregationError, Aggregator},
    runtime::{FixedProbe, InstanceContext},
    store::{MemoryStore, SharedStore, StoreError},
};

use crate::helpers::*;

#[tokio::test]
async fn test_reporter_survives_store_outage() {
    let store = Arc::new(MemoryStore::new());
    let instance = TestInstance::idle(&store, "0", 10, 1024).await;

    store.set_available(false);
    let result = instance.reporter.report_now().await;
    assert!(result.is_err(), "report should fail while the store is down");

    store.set_available(true);
    instance.reporter.report_now().await.unwrap();
    assert_eq!(read_snapshot(&store, "0").await.memory_used_mib, 10.0);

    instance.shutdown().await;
}

#[tokio::test]
async fn test_aggregation_reports_store_outage() {
    let store = Arc::new(MemoryStore::new());
    let instance = TestInstance::idle(&store, "0", 10, 1024).await;
    instance.reporter.report_now().await.unwrap();

    store.set_available(false);
    let result = Aggregator::new(store.clone()).aggregate("0").await;

    assert!(matches!(
        result,
        Err(AggregationError::StoreUnavailable(StoreError::Unavailable(_)))
    ));

    instance.shutdown().await;
}

#[tokio::test]
async fn test_unknown_instruction_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let instance = TestInstance::idle(&store, "0", 4, 64).await;

    dispatch(&*store, "0", &InstructionKind::Unknown("explode".to_string()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(instance.ctx.ballast_bytes(), 0);
    assert_eq!(instance.ctx.active_tasks(), 0);

    // the bus keeps running
    dispatch(&*store, "0", &InstructionKind::Leak).await.unwrap();
    assert!(eventually(|| instance.ctx.ballast_bytes() > 0).await);

    instance.shutdown().await;
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let instance = TestInstance::idle(&store, "0", 4, 64).await;

    for payload in ["not json", "{}", r#"{"type": 42}"#] {
        store.publish("instance:0", payload).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(instance.ctx.ballast_bytes(), 0);

    let delivery = instance.bus.deliver(r#"{"type":"leak"}"#).await.unwrap();
    assert_eq!(delivery, Delivery::Executed(InstructionKind::Leak));

    instance.shutdown().await;
}

#[tokio::test]
async fn test_failed_allocation_does_not_abort() {
    let store = Arc::new(MemoryStore::new());
    let ctx = Arc::new(
        InstanceContext::new("0", u64::MAX, Box::new(FixedProbe(0)), Arc::new(|| 0u64))
            .with_leak_fraction(1.0),
    );
    let bus = CommandBusHandle::spawn(store.clone(), ctx.clone(), ActionTable::default())
        .await
        .unwrap();

    let delivery = bus.deliver(r#"{"type":"leak"}"#).await.unwrap();

    assert_eq!(delivery, Delivery::Failed(InstructionKind::Leak));
    assert_eq!(ctx.ballast_bytes(), 0);

    // still serving
    let delivery = bus.deliver(r#"{"type":"clear"}"#).await.unwrap();
    assert_eq!(delivery, Delivery::Executed(InstructionKind::Clear));

    bus.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscription_failure_is_returned() {
    let store = Arc::new(MemoryStore::new());
    store.set_available(false);

    let result = CommandBusHandle::spawn(
        store.clone(),
        create_test_context("0", 1, 16, Arc::new(|| 0u64)),
        ActionTable::default(),
    )
    .await;

    assert!(matches!(result, Err(StoreError::Unavailable(_))));
}

/// Dispatch `kind` to `target` until a subscriber receives it
async fn dispatch_until_received(
    store: &MemoryStore,
    target: &str,
    kind: &InstructionKind,
) -> bool {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(1) = dispatch(store, target, kind).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_bus_resubscribes_after_subscription_drop() {
    let store = Arc::new(MemoryStore::new());
    let instance = TestInstance::idle(&store, "0", 4, 64).await;

    // the store ends the subscription, as a dropped pub/sub connection would
    assert_eq!(store.close_subscriptions("instance:0").await, 1);

    assert!(dispatch_until_received(&store, "0", &InstructionKind::Leak).await);
    assert!(eventually(|| instance.ctx.ballast_bytes() > 0).await);

    instance.shutdown().await;
}

#[tokio::test]
async fn test_bus_serves_commands_while_resubscribing() {
    let store = Arc::new(MemoryStore::new());
    let instance = TestInstance::idle(&store, "0", 4, 64).await;

    store.set_available(false);
    store.close_subscriptions("instance:0").await;

    let delivery = instance.bus.deliver(r#"{"type":"leak"}"#).await.unwrap();
    assert_eq!(delivery, Delivery::Executed(InstructionKind::Leak));

    store.set_available(true);
    assert!(dispatch_until_received(&store, "0", &InstructionKind::Clear).await);
    assert!(eventually(|| instance.ctx.ballast_bytes() == 0).await);

    instance.shutdown().await;
}
