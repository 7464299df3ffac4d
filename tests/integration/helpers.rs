//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use fleet_monitor::{
    InstanceSnapshot,
    actors::{
        command_bus::{ActionTable, CommandBusHandle},
        reporter::ReporterHandle,
    },
    runtime::{ComputeJob, FixedProbe, InstanceContext},
    store::{MemoryStore, SharedStore, instance_info_key},
};

pub const MIB: u64 = 1024 * 1024;

pub fn create_test_context(
    id: &str,
    used_mib: u64,
    limit_mib: u64,
    job: ComputeJob,
) -> Arc<InstanceContext> {
    Arc::new(InstanceContext::new(
        id,
        limit_mib * MIB,
        Box::new(FixedProbe(used_mib * MIB)),
        job,
    ))
}

/// One simulated fleet member: context plus both actors
pub struct TestInstance {
    pub ctx: Arc<InstanceContext>,
    pub reporter: ReporterHandle,
    pub bus: CommandBusHandle,
}

impl TestInstance {
    /// Spawn with a long report interval so tests drive reports explicitly
    pub async fn spawn(store: &Arc<MemoryStore>, ctx: Arc<InstanceContext>) -> Self {
        let shared: Arc<dyn SharedStore> = store.clone();
        let reporter = ReporterHandle::spawn(shared, Arc::clone(&ctx), Duration::from_secs(60));
        let bus = CommandBusHandle::spawn(store.clone(), Arc::clone(&ctx), ActionTable::default())
            .await
            .unwrap();

        Self { ctx, reporter, bus }
    }

    /// Spawn an instance whose compute job returns immediately
    pub async fn idle(store: &Arc<MemoryStore>, id: &str, used_mib: u64, limit_mib: u64) -> Self {
        Self::spawn(store, create_test_context(id, used_mib, limit_mib, Arc::new(|| 0u64))).await
    }

    pub async fn shutdown(&self) {
        self.bus.shutdown().await.ok();
        self.reporter.shutdown().await.ok();
    }
}

pub async fn read_snapshot(store: &MemoryStore, id: &str) -> InstanceSnapshot {
    InstanceSnapshot::from_fields(&store.get_all_fields(&instance_info_key(id)).await.unwrap())
}

/// Poll `condition` every few milliseconds; false if it never held within 2s
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Wait until the stored snapshot of `id` satisfies `predicate`
pub async fn wait_for_snapshot(
    store: &MemoryStore,
    id: &str,
    predicate: impl Fn(&InstanceSnapshot) -> bool,
) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !predicate(&read_snapshot(store, id).await) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
