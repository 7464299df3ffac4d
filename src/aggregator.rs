//! Fleet-wide view assembled on demand from the shared store
//!
//! The set of known instances is whatever has ever written a heartbeat;
//! entries are never removed, so a stopped instance shows up with an
//! ever-growing heartbeat age rather than disappearing.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, trace};

use crate::InstanceSnapshot;
use crate::store::{
    HEARTBEATS_KEY, SharedStore, StoreError, VISITOR_COUNT_KEY, instance_info_key,
};
use crate::util::now_ms;

/// Heartbeat information of one instance at aggregation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Liveness {
    /// Last reported heartbeat in epoch milliseconds
    pub last_heartbeat: Option<i64>,
    /// Milliseconds since `last_heartbeat`, never negative
    pub age_ms: Option<u64>,
}

impl Liveness {
    fn at(heartbeat: Option<i64>, now_ms: i64) -> Self {
        Self {
            last_heartbeat: heartbeat,
            age_ms: heartbeat.map(|ts| now_ms.saturating_sub(ts).max(0) as u64),
        }
    }

    /// Classify against a staleness threshold
    pub fn health(&self, stale_after: Duration) -> InstanceHealth {
        match self.age_ms {
            None => InstanceHealth::Unknown,
            Some(age) if u128::from(age) > stale_after.as_millis() => InstanceHealth::Stale,
            Some(_) => InstanceHealth::Up,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceHealth {
    Up,
    Stale,
    Unknown,
}

impl fmt::Display for InstanceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceHealth::Up => write!(f, "up"),
            InstanceHealth::Stale => write!(f, "stale"),
            InstanceHealth::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of one aggregation request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetView {
    pub per_instance: BTreeMap<String, InstanceSnapshot>,
    pub liveness: BTreeMap<String, Liveness>,
    pub totals: InstanceSnapshot,
    pub visitor_count: i64,
    pub requesting_instance_id: String,
}

impl FleetView {
    pub fn instance_count(&self) -> usize {
        self.per_instance.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// A store read or the counter increment failed
    StoreUnavailable(StoreError),
}

impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationError::StoreUnavailable(e) => {
                write!(f, "fleet view unavailable: {}", e)
            }
        }
    }
}

impl std::error::Error for AggregationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AggregationError::StoreUnavailable(e) => Some(e),
        }
    }
}

impl From<StoreError> for AggregationError {
    fn from(e: StoreError) -> Self {
        AggregationError::StoreUnavailable(e)
    }
}

/// Builds `FleetView`s from the shared store
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn SharedStore>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub async fn aggregate(&self, requesting_id: &str) -> Result<FleetView, AggregationError> {
        self.aggregate_at(requesting_id, now_ms()).await
    }

    /// Aggregate with an explicit reference time for heartbeat ages
    ///
    /// Reads are not atomic across instances; each per-instance entry is
    /// internally consistent but may be from a different tick than its
    /// neighbours.
    pub async fn aggregate_at(
        &self,
        requesting_id: &str,
        now_ms: i64,
    ) -> Result<FleetView, AggregationError> {
        let visitor_count = self.store.increment(VISITOR_COUNT_KEY).await?;

        let heartbeats: BTreeMap<String, String> = self
            .store
            .get_all_fields(HEARTBEATS_KEY)
            .await?
            .into_iter()
            .collect();
        trace!("aggregating {} known instances", heartbeats.len());

        let infos: Vec<HashMap<String, String>> =
            try_join_all(heartbeats.keys().map(|id| self.fetch_info(id))).await?;

        let mut per_instance = BTreeMap::new();
        let mut liveness = BTreeMap::new();
        let mut totals = InstanceSnapshot::default();

        for ((id, heartbeat), info) in heartbeats.into_iter().zip(infos) {
            let snapshot = InstanceSnapshot::from_fields(&info);
            totals.accumulate(&snapshot);

            liveness.insert(
                id.clone(),
                Liveness::at(heartbeat.trim().parse().ok(), now_ms),
            );
            per_instance.insert(id, snapshot);
        }

        debug!(
            "fleet view for {requesting_id}: {} instances, {} workers",
            per_instance.len(),
            totals.worker_count
        );

        Ok(FleetView {
            per_instance,
            liveness,
            totals,
            visitor_count,
            requesting_instance_id: requesting_id.to_string(),
        })
    }

    async fn fetch_info(&self, id: &str) -> Result<HashMap<String, String>, StoreError> {
        self.store.get_all_fields(&instance_info_key(id)).await
    }
}
