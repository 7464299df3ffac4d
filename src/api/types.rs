//! API request and response types
//!
//! JSON field names are camelCase. They are API names, not the raw hash
//! fields the reporter writes to the store (`workerCount` here is
//! `workerThreads` in `instance:{id}:info`).

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::InstanceSnapshot;
use crate::aggregator::{FleetView, InstanceHealth};

/// Response for GET /api/info
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    #[serde(flatten)]
    pub snapshot: InstanceSnapshot,
    pub visitor_count: i64,
    pub instance_index: String,
    pub version: String,
}

/// Body of POST /api/action
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    /// Target instance; dashboards send it as a number or a string
    #[serde(deserialize_with = "instance_index")]
    pub instance_index: String,
    pub action: String,
}

fn instance_index<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Index {
        Text(String),
        Number(u64),
    }

    Ok(match Index::deserialize(deserializer)? {
        Index::Text(text) => text,
        Index::Number(number) => number.to_string(),
    })
}

/// Response for POST /api/action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub message: String,
}

/// One entry of GET /api/heartbeats
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatEntry {
    pub instance_index: String,
    /// Epoch milliseconds, absent if the stored value is not a number
    pub last_heartbeat: Option<i64>,
    pub seconds_ago: Option<u64>,
}

/// Response for GET /api/heartbeats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatsResponse {
    pub heartbeats: Vec<HeartbeatEntry>,
    pub count: usize,
}

/// Response for GET /api/fleet
#[derive(Debug, Clone, Serialize)]
pub struct FleetResponse {
    #[serde(flatten)]
    pub view: FleetView,
    /// Liveness classified with the serving instance's staleness threshold
    pub health: BTreeMap<String, InstanceHealth>,
}

/// Response for GET /api/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}
