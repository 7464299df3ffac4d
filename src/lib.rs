pub mod actors;
pub mod aggregator;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod runtime;
pub mod store;
pub mod util;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

const FIELD_WORKER_THREADS: &str = "workerThreads";
const FIELD_MEMORY_USED: &str = "memoryUsed";
const FIELD_MEMORY_FREE: &str = "memoryFree";
const FIELD_MEMORY_TOTAL: &str = "memoryTotal";
const FIELD_LAST_UPDATE: &str = "lastUpdate";

/// Latest self-reported metrics of one instance.
///
/// Stored as a hash under `instance:{id}:info`. The field names and the
/// numeric-string encoding are shared by every instance of the fleet, so
/// they must not change independently of the readers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub worker_count: u64,
    #[serde(rename = "memoryUsedMiB")]
    pub memory_used_mib: f64,
    #[serde(rename = "memoryFreeMiB")]
    pub memory_free_mib: f64,
    #[serde(rename = "memoryTotalMiB")]
    pub memory_total_mib: f64,
    /// Milliseconds since the unix epoch
    pub last_update: i64,
}

impl InstanceSnapshot {
    /// Build a snapshot from raw byte figures.
    ///
    /// `used` is rounded to two decimals first and `free` is derived from it,
    /// so `used + free == total` holds for the reported values.
    pub fn from_bytes(worker_count: u64, used_bytes: u64, limit_bytes: u64, now_ms: i64) -> Self {
        let memory_total_mib = round2(limit_bytes as f64 / BYTES_PER_MIB);
        let memory_used_mib = round2(used_bytes as f64 / BYTES_PER_MIB);

        Self {
            worker_count,
            memory_used_mib,
            memory_free_mib: round2(memory_total_mib - memory_used_mib),
            memory_total_mib,
            last_update: now_ms,
        }
    }

    /// Encode as store hash fields.
    pub fn to_fields(&self) -> HashMap<String, String> {
        HashMap::from([
            (FIELD_WORKER_THREADS.to_string(), self.worker_count.to_string()),
            (
                FIELD_MEMORY_USED.to_string(),
                format!("{:.2}", self.memory_used_mib),
            ),
            (
                FIELD_MEMORY_FREE.to_string(),
                format!("{:.2}", self.memory_free_mib),
            ),
            (
                FIELD_MEMORY_TOTAL.to_string(),
                format!("{:.2}", self.memory_total_mib),
            ),
            (FIELD_LAST_UPDATE.to_string(), self.last_update.to_string()),
        ])
    }

    /// Decode from store hash fields.
    ///
    /// Missing or unparsable fields count as zero; an instance that has not
    /// reported yet simply contributes nothing to the fleet totals.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        fn parse<T: std::str::FromStr + Default>(
            fields: &HashMap<String, String>,
            name: &str,
        ) -> T {
            fields
                .get(name)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or_default()
        }

        Self {
            worker_count: parse(fields, FIELD_WORKER_THREADS),
            memory_used_mib: parse(fields, FIELD_MEMORY_USED),
            memory_free_mib: parse(fields, FIELD_MEMORY_FREE),
            memory_total_mib: parse(fields, FIELD_MEMORY_TOTAL),
            last_update: parse(fields, FIELD_LAST_UPDATE),
        }
    }

    /// Add another snapshot's figures into this one.
    ///
    /// `last_update` keeps the newest of both timestamps.
    pub fn accumulate(&mut self, other: &InstanceSnapshot) {
        self.worker_count += other.worker_count;
        self.memory_used_mib += other.memory_used_mib;
        self.memory_free_mib += other.memory_free_mib;
        self.memory_total_mib += other.memory_total_mib;
        self.last_update = self.last_update.max(other.last_update);
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
