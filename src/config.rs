use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::trace;

use crate::util;

/// Configuration of one fleet instance
///
/// Every field defaults to its environment variable (see `util`), so a
/// config file only needs to name the values it overrides.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "crate::util::get_instance_id")]
    pub instance_id: String,

    /// Memory ceiling in mebibytes
    #[serde(default = "crate::util::get_memory_limit_mib")]
    pub memory_limit_mib: u64,

    #[serde(default = "crate::util::get_store_url")]
    pub store_url: String,

    #[serde(default = "crate::util::get_addr")]
    pub bind_addr: Ipv4Addr,

    #[serde(default = "crate::util::get_port")]
    pub port: u16,

    /// Heartbeat age after which the fleet view reports an instance as stale
    #[serde(default = "crate::util::get_stale_after_secs")]
    pub stale_after_secs: u64,

    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,

    /// Share of currently free memory allocated by a `leak` instruction
    #[serde(default = "default_leak_fraction")]
    pub leak_fraction: f64,

    /// Argument of the CPU-bound job run by a `compute` instruction
    #[serde(default = "default_compute_parameter")]
    pub compute_parameter: u32,
}

impl InstanceConfig {
    /// Build the configuration purely from the environment
    pub fn from_env() -> Self {
        Self {
            instance_id: util::get_instance_id(),
            memory_limit_mib: util::get_memory_limit_mib(),
            store_url: util::get_store_url(),
            bind_addr: util::get_addr(),
            port: util::get_port(),
            stale_after_secs: util::get_stale_after_secs(),
            report_interval_ms: default_report_interval_ms(),
            leak_fraction: default_leak_fraction(),
            compute_parameter: default_compute_parameter(),
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mib.saturating_mul(1024 * 1024)
    }
}

fn default_report_interval_ms() -> u64 {
    1000
}

fn default_leak_fraction() -> f64 {
    0.5
}

fn default_compute_parameter() -> u32 {
    46
}

pub fn read_config_file(path: &str) -> anyhow::Result<InstanceConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str::<InstanceConfig>(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .and_then(|config| {
            if !(0.0..=1.0).contains(&config.leak_fraction) {
                anyhow::bail!("leak_fraction must be between 0 and 1");
            }
            if !(1..=util::MAX_MEMORY_LIMIT_MIB).contains(&config.memory_limit_mib) {
                anyhow::bail!(
                    "memory_limit_mib must be between 1 and {}",
                    util::MAX_MEMORY_LIMIT_MIB
                );
            }
            Ok(config)
        })
        .inspect(|config| trace!("loaded config: {config:?}"))
}
