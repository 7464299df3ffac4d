use std::net::Ipv4Addr;

use serde::Deserialize;
use tracing::warn;

const INSTANCE_INDEX: &str = "INSTANCE_INDEX";

const DEFAULT_INSTANCE_ID: &str = "0";

pub fn get_instance_id() -> String {
    std::env::var(INSTANCE_INDEX)
        .ok()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_INSTANCE_ID.to_string())
}

const MEMORY_LIMIT: &str = "MEMORY_LIMIT";

const DEFAULT_MEMORY_LIMIT_MIB: u64 = 1024;

/// Largest limit whose byte count still fits in a u64
pub const MAX_MEMORY_LIMIT_MIB: u64 = u64::MAX >> 20;

pub fn get_memory_limit_mib() -> u64 {
    let Ok(raw) = std::env::var(MEMORY_LIMIT) else {
        return DEFAULT_MEMORY_LIMIT_MIB;
    };

    parse_memory_limit(&raw).unwrap_or_else(|| {
        warn!("ignoring malformed {MEMORY_LIMIT}={raw:?}, using {DEFAULT_MEMORY_LIMIT_MIB}m");
        DEFAULT_MEMORY_LIMIT_MIB
    })
}

/// Parse a memory limit of the form `<integer>m` into mebibytes
pub fn parse_memory_limit(raw: &str) -> Option<u64> {
    let digits = raw
        .trim()
        .strip_suffix('m')
        .or_else(|| raw.trim().strip_suffix('M'))?;

    digits
        .parse()
        .ok()
        .filter(|mib| (1..=MAX_MEMORY_LIMIT_MIB).contains(mib))
}

const PORT: &str = "PORT";

const DEFAULT_PORT: u16 = 8080;

pub fn get_port() -> u16 {
    let port_from_env = std::env::var(PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const BIND_ADDR: &str = "BIND_ADDR";

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub fn get_addr() -> Ipv4Addr {
    let addr_from_env = std::env::var(BIND_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

const STALE_AFTER_SECS: &str = "STALE_AFTER_SECS";

const DEFAULT_STALE_AFTER_SECS: u64 = 5;

pub fn get_stale_after_secs() -> u64 {
    let from_env = std::env::var(STALE_AFTER_SECS);
    from_env.map_or(DEFAULT_STALE_AFTER_SECS, |res| {
        res.parse().unwrap_or(DEFAULT_STALE_AFTER_SECS)
    })
}

const REDIS_URL: &str = "REDIS_URL";

const VCAP_SERVICES: &str = "VCAP_SERVICES";

const DEFAULT_STORE_URL: &str = "redis://localhost:6379";

/// Resolve the shared store url
///
/// Cloud Foundry `p-redis` bindings in `VCAP_SERVICES` win over `REDIS_URL`.
pub fn get_store_url() -> String {
    if let Ok(vcap) = std::env::var(VCAP_SERVICES)
        && let Some(url) = redis_url_from_vcap(&vcap)
    {
        return url;
    }

    std::env::var(REDIS_URL).unwrap_or_else(|_| DEFAULT_STORE_URL.to_string())
}

#[derive(Debug, Deserialize)]
struct VcapServices {
    #[serde(rename = "p-redis", default)]
    p_redis: Vec<VcapBinding>,
}

#[derive(Debug, Deserialize)]
struct VcapBinding {
    credentials: RedisCredentials,
}

#[derive(Debug, Deserialize)]
struct RedisCredentials {
    host: String,
    port: u16,
    #[serde(default)]
    password: String,
}

/// Build a redis url from the first `p-redis` binding of a `VCAP_SERVICES` document
pub fn redis_url_from_vcap(raw: &str) -> Option<String> {
    let services: VcapServices = match serde_json::from_str(raw) {
        Ok(services) => services,
        Err(e) => {
            warn!("ignoring unparsable {VCAP_SERVICES}: {e}");
            return None;
        }
    };

    let RedisCredentials {
        host,
        port,
        password,
    } = services.p_redis.into_iter().next()?.credentials;

    Some(format!("redis://:{password}@{host}:{port}"))
}

/// Current wall-clock time in milliseconds since the unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
