//! Process configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, anyhow};

use postview_infra::ApplyPolicy;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PARTITIONS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// How long a mutation waits for the transport to acknowledge its event.
    pub publish_timeout: Duration,
    pub apply_policy: ApplyPolicy,
    /// Number of single-threaded projection partitions.
    pub partitions: usize,
    /// Redis Streams transport; in-memory bus when unset.
    pub redis_url: Option<String>,
    /// Postgres view store; in-memory store when unset.
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            publish_timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            apply_policy: ApplyPolicy::default(),
            partitions: DEFAULT_PARTITIONS,
            redis_url: None,
            database_url: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be a socket address like 0.0.0.0:8080")?;

        let publish_timeout = match var("PUBLISH_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(
                v.parse::<u64>()
                    .context("PUBLISH_TIMEOUT_MS must be a number of milliseconds")?,
            ),
            None => Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
        };

        let apply_policy = match var("VIEW_APPLY_POLICY") {
            Some(v) => v.parse::<ApplyPolicy>().map_err(|e| anyhow!(e))?,
            None => ApplyPolicy::default(),
        };

        let partitions = match var("PROJECTION_PARTITIONS") {
            Some(v) => v
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow!("PROJECTION_PARTITIONS must be a positive integer"))?,
            None => DEFAULT_PARTITIONS,
        };

        Ok(Self {
            bind_addr,
            publish_timeout,
            apply_policy,
            partitions,
            redis_url: var("REDIS_URL"),
            database_url: var("DATABASE_URL"),
        })
    }
}
