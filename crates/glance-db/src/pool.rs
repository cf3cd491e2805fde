//! Connection pool sizing for the job store.
//!
//! Every worker holds one connection while it selects, claims or settles a
//! job, and the recovery sweeper and producers need a few more. The pool is
//! sized from the worker count and can be overridden from the environment:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `GLANCE_DB_MAX_CONNECTIONS` | hard cap on pool size |
//! | `GLANCE_DB_ACQUIRE_TIMEOUT_SECS` | wait for a free connection before a claim errors |

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use glance_core::{Error, Result};

/// Connections kept beyond one per worker (producers, sweeper).
pub const CONNECTION_HEADROOM: u32 = 2;

/// Floor for the pool size, whatever the worker count.
pub const MIN_POOL_SIZE: u32 = 4;

const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    /// How long a claim or terminal write waits for a connection. A timeout
    /// surfaces as a store error, so the worker backs off.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_workers(glance_core::defaults::WORKER_COUNT)
    }
}

impl PoolConfig {
    /// One connection per worker plus [`CONNECTION_HEADROOM`].
    pub fn for_workers(worker_count: usize) -> Self {
        let workers = u32::try_from(worker_count).unwrap_or(u32::MAX);
        Self {
            max_connections: workers
                .saturating_add(CONNECTION_HEADROOM)
                .max(MIN_POOL_SIZE),
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }

    /// Apply `GLANCE_DB_*` overrides. Unparsable values are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(max) = env_u64("GLANCE_DB_MAX_CONNECTIONS") {
            self.max_connections = u32::try_from(max).unwrap_or(u32::MAX).max(1);
        }
        if let Some(secs) = env_u64("GLANCE_DB_ACQUIRE_TIMEOUT_SECS") {
            self.acquire_timeout = Duration::from_secs(secs);
        }
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(subsystem = "store", variable = name, value = %raw, "Ignoring unparsable pool setting");
            None
        }
    }
}

/// Connect a pool sized by `config`.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = config
        .options()
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "store",
        op = "create_pool",
        max_connections = config.max_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Job store pool connected"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sized_from_worker_count() {
        assert_eq!(PoolConfig::for_workers(1).max_connections, MIN_POOL_SIZE);
        assert_eq!(PoolConfig::for_workers(8).max_connections, 10);
        assert_eq!(PoolConfig::for_workers(usize::MAX).max_connections, u32::MAX);
    }

    #[test]
    fn test_builder_overrides() {
        let config = PoolConfig::for_workers(2)
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(1));
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.acquire_timeout, Duration::from_secs(1));
        assert_eq!(config.idle_timeout, Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS));
    }
}
