//! PostgreSQL pool sizing and creation.
//!
//! Every worker loop holds a connection while it claims and settles a job,
//! and each running job has a progress writer on top of that, so the pool is
//! sized from the loop count rather than a flat number.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use lumen_core::Result;

use crate::error::map_sqlx_error;

/// Connections reserved for the stale sweep, retention cleanup and startup
/// queries, on top of two per worker loop.
pub const RESERVED_CONNECTIONS: u32 = 2;

/// Default acquire timeout in seconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_worker_loops(lumen_core::defaults::JOB_MAX_CONCURRENT)
    }
}

impl PoolConfig {
    /// Size a pool for `loops` concurrent worker loops.
    pub fn for_worker_loops(loops: usize) -> Self {
        let loops = u32::try_from(loops.max(1)).unwrap_or(u32::MAX / 2);
        Self {
            max_connections: loops.saturating_mul(2).saturating_add(RESERVED_CONNECTIONS),
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }

    /// Size from `JOB_MAX_CONCURRENT`, then apply explicit overrides.
    ///
    /// | Variable | Effect |
    /// |----------|--------|
    /// | `JOB_MAX_CONCURRENT` | Base sizing |
    /// | `DATABASE_MAX_CONNECTIONS` | Hard cap, replaces the computed size |
    /// | `DATABASE_ACQUIRE_TIMEOUT_SECS` | Acquire timeout |
    /// | `DATABASE_IDLE_TIMEOUT_SECS` | Idle timeout |
    pub fn from_env() -> Self {
        let loops = env_parse::<usize>("JOB_MAX_CONCURRENT")
            .unwrap_or(lumen_core::defaults::JOB_MAX_CONCURRENT);
        let mut config = Self::for_worker_loops(loops);

        if let Some(n) = env_parse::<u32>("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("DATABASE_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Duration::from_secs(secs);
        }
        config.min_connections = config.min_connections.min(config.max_connections);
        config
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self.min_connections = self.min_connections.min(self.max_connections);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Connect with the default sizing.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(map_sqlx_error)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

/// Log pool occupancy. Warns when every connection is checked out.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle() as u32;

    if size > 0 && idle == 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "All pooled connections are in use"
        );
    } else {
        debug!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            pool_idle = idle,
            "Pool occupancy"
        );
    }
}
