//! Database connection pool management.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use lectern_core::{defaults, Error, Result};

/// Pool configuration options.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to maintain.
    pub min_connections: u32,
    /// Connection acquire timeout.
    pub connect_timeout: Duration,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum connection lifetime.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::POOL_MAX_CONNECTIONS,
            min_connections: defaults::POOL_MIN_CONNECTIONS,
            connect_timeout: Duration::from_secs(defaults::POOL_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(defaults::POOL_IDLE_TIMEOUT_SECS),
            max_lifetime: Some(Duration::from_secs(defaults::POOL_MAX_LIFETIME_SECS)),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DB_MAX_CONNECTIONS` | 20 |
    /// | `DB_MIN_CONNECTIONS` | 2 |
    /// | `DB_ACQUIRE_TIMEOUT_SECS` | 30 |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_parse::<u32>("DB_MAX_CONNECTIONS") {
            config.max_connections = n.max(1);
        }
        if let Some(n) = env_parse::<u32>("DB_MIN_CONNECTIONS") {
            config.min_connections = n;
        }
        if let Some(secs) = env_parse::<u64>("DB_ACQUIRE_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }
        config.min_connections = config.min_connections.min(config.max_connections);
        config
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Create a new PostgreSQL connection pool with default configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

/// Create a new PostgreSQL connection pool with custom configuration.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        "Creating database connection pool"
    );

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout);

    if let Some(max_lifetime) = config.max_lifetime {
        options = options.max_lifetime(max_lifetime);
    }

    let pool = options
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        pool_idle = pool.num_idle(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log current pool health; warns when no idle connection is left.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool health check"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "Connection pool has no idle connections, potential exhaustion"
        );
    }
}
