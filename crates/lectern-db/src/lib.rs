//! # lectern-db
//!
//! PostgreSQL persistence for the lectern job engine.
//!
//! This crate provides:
//! - Connection pool management
//! - `PgJobStore`: the job ledger and generated-item storage
//! - `PgUnitCollector`: source documents split into ordered units
//! - Markdown-aware chunking
//! - In-memory store and collector with the same contracts
//!
//! ## Example
//!
//! ```rust,ignore
//! use lectern_db::Database;
//! use lectern_core::JobStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/lectern").await?;
//!     db.migrate().await?;
//!
//!     let job_id = lectern_core::new_v7();
//!     db.jobs.create_job(job_id, textbook_id, 0).await?;
//!     Ok(())
//! }
//! ```
pub mod chunking;
pub mod jobs;
pub mod memory;
pub mod pool;
pub mod sources;

// Test fixtures for integration tests
// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

pub use chunking::{Chunker, ChunkerConfig, MarkdownChunker};
pub use jobs::PgJobStore;
pub use memory::{MemoryJobStore, MemoryUnitCollector};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use sources::PgUnitCollector;

use lectern_core::Result;
#[cfg(feature = "migrations")]
use lectern_core::Error;

/// Database handle bundling the pool and its repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job ledger and generated items.
    pub jobs: PgJobStore,
    /// Source documents and unit collection.
    pub sources: PgUnitCollector,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobStore::new(pool.clone()),
            sources: PgUnitCollector::new(pool.clone()),
            pool,
        }
    }

    /// Connect with the default pool configuration.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
