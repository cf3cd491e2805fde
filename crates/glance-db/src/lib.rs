//! # glance-db
//!
//! Job store backends for the glance capture pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgJobStore`], the PostgreSQL job store with its schema migrations
//! - [`MemoryJobStore`], an in-process store for single-process runs and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use glance_db::Database;
//!
//! let db = Database::connect("postgres://localhost/glance").await?;
//! db.migrate().await?;
//! let store = std::sync::Arc::new(db.jobs.clone());
//! ```

pub mod jobs;
pub mod memory;
pub mod pool;

pub use jobs::PgJobStore;
pub use memory::MemoryJobStore;
pub use pool::{create_pool, PoolConfig};

use glance_core::{Error, Result};

/// Database handle bundling the pool and its repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job store for capture analysis jobs.
    pub jobs: PgJobStore,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobStore::new(pool.clone()),
            pool,
        }
    }

    /// Connect with the default pool size and any `GLANCE_DB_*` overrides.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url, &PoolConfig::default().with_env_overrides()).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
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
