//! Persistence Layer
//!
//! SQLite storage for raw marketplace records and daily KPI rollups, with
//! async operations via sqlx.
//!
//! # Database Schema
//!
//! ## Raw tables
//! - brands: id, name
//! - customers: customer directory (brand_id, username → province, district)
//! - raw_orders: one row per (brand_id, source, order_code); `payload` holds the
//!   semi-structured export fields as JSON
//! - raw_revenue_transactions: settled figures linked by order_code
//! - raw_marketing_spend: ad spend and counters per (brand_id, source, date)
//!
//! ## Rollup tables
//! - daily_kpi_total: one row per (brand_id, date)
//! - daily_kpi_source: one row per (brand_id, date, source)
//!
//! Rollup rows keep headline columns for inspection plus the full typed rollup
//! serialized as JSON in `data`.

pub mod models;
pub mod record_repository;
pub mod rollup_repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::domain::errors::StoreError;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

pub(crate) fn query_error(context: &str, e: sqlx::Error) -> StoreError {
    tracing::error!("{}: {}", context, e);
    StoreError::Query(format!("{}: {}", context, e))
}

/// Initialize the database connection pool
///
/// # Arguments
/// - `config`: URL and pool settings (e.g., "sqlite://data/seller_kpi.db")
///
/// # Errors
/// Returns error if database connection fails or migrations fail
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    // Ensure data directory exists
    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let log_level = if config.log_queries {
        tracing::log::LevelFilter::Debug
    } else {
        tracing::log::LevelFilter::Trace
    };
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .log_statements(log_level);

    // An in-memory database lives and dies with its connection
    let in_memory = config.url.contains(":memory:");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections)
    };

    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "brands",
        r#"
        CREATE TABLE IF NOT EXISTS brands (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "customers",
        r#"
        CREATE TABLE IF NOT EXISTS customers (
            brand_id INTEGER NOT NULL,
            username TEXT NOT NULL,
            province TEXT,
            district TEXT,
            PRIMARY KEY (brand_id, username),
            FOREIGN KEY (brand_id) REFERENCES brands(id)
        )
        "#,
    ),
    (
        "raw_orders",
        r#"
        CREATE TABLE IF NOT EXISTS raw_orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            brand_id INTEGER NOT NULL,
            source TEXT NOT NULL,
            order_code TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            status TEXT,
            shipped_at DATETIME,
            delivered_at DATETIME,
            payload TEXT,
            cogs REAL,
            original_price REAL,
            subsidy_amount REAL,
            buyer_username TEXT,
            UNIQUE (brand_id, source, order_code),
            FOREIGN KEY (brand_id) REFERENCES brands(id)
        )
        "#,
    ),
    (
        "raw_revenue_transactions",
        r#"
        CREATE TABLE IF NOT EXISTS raw_revenue_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            brand_id INTEGER NOT NULL,
            source TEXT NOT NULL,
            order_code TEXT NOT NULL,
            transaction_date DATETIME,
            net_revenue REAL,
            gmv REAL,
            total_fees REAL,
            refund_amount REAL,
            return_tracking_code TEXT,
            FOREIGN KEY (brand_id) REFERENCES brands(id)
        )
        "#,
    ),
    (
        "raw_marketing_spend",
        r#"
        CREATE TABLE IF NOT EXISTS raw_marketing_spend (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            brand_id INTEGER NOT NULL,
            source TEXT NOT NULL,
            date DATE NOT NULL,
            ad_spend REAL,
            impressions INTEGER,
            clicks INTEGER,
            conversions INTEGER,
            reach INTEGER,
            FOREIGN KEY (brand_id) REFERENCES brands(id)
        )
        "#,
    ),
    (
        "daily_kpi_total",
        r#"
        CREATE TABLE IF NOT EXISTS daily_kpi_total (
            brand_id INTEGER NOT NULL,
            date DATE NOT NULL,
            net_revenue REAL NOT NULL,
            total_orders INTEGER NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (brand_id, date)
        )
        "#,
    ),
    (
        "daily_kpi_source",
        r#"
        CREATE TABLE IF NOT EXISTS daily_kpi_source (
            brand_id INTEGER NOT NULL,
            date DATE NOT NULL,
            source TEXT NOT NULL,
            net_revenue REAL NOT NULL,
            total_orders INTEGER NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (brand_id, date, source)
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_raw_orders_created ON raw_orders(brand_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_raw_orders_buyer ON raw_orders(brand_id, source, buyer_username)",
    "CREATE INDEX IF NOT EXISTS idx_revenue_order ON raw_revenue_transactions(brand_id, source, order_code)",
    "CREATE INDEX IF NOT EXISTS idx_marketing_date ON raw_marketing_spend(brand_id, date)",
];

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    for (table, ddl) in MIGRATIONS {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            DatabaseError::MigrationError(format!("Failed to create {} table: {}", table, e))
        })?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/seller_kpi.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/seller_kpi.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }

    /// Private in-memory database, used by tests
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            log_queries: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database(&DatabaseConfig::in_memory()).await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('brands', 'customers', 'raw_orders', 'raw_revenue_transactions', \
              'raw_marketing_spend', 'daily_kpi_total', 'daily_kpi_source')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 7);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite://data/seller_kpi.db");
        assert_eq!(config.max_connections, 5);
    }
}
