use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bound for a single datastore call when none is configured.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    /// Bounds how long a request waits for a pooled connection
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
            statement_timeout: cfg.db_statement_timeout(),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
///
/// # Errors
/// Returns the driver error if the pool cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, DbErr> {
    debug!(max_connections = config.max_connections, "configuring database pool");

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("checkout_db_max_connections", config.max_connections as f64);

    let pool = Database::connect(opt).await?;
    info!("Database connection pool established");
    Ok(pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs the embedded migrations up to the latest version.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbErr> {
    info!("Running database migrations");
    let start = std::time::Instant::now();

    let result = crate::migrator::Migrator::up(pool, None).await;

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!("Database migrations completed in {:?}", elapsed),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Runs one datastore call, giving up once `limit` elapses.
///
/// A call that is still running when the limit passes is dropped and reported as
/// [`ServiceError::DatabaseTimeout`].
pub async fn with_statement_timeout<T, F>(limit: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, DbErr>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            counter!("checkout_db_statement_timeouts_total", 1);
            warn!(?limit, "database call exceeded its statement timeout");
            Err(ServiceError::DatabaseTimeout(limit))
        }
    }
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), DbErr> {
    let start = std::time::Instant::now();
    let result = pool.ping().await;

    match &result {
        Ok(_) => debug!("Database ping took {:?}", start.elapsed()),
        Err(e) => {
            error!("Database ping failed: {}", e);
            counter!("checkout_db_connection_failures_total", 1);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_memory() -> DbConfig {
        DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn migrations_apply_to_fresh_sqlite() {
        let pool = establish_connection_with_config(&sqlite_memory())
            .await
            .expect("sqlite pool");
        run_migrations(&pool).await.expect("migrations");
        assert!(check_connection(&pool).await.is_ok());

        // Re-running is a no-op
        run_migrations(&pool).await.expect("second run");
    }

    #[tokio::test]
    async fn stalled_call_becomes_database_timeout() {
        let limit = Duration::from_millis(20);
        let err = with_statement_timeout(limit, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DbErr>(1)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::DatabaseTimeout(d) if d == limit));
    }

    #[tokio::test]
    async fn driver_errors_pass_through_unchanged() {
        let err = with_statement_timeout(Duration::from_secs(1), async {
            Err::<(), _>(DbErr::Custom("boom".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::DatabaseError(DbErr::Custom(m)) if m == "boom"));
    }
}
