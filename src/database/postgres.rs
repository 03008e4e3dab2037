//! PostgreSQL connector backed by a lazily connecting `sqlx` pool.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use crate::config::DatabaseConfig;
use crate::error::DispatchError;

use super::backend::{Connector, DatabaseHandle, DatabaseTransaction};

const APPLICATION_NAME: &str = "ara-mail-dispatch";

/// Builds `PgPool` handles from [`DatabaseConfig`].
pub struct PostgresConnector {
    options: PgConnectOptions,
    pool_size: u32,
    min_idle: u32,
    max_lifetime: Duration,
    idle_timeout: Duration,
    acquire_timeout: Duration,
    /// Connection string with the password masked (for logging purposes)
    target: String,
}

impl PostgresConnector {
    /// Validate the configuration and prepare connect options.
    ///
    /// `dsn` takes precedence; otherwise `instance` names the database and
    /// host, port and credentials come from the client environment.
    pub fn new(config: &DatabaseConfig) -> Result<Self, DispatchError> {
        let (options, target) = connect_options(config)?;

        Ok(Self {
            options,
            pool_size: config.pool_size,
            min_idle: config.min_idle.min(config.pool_size),
            max_lifetime: Duration::from_secs(config.max_lifetime_seconds),
            idle_timeout: Duration::from_secs(config.idle_timeout_seconds),
            acquire_timeout: Duration::from_secs(config.acquire_timeout_seconds),
            target,
        })
    }

    pub fn options(&self) -> &PgConnectOptions {
        &self.options
    }
}

fn connect_options(config: &DatabaseConfig) -> Result<(PgConnectOptions, String), DispatchError> {
    let (mut options, target) = match (config.dsn.as_deref(), config.instance.as_deref()) {
        (Some(dsn), _) if !dsn.trim().is_empty() => {
            let url = if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
                dsn.to_string()
            } else {
                format!("postgres://{}", dsn)
            };
            let options = PgConnectOptions::from_str(&url).map_err(|e| {
                DispatchError::InvalidConfig(format!("invalid database dsn: {}", e))
            })?;
            let target = mask_password(&with_credentials(&url, config));
            (options, target)
        }
        (_, Some(instance)) if !instance.trim().is_empty() => (
            PgConnectOptions::new().database(instance),
            format!("instance {}", instance),
        ),
        _ => {
            return Err(DispatchError::InvalidConfig(
                "either database.dsn or database.instance must be set".to_string(),
            ))
        }
    };

    if let Some(user) = config.user.as_deref() {
        options = options.username(user);
    }
    if let Some(password) = config.password.as_deref() {
        options = options.password(password);
    }

    let statement_timeout_ms = config.query_timeout().as_millis();
    options = options
        .application_name(APPLICATION_NAME)
        .options([("statement_timeout", statement_timeout_ms)]);

    Ok((options, target))
}

/// Render the dsn with credentials folded in, for masking.
fn with_credentials(url: &str, config: &DatabaseConfig) -> String {
    let Some(user) = config.user.as_deref() else {
        return url.to_string();
    };
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match config.password.as_deref() {
        Some(password) => format!("{}://{}:{}@{}", scheme, user, password, rest),
        None => format!("{}://{}@{}", scheme, user, rest),
    }
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // scheme separator is not a password delimiter
            if !url[colon_pos..].starts_with("://") {
                let prefix = &url[..colon_pos + 1];
                let suffix = &url[at_pos..];
                return format!("{}***{}", prefix, suffix);
            }
        }
    }
    url.to_string()
}

#[async_trait]
impl Connector for PostgresConnector {
    type Handle = PostgresHandle;

    async fn open(&self) -> Result<PostgresHandle, DispatchError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.pool_size)
            .min_connections(self.min_idle)
            .max_lifetime(self.max_lifetime)
            .idle_timeout(self.idle_timeout)
            .acquire_timeout(self.acquire_timeout)
            .connect_lazy_with(self.options.clone());

        tracing::debug!(
            target_db = %self.target,
            pool_size = self.pool_size,
            min_idle = self.min_idle,
            "PostgreSQL connection pool created"
        );

        Ok(PostgresHandle { pool })
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

/// A `PgPool` installed as the manager's current handle.
pub struct PostgresHandle {
    pool: PgPool,
}

impl PostgresHandle {
    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DatabaseHandle for PostgresHandle {
    type Tx = Transaction<'static, Postgres>;

    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Self::Tx, sqlx::Error> {
        self.pool.begin().await
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("PostgreSQL connection pool closed");
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[async_trait]
impl DatabaseTransaction for Transaction<'static, Postgres> {
    async fn commit(self) -> Result<(), sqlx::Error> {
        Transaction::commit(self).await
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        Transaction::rollback(self).await
    }
}
