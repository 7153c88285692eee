//! Postgres pools for tenant databases

use super::credentials::PasswordSource;
use super::registry::PoolConnector;
use crate::error::{PermissionsError, Result};
use crate::types::TenantId;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Connection settings shared by every tenant pool
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub ssl_mode: PgSslMode,
    pub application_name: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            ssl_mode: PgSslMode::Prefer,
            application_name: "tenant-permissions".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

/// A tenant's pool plus the credential last installed on it
#[derive(Clone)]
pub struct TenantPool {
    pool: PgPool,
    options: Option<PgConnectOptions>,
    applied: Arc<Mutex<Option<String>>>,
}

impl TenantPool {
    /// Wrap a pool built elsewhere; its connect options are never replaced
    pub fn external(pool: PgPool) -> Self {
        Self {
            pool,
            options: None,
            applied: Arc::new(Mutex::new(None)),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Builds one lazy pool per tenant; the database name is the tenant identifier.
///
/// Pools keep `min_connections = 0` so every physical connection is opened
/// on demand, after [`PoolConnector::prepare`] has installed the current
/// password.
pub struct PgTenantConnector {
    settings: PoolSettings,
    password: Arc<dyn PasswordSource>,
}

impl PgTenantConnector {
    pub fn new(settings: PoolSettings, password: Arc<dyn PasswordSource>) -> Self {
        Self { settings, password }
    }

    fn connect_options(&self, tenant: &TenantId) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.settings.host)
            .port(self.settings.port)
            .username(&self.settings.user)
            .database(tenant.as_str())
            .ssl_mode(self.settings.ssl_mode)
            .application_name(&self.settings.application_name)
    }
}

#[async_trait]
impl PoolConnector for PgTenantConnector {
    type Pool = TenantPool;

    fn connect(&self, tenant: &TenantId) -> Result<TenantPool> {
        if self.settings.max_connections == 0 {
            return Err(PermissionsError::Connection(
                "max_connections must be greater than 0".into(),
            ));
        }

        let options = self.connect_options(tenant);
        let pool = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .min_connections(0)
            .acquire_timeout(self.settings.acquire_timeout)
            .idle_timeout(self.settings.idle_timeout)
            .max_lifetime(self.settings.max_lifetime)
            .connect_lazy_with(options.clone());

        Ok(TenantPool {
            pool,
            options: Some(options),
            applied: Arc::new(Mutex::new(None)),
        })
    }

    async fn prepare(&self, tenant: &TenantId, pool: &TenantPool) -> Result<()> {
        let Some(options) = &pool.options else {
            return Ok(());
        };

        // Fetch and install under one lock so an older token never replaces a newer one
        let mut applied = pool.applied.lock().await;
        let password = self
            .password
            .password()
            .await
            .map_err(|e| PermissionsError::Connection(format!("get password: {}", e)))?;

        if applied.as_deref() != Some(password.as_str()) {
            pool.pool
                .set_connect_options(options.clone().password(&password));
            *applied = Some(password);
            debug!(tenant = %tenant, "Installed new credential on tenant pool");
        }
        Ok(())
    }
}
