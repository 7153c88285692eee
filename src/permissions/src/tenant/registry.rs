//! Tenant -> connection pool registry

use crate::error::Result;
use crate::types::TenantId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

/// Creates and readies connection pools for tenants
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    /// Cheap handle to a shared pool
    type Pool: Clone + Send + Sync + 'static;

    /// Build a pool for the tenant without opening connections
    fn connect(&self, tenant: &TenantId) -> Result<Self::Pool>;

    /// Make the pool ready for new connections (e.g. install a fresh credential).
    ///
    /// Called every time a pool is handed out.
    async fn prepare(&self, tenant: &TenantId, pool: &Self::Pool) -> Result<()>;
}

/// Process-lifetime cache of one pool per tenant.
///
/// Pools are created lazily on first access and never evicted. A failed pool
/// creation is not cached, so a later request retries it.
pub struct TenantRegistry<C: PoolConnector> {
    connector: C,
    pools: RwLock<HashMap<TenantId, C::Pool>>,
}

impl<C: PoolConnector> TenantRegistry<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Get the tenant's pool, creating it on first use
    pub async fn get(&self, tenant: &TenantId) -> Result<C::Pool> {
        let pool = self.get_or_create(tenant)?;
        self.connector.prepare(tenant, &pool).await?;
        Ok(pool)
    }

    fn get_or_create(&self, tenant: &TenantId) -> Result<C::Pool> {
        {
            let pools = self.pools.read();
            if let Some(pool) = pools.get(tenant) {
                return Ok(pool.clone());
            }
        }

        let mut pools = self.pools.write();
        // Another caller may have created it between the two locks
        if let Some(pool) = pools.get(tenant) {
            debug!(tenant = %tenant, "Tenant pool created concurrently");
            return Ok(pool.clone());
        }

        let pool = self.connector.connect(tenant)?;
        pools.insert(tenant.clone(), pool.clone());
        info!(tenant = %tenant, pools = pools.len(), "Created tenant connection pool");
        Ok(pool)
    }

    /// Register an externally built pool; returns false if the tenant already has one
    pub fn register(&self, tenant: TenantId, pool: C::Pool) -> bool {
        let mut pools = self.pools.write();
        if pools.contains_key(&tenant) {
            return false;
        }
        pools.insert(tenant, pool);
        true
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.pools.read().contains_key(tenant)
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }
}
