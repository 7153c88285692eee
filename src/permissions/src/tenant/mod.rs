//! Tenant connection management
//!
//! - [`TenantRegistry`]: tenant -> pool cache, at most one pool per tenant
//! - [`CredentialProvider`]: cached short-lived database auth token
//! - `PgTenantConnector`: Postgres pools whose connections authenticate with
//!   the current credential

pub mod credentials;
pub mod registry;

#[cfg(feature = "postgres")]
pub mod connector;

pub use credentials::{
    token_expiry, AwsCredentials, CredentialProvider, PasswordSource, RdsIamTokenSource,
    StaticPassword, TokenSource,
};
pub use registry::{PoolConnector, TenantRegistry};

#[cfg(feature = "postgres")]
pub use connector::{PgTenantConnector, PoolSettings, TenantPool};
