//! Service configuration loading and validation

use crate::tenant::{CredentialProvider, PasswordSource, RdsIamTokenSource, StaticPassword};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SSL_MODES: &[&str] = &["disable", "allow", "prefer", "require", "verify-ca", "verify-full"];

/// Complete service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerSection,

    pub database: DatabaseSection,

    #[serde(default)]
    pub requests: RequestsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

/// Shared settings for every tenant database; the database name is the tenant id
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseSection {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub user: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_application_name")]
    pub application_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,
    pub auth: DatabaseAuth,
}

/// How new database connections authenticate
#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DatabaseAuth {
    /// Short-lived IAM token; region falls back to `AWS_REGION`
    Iam {
        #[serde(default)]
        region: Option<String>,
    },
    /// Fixed password
    Password { password: String },
}

impl std::fmt::Debug for DatabaseAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseAuth::Iam { region } => f.debug_struct("Iam").field("region", region).finish(),
            DatabaseAuth::Password { .. } => f.write_str("Password { .. }"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestsSection {
    /// Deadline for one permissions request; 0 disables it
    #[serde(default = "default_request_timeout")]
    pub timeout_ms: u64,
}

impl Default for RequestsSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_request_timeout(),
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_log_level() -> String { "info".to_string() }
fn default_db_port() -> u16 { 5432 }
fn default_ssl_mode() -> String { "require".to_string() }
fn default_application_name() -> String { "tenant-permissions".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_acquire_timeout() -> u64 { 3000 }
fn default_idle_timeout() -> u64 { 600 }
fn default_max_lifetime() -> u64 { 1800 }
fn default_request_timeout() -> u64 { 10000 }

impl ServiceConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .context("Failed to read configuration file")?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: ServiceConfig =
            toml::from_str(contents).context("Failed to parse configuration file")?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be non-zero");
        }

        let db = &self.database;
        if db.host.is_empty() {
            anyhow::bail!("Database host must be set");
        }
        if db.user.is_empty() {
            anyhow::bail!("Database user must be set");
        }
        if !SSL_MODES.contains(&db.ssl_mode.as_str()) {
            anyhow::bail!("Database ssl_mode must be one of {}", SSL_MODES.join(", "));
        }
        if db.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        match &db.auth {
            DatabaseAuth::Iam { .. } => {
                self.database.region()?;
            }
            DatabaseAuth::Password { password } if password.is_empty() => {
                anyhow::bail!("Database password must be set when auth mode is 'password'");
            }
            DatabaseAuth::Password { .. } => {}
        }

        Ok(())
    }

    /// Per-request deadline, if any
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.requests.timeout_ms > 0).then(|| Duration::from_millis(self.requests.timeout_ms))
    }
}

impl DatabaseSection {
    /// IAM signing region from the file or `AWS_REGION`
    pub fn region(&self) -> Result<String> {
        let configured = match &self.auth {
            DatabaseAuth::Iam { region } => region.clone(),
            DatabaseAuth::Password { .. } => None,
        };
        configured
            .filter(|r| !r.is_empty())
            .or_else(|| std::env::var("AWS_REGION").ok().filter(|r| !r.is_empty()))
            .context("IAM auth requires database.auth.region or AWS_REGION")
    }

    /// Password source for new connections
    pub fn password_source(&self) -> Result<Arc<dyn PasswordSource>> {
        let source: Arc<dyn PasswordSource> = match &self.auth {
            DatabaseAuth::Iam { .. } => Arc::new(CredentialProvider::new(RdsIamTokenSource::new(
                self.host.clone(),
                self.port,
                self.user.clone(),
                self.region()?,
            ))),
            DatabaseAuth::Password { password } => Arc::new(StaticPassword::new(password.clone())),
        };
        Ok(source)
    }

    /// Pool settings for tenant pools
    #[cfg(feature = "postgres")]
    pub fn pool_settings(&self) -> Result<crate::tenant::PoolSettings> {
        let ssl_mode = self
            .ssl_mode
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid ssl_mode {}: {}", self.ssl_mode, e))?;
        let optional = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

        Ok(crate::tenant::PoolSettings {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            ssl_mode,
            application_name: self.application_name.clone(),
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            idle_timeout: optional(self.idle_timeout_secs),
            max_lifetime: optional(self.max_lifetime_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWORD_CONFIG: &str = r#"
        [server]
        port = 9000

        [database]
        host = "db.internal"
        user = "permissions"
        ssl_mode = "disable"

        [database.auth]
        mode = "password"
        password = "local"
    "#;

    #[test]
    fn test_defaults_applied() {
        let config = ServiceConfig::parse(PASSWORD_CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.application_name, "tenant-permissions");
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(10000)));
    }

    #[test]
    fn test_iam_region_from_file() {
        let config = ServiceConfig::parse(
            r#"
            [database]
            host = "db.internal"
            user = "permissions"

            [database.auth]
            mode = "iam"
            region = "eu-west-2"
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.database.region().unwrap(), "eu-west-2");
        assert!(config.database.password_source().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ServiceConfig::parse(PASSWORD_CONFIG).unwrap();
        config.database.ssl_mode = "sometimes".into();
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::parse(PASSWORD_CONFIG).unwrap();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::parse(PASSWORD_CONFIG).unwrap();
        config.database.auth = DatabaseAuth::Password {
            password: String::new(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_auth_mode_rejected() {
        let result = ServiceConfig::parse(
            r#"
            [database]
            host = "db"
            user = "u"

            [database.auth]
            mode = "kerberos"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_password_hidden_from_debug() {
        let config = ServiceConfig::parse(PASSWORD_CONFIG).unwrap();
        assert!(!format!("{:?}", config).contains("local"));
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let mut config = ServiceConfig::parse(PASSWORD_CONFIG).unwrap();
        config.requests.timeout_ms = 0;
        assert_eq!(config.request_timeout(), None);
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_pool_settings() {
        let config = ServiceConfig::parse(PASSWORD_CONFIG).unwrap();
        let settings = config.database.pool_settings().unwrap();
        assert_eq!(settings.host, "db.internal");
        assert_eq!(settings.max_connections, 10);
        assert_eq!(settings.idle_timeout, Some(Duration::from_secs(600)));
    }
}
