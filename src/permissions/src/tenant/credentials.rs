//! Database credentials
//!
//! [`CredentialProvider`] caches a short-lived token from a [`TokenSource`] and
//! fetches a new one only once the cached token has expired. The expiry is
//! read from the token itself: IAM database tokens are presigned URLs that
//! carry their issue time (`X-Amz-Date`) and lifetime (`X-Amz-Expires`).
//!
//! Refresh is single-flight and publishes a complete token/expiry pair in one
//! write, so concurrent readers never observe a torn state.

use crate::error::{PermissionsError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime requested for IAM database tokens
pub const IAM_TOKEN_TTL_SECS: u64 = 900;

const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const SIGNING_SERVICE: &str = "rds-db";

/// Password used by each new database connection
#[async_trait]
pub trait PasswordSource: Send + Sync {
    async fn password(&self) -> Result<String>;
}

/// Issues fresh authentication tokens (network call in production)
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<String>;
}

/// Fixed password for deployments without IAM authentication
#[derive(Clone)]
pub struct StaticPassword(String);

impl StaticPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }
}

impl std::fmt::Debug for StaticPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticPassword(..)")
    }
}

#[async_trait]
impl PasswordSource for StaticPassword {
    async fn password(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires: DateTime<Utc>,
}

/// Caching wrapper around a [`TokenSource`]
pub struct CredentialProvider<S> {
    source: S,
    cached: RwLock<Option<Arc<CachedToken>>>,
    refresh: Mutex<()>,
}

impl<S: TokenSource> CredentialProvider<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Current token, fetching a new one if none is cached or it has expired
    pub async fn token(&self) -> Result<String> {
        if let Some(token) = self.valid_at(Utc::now()) {
            return Ok(token);
        }

        let _refresh = self.refresh.lock().await;
        // A concurrent caller may have refreshed while we waited
        if let Some(token) = self.valid_at(Utc::now()) {
            return Ok(token);
        }

        let token = self.source.fetch_token().await?;
        let expires = token_expiry(&token)?;
        debug!(expires = %expires, "Refreshed database auth token");

        *self.cached.write() = Some(Arc::new(CachedToken {
            token: token.clone(),
            expires,
        }));
        Ok(token)
    }

    /// Expiry of the cached token, if any
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.cached.read().as_ref().map(|c| c.expires)
    }

    fn valid_at(&self, now: DateTime<Utc>) -> Option<String> {
        let cached = self.cached.read().clone()?;
        (cached.expires > now).then(|| cached.token.clone())
    }
}

#[async_trait]
impl<S: TokenSource> PasswordSource for CredentialProvider<S> {
    async fn password(&self) -> Result<String> {
        self.token().await
    }
}

/// Compute a token's expiry from its embedded issue time and lifetime
pub fn token_expiry(token: &str) -> Result<DateTime<Utc>> {
    let url = if token.contains("://") {
        Url::parse(token)
    } else {
        Url::parse(&format!("https://{}", token))
    }
    .map_err(|e| PermissionsError::Credential(format!("parse token: {}", e)))?;

    let mut issued = None;
    let mut ttl = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "X-Amz-Date" => issued = Some(parse_amz_date(&value)?),
            "X-Amz-Expires" => {
                let invalid =
                    || PermissionsError::Credential(format!("invalid X-Amz-Expires: {}", value));
                let secs: i64 = value.parse().map_err(|_| invalid())?;
                if secs <= 0 {
                    return Err(invalid());
                }
                ttl = Some(chrono::Duration::try_seconds(secs).ok_or_else(invalid)?);
            }
            _ => {}
        }
    }

    let issued =
        issued.ok_or_else(|| PermissionsError::Credential("token missing X-Amz-Date".into()))?;
    let ttl =
        ttl.ok_or_else(|| PermissionsError::Credential("token missing X-Amz-Expires".into()))?;
    issued
        .checked_add_signed(ttl)
        .ok_or_else(|| PermissionsError::Credential("token expiry out of range".into()))
}

fn parse_amz_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, AMZ_DATE_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| PermissionsError::Credential(format!("invalid X-Amz-Date: {}", value)))
}

/// AWS signing credentials
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Read the standard `AWS_*` environment variables
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let access_key_id = var("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| PermissionsError::Credential("AWS_ACCESS_KEY_ID not set".into()))?;
        let secret_access_key = var("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| PermissionsError::Credential("AWS_SECRET_ACCESS_KEY not set".into()))?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: var("AWS_SESSION_TOKEN"),
        })
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// Generates RDS IAM authentication tokens (SigV4 presigned `connect` URLs)
#[derive(Debug, Clone)]
pub struct RdsIamTokenSource {
    host: String,
    port: u16,
    user: String,
    region: String,
    credentials: Option<AwsCredentials>,
}

impl RdsIamTokenSource {
    /// Token source that reads signing credentials from the environment on each fetch
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            region: region.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Build a token signed at `now`
    pub fn presign(&self, credentials: &AwsCredentials, now: DateTime<Utc>) -> Result<String> {
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, SIGNING_SERVICE);
        let endpoint = format!("{}:{}", self.host, self.port);

        let mut params = vec![
            ("Action", "connect".to_string()),
            ("DBUser", self.user.clone()),
            ("X-Amz-Algorithm", "AWS4-HMAC-SHA256".to_string()),
            (
                "X-Amz-Credential",
                format!("{}/{}", credentials.access_key_id, scope),
            ),
            ("X-Amz-Date", amz_date.clone()),
            ("X-Amz-Expires", IAM_TOKEN_TTL_SECS.to_string()),
            ("X-Amz-SignedHeaders", "host".to_string()),
        ];
        if let Some(session_token) = &credentials.session_token {
            params.push(("X-Amz-Security-Token", session_token.clone()));
        }
        params.sort_by(|a, b| a.0.cmp(b.0));

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "GET\n/\n{}\nhost:{}\n\nhost\n{}",
            query,
            endpoint,
            hex::encode(Sha256::digest(b""))
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let secret = format!("AWS4{}", credentials.secret_access_key);
        let k_date = hmac(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac(&k_date, self.region.as_bytes())?;
        let k_service = hmac(&k_region, SIGNING_SERVICE.as_bytes())?;
        let k_signing = hmac(&k_service, b"aws4_request")?;
        let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

        Ok(format!(
            "{}/?{}&X-Amz-Signature={}",
            endpoint, query, signature
        ))
    }
}

#[async_trait]
impl TokenSource for RdsIamTokenSource {
    async fn fetch_token(&self) -> Result<String> {
        let credentials = match &self.credentials {
            Some(credentials) => credentials.clone(),
            None => AwsCredentials::from_env()?,
        };
        self.presign(&credentials, Utc::now())
    }
}

/// RFC 3986 unreserved characters pass through; everything else is encoded
fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| PermissionsError::Credential(format!("signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn credentials() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        }
    }

    fn source() -> RdsIamTokenSource {
        RdsIamTokenSource::new("db.example.internal", 5432, "app_user", "eu-west-2")
    }

    /// Issues tokens dated `offset_secs` from now, counting fetches
    struct DatedSource {
        offset_secs: i64,
        fetches: AtomicUsize,
    }

    impl DatedSource {
        fn new(offset_secs: i64) -> Self {
            Self {
                offset_secs,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TokenSource for DatedSource {
        async fn fetch_token(&self) -> Result<String> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            let issued = Utc::now() + chrono::Duration::seconds(self.offset_secs);
            Ok(format!(
                "db:5432/?Action=connect&X-Amz-Date={}&X-Amz-Expires=900&n={}",
                issued.format(AMZ_DATE_FORMAT),
                n
            ))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TokenSource for FailingSource {
        async fn fetch_token(&self) -> Result<String> {
            Err(PermissionsError::Credential("sts unavailable".into()))
        }
    }

    #[test]
    fn test_expiry_from_amz_date() {
        let token = "db:5432/?Action=connect&X-Amz-Date=20240115T103000Z&X-Amz-Expires=900";
        let expires = token_expiry(token).unwrap();
        assert_eq!(expires.to_rfc3339(), "2024-01-15T10:45:00+00:00");
    }

    #[test]
    fn test_expiry_accepts_rfc3339() {
        let token = "db:5432/?X-Amz-Date=2024-01-15T10%3A30%3A00Z&X-Amz-Expires=60";
        let expires = token_expiry(token).unwrap();
        assert_eq!(expires.to_rfc3339(), "2024-01-15T10:31:00+00:00");
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert!(token_expiry("db:5432/?X-Amz-Expires=900").is_err());
        assert!(token_expiry("db:5432/?X-Amz-Date=20240115T103000Z").is_err());
        assert!(token_expiry("db:5432/?X-Amz-Date=yesterday&X-Amz-Expires=900").is_err());
        assert!(token_expiry("db:5432/?X-Amz-Date=20240115T103000Z&X-Amz-Expires=soon").is_err());
    }

    #[test]
    fn test_out_of_range_lifetimes_rejected() {
        for expires in ["9223372036854775807", "9223372036854775", "0", "-900"] {
            let token = format!(
                "db:5432/?X-Amz-Date=20240115T103000Z&X-Amz-Expires={}",
                expires
            );
            let err = token_expiry(&token).unwrap_err();
            assert!(
                matches!(err, PermissionsError::Credential(_)),
                "X-Amz-Expires={} gave {:?}",
                expires,
                err
            );
        }
    }

    #[test]
    fn test_presigned_token_shape() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let token = source().presign(&credentials(), now).unwrap();

        assert!(token.starts_with("db.example.internal:5432/?Action=connect&DBUser=app_user&"));
        assert!(token.contains(
            "X-Amz-Credential=AKIDEXAMPLE%2F20240115%2Feu-west-2%2Frds-db%2Faws4_request"
        ));
        assert!(token.contains("X-Amz-SignedHeaders=host"));

        let signature = token.rsplit("X-Amz-Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(
            token_expiry(&token).unwrap(),
            now + chrono::Duration::seconds(900)
        );
    }

    #[test]
    fn test_presign_is_deterministic_and_key_dependent() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let a = source().presign(&credentials(), now).unwrap();
        let b = source().presign(&credentials(), now).unwrap();
        assert_eq!(a, b);

        let mut other = credentials();
        other.secret_access_key = "different".into();
        assert_ne!(a, source().presign(&other, now).unwrap());
    }

    #[test]
    fn test_session_token_included() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let mut creds = credentials();
        creds.session_token = Some("tok/en+".into());
        let token = source().presign(&creds, now).unwrap();
        assert!(token.contains("X-Amz-Security-Token=tok%2Fen%2B"));
    }

    #[tokio::test]
    async fn test_token_cached_until_expiry() {
        let provider = CredentialProvider::new(DatedSource::new(0));

        let first = provider.token().await.unwrap();
        let second = provider.token().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.source.fetches.load(Ordering::SeqCst), 1);
        assert!(provider.expires_at().unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_expired_token_refreshed() {
        // Issued 20 minutes ago with a 15 minute lifetime
        let provider = CredentialProvider::new(DatedSource::new(-1200));

        let first = provider.token().await.unwrap();
        let second = provider.token().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(provider.source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_fetches_once() {
        let provider = Arc::new(CredentialProvider::new(DatedSource::new(0)));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move { provider.token().await.unwrap() }));
        }
        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap());
        }

        assert_eq!(provider.source.fetches.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces() {
        let provider = CredentialProvider::new(FailingSource);
        let err = provider.password().await.unwrap_err();
        assert!(matches!(err, PermissionsError::Credential(_)));
        assert!(provider.expires_at().is_none());
    }

    #[tokio::test]
    async fn test_static_password() {
        let password = StaticPassword::new("secret");
        assert_eq!(password.password().await.unwrap(), "secret");
        assert_eq!(format!("{:?}", password), "StaticPassword(..)");
    }
}
