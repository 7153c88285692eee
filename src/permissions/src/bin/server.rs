//! # Permissions HTTP Server
//!
//! Serves resolved user permissions to policy engines.
//!
//! ## Endpoints
//!
//! - `POST /v1/permissions` - Roles, overrides, resources and role graph for a user
//! - `GET /health` - Health check
//!
//! ## Configuration
//!
//! A TOML file (`--config`, env `PERMISSIONS_CONFIG`); `RUST_LOG` overrides
//! the configured log level. IAM auth reads the standard `AWS_*` variables.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    serve, Router,
};
use clap::Parser;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tenant_permissions::{
    config::ServiceConfig,
    tenant::{PgTenantConnector, TenantRegistry},
    PermissionService, PermissionsError, PermissionsRequest, PermissionsResponse,
    PostgresPermissionStore,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Permissions server CLI
#[derive(Parser)]
#[command(name = "permissions-server")]
#[command(about = "Tenant-aware user permission resolution service")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/permissions/server.toml", env = "PERMISSIONS_CONFIG")]
    config: PathBuf,

    /// Override listen host
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Override listen port
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: PermissionService,
    start_time: std::time::Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error type
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Resolution(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Resolution(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "resolution_error",
                msg,
            ),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<PermissionsError> for AppError {
    fn from(err: PermissionsError) -> Self {
        if err.is_context_error() {
            AppError::BadRequest(err.to_string())
        } else {
            AppError::Resolution(err.to_string())
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
}

/// POST /v1/permissions - Resolve permissions for a user
async fn get_permissions(
    State(state): State<AppState>,
    Json(req): Json<PermissionsRequest>,
) -> Result<Json<PermissionsResponse>, AppError> {
    let request = req.into_request()?;

    info!(
        tenant = %request.tenant,
        user = %request.user,
        "Permissions request"
    );

    let for_user = state
        .service
        .get_for_user(&request, &CancellationToken::new())
        .await
        .map_err(|e| {
            error!(tenant = %request.tenant, user = %request.user, error = %e, "Permissions request failed");
            e
        })?;

    Ok(Json(PermissionsResponse::new(
        &request.tenant,
        &request.user,
        Some(&for_user),
    )))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: tenant_permissions::VERSION.to_string(),
    })
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/v1/permissions", post(get_permissions))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(trace))
        .with_state(state)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

fn build_service(config: &ServiceConfig) -> Result<PermissionService> {
    let connector = PgTenantConnector::new(
        config.database.pool_settings()?,
        config.database.password_source()?,
    );
    let registry = Arc::new(TenantRegistry::new(connector));
    let store = PostgresPermissionStore::new(registry);

    let service = PermissionService::new(Arc::new(store));
    Ok(match config.request_timeout() {
        Some(timeout) => service.with_timeout(timeout),
        None => service,
    })
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ServiceConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.validate()?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.server.log_level.as_str()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Permissions Server v{}", tenant_permissions::VERSION);
    info!("Configuration:");
    info!("  Database: {}:{}", config.database.host, config.database.port);
    info!("  Auth: {:?}", config.database.auth);
    info!("  Request timeout: {:?}", config.request_timeout());

    let state = AppState {
        service: build_service(&config)?,
        start_time: std::time::Instant::now(),
    };

    let host = cli.host.unwrap_or_else(|| config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {}", addr))?;
    info!("Starting HTTP server on {}", addr);

    serve(listener, create_router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server shut down gracefully");
    Ok(())
}
