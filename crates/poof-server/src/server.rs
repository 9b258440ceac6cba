use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, HeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn};

use crate::{
    handlers::{create_text, get_text, health, missing_id},
    store::{MemoryStore, RedbStore, RedisStore, SecretStore, StoreBackend},
    vault::Vault,
    AppState,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

pub struct ServerConfig {
    /// Service name for logs and `/health` ($APP_NAME).
    pub app_name: String,
    pub host: String,
    pub port: u16,
    /// Deployment tag, e.g. `development` or `production` ($ENVIRONMENT).
    pub environment: String,
    /// Tracing filter directive ($LOG_LEVEL).
    pub log_level: String,
    /// Deadline for a whole request ($REQUEST_TIMEOUT, seconds).
    pub request_timeout: Duration,
    pub backend: StoreBackend,
    pub redis_url: String,
    /// Directory for the redb file when `backend` is redb ($DATA_DIR).
    pub data_dir: Option<PathBuf>,
    /// How often the redb backend drops expired entries ($SWEEP_INTERVAL, seconds).
    pub sweep_interval: Duration,
    /// Passphrase the encryption key is derived from. Empty disables the text endpoints.
    pub encryption_key: String,
    pub cors_origins: Option<String>,
}

/// An environment variable, with empty values treated as unset.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_var(name).unwrap_or_else(|| default.into())
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        env_var(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_name: env_or("APP_NAME", "poof-api"),
            host: env_or("HOST", "0.0.0.0"),
            port: env_var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            environment: env_or("ENVIRONMENT", "development"),
            log_level: env_or("LOG_LEVEL", "info"),
            request_timeout: env_secs("REQUEST_TIMEOUT", 10),
            backend: StoreBackend::Redis,
            redis_url: env_or("REDIS_URL", "redis://localhost:6379"),
            data_dir: env_var("DATA_DIR").map(PathBuf::from),
            sweep_interval: env_secs("SWEEP_INTERVAL", 60),
            encryption_key: String::new(),
            cors_origins: env_var("CORS_ORIGINS"),
        }
    }
}

impl ServerConfig {
    /// Full configuration from the environment, including the store backend
    /// and the encryption passphrase.
    pub fn from_env() -> Result<Self> {
        let backend = match env_var("STORE_BACKEND") {
            Some(name) => StoreBackend::parse(&name)
                .with_context(|| format!("unknown STORE_BACKEND '{name}' (redis, redb, memory)"))?,
            None => StoreBackend::Redis,
        };
        Ok(Self {
            backend,
            encryption_key: resolve_encryption_key()?,
            ..Default::default()
        })
    }
}

/// Read a passphrase from a file, trimming surrounding whitespace.
/// Fails if the file cannot be read or is empty after trimming.
pub fn read_key_file(path: &std::path::Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read key file: {}", path.display()))?;
    let key = content.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("key file is empty: {}", path.display());
    }
    Ok(key)
}

/// Resolve the passphrase from `ENCRYPTION_KEY_FILE` (preferred) or `ENCRYPTION_KEY`.
/// Neither being set yields an empty passphrase, which the vault refuses to use.
pub fn resolve_encryption_key() -> Result<String> {
    if let Some(path) = env_var("ENCRYPTION_KEY_FILE") {
        let key = read_key_file(std::path::Path::new(&path))?;
        if env_var("ENCRYPTION_KEY").is_some() {
            warn!("both ENCRYPTION_KEY and ENCRYPTION_KEY_FILE are set; using file");
        }
        return Ok(key);
    }
    Ok(env_var("ENCRYPTION_KEY").unwrap_or_default())
}

async fn open_store(cfg: &ServerConfig) -> Result<Arc<dyn SecretStore>> {
    let store: Arc<dyn SecretStore> = match cfg.backend {
        StoreBackend::Redis => Arc::new(RedisStore::connect(&cfg.redis_url)?),
        StoreBackend::Redb => {
            let dir = crate::dirs::data_dir(cfg.data_dir.as_deref())?;
            info!(data_dir = %dir.display(), "using data directory");
            let store = RedbStore::open(&dir.join("poof.redb")).context("open store")?;
            store.clone().spawn_sweep(cfg.sweep_interval);
            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("memory store selected; entries are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    store
        .ping()
        .await
        .with_context(|| format!("{} store is not reachable", cfg.backend))?;
    info!(backend = %cfg.backend, "connected to store");
    Ok(store)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    info!(
        service = %cfg.app_name,
        environment = %cfg.environment,
        log_level = %cfg.log_level,
        "starting server"
    );

    let store = open_store(&cfg).await?;

    let vault = Vault::with_store_counters(store, &cfg.encryption_key);
    if !vault.has_key() {
        warn!("ENCRYPTION_KEY is not set; /text endpoints will fail until it is configured");
    }

    let state = AppState {
        vault: Arc::new(vault),
        service: cfg.app_name.as_str().into(),
    };

    let app = build_router(state, cfg.cors_origins.as_deref(), cfg.request_timeout);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "poof server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("server exited");
    Ok(())
}

/// Routes plus the middleware stack: request ids, tracing, CORS, panic
/// recovery and a per-request deadline.
pub fn build_router(state: AppState, cors_origins: Option<&str>, timeout: Duration) -> Router {
    let routes = Router::new()
        .route("/health", get(health))
        .route("/text", post(create_text))
        .route("/text/", get(missing_id))
        .route("/text/{id}", get(get_text))
        .with_state(state);
    with_middleware(routes, cors_origins, timeout)
}

fn with_middleware(routes: Router, cors_origins: Option<&str>, timeout: Duration) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    routes
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TimeoutLayer::new(timeout))
        .layer(build_cors(cors_origins))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            let request_id = req
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            let addr = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr);
            info_span!(
                "request",
                method = %req.method(),
                path = %req.uri().path(),
                ip = %client_ip(req.headers(), addr),
                request_id = %request_id,
            )
        }))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

/// A panicking handler becomes a plain 500; the payload only goes to the log.
fn panic_response(payload: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    error!(panic = %detail, "handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}

/// Best guess at the caller's address: proxy headers first, then the socket peer.
fn client_ip(headers: &HeaderMap, addr: Option<SocketAddr>) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_owned();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let trimmed = real_ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_owned();
        }
    }
    addr.map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn explode() -> &'static str {
        panic!("handler blew up")
    }

    #[tokio::test]
    async fn panicking_handler_returns_500() {
        let app = with_middleware(
            Router::new().route("/explode", get(explode)),
            None,
            Duration::from_secs(5),
        );
        let req = Request::builder()
            .uri("/explode")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.headers().contains_key(REQUEST_ID_HEADER));

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"error": "internal server error"}));
    }

    #[test]
    fn empty_env_values_fall_back_to_defaults() {
        std::env::set_var("POOF_TEST_BLANK_SETTING", "");
        std::env::set_var("POOF_TEST_SET_SETTING", "custom");
        std::env::set_var("POOF_TEST_BLANK_SECONDS", "");

        assert_eq!(env_var("POOF_TEST_BLANK_SETTING"), None);
        assert_eq!(env_or("POOF_TEST_BLANK_SETTING", "fallback"), "fallback");
        assert_eq!(env_or("POOF_TEST_SET_SETTING", "fallback"), "custom");
        assert_eq!(
            env_secs("POOF_TEST_BLANK_SECONDS", 10),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn key_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, "  s3cret-passphrase\n").unwrap();
        assert_eq!(read_key_file(&path).unwrap(), "s3cret-passphrase");
    }

    #[test]
    fn empty_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, " \n\t").unwrap();
        assert!(read_key_file(&path).is_err());
        assert!(read_key_file(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn client_ip_prefers_proxy_headers() {
        let peer: SocketAddr = "10.1.2.3:5555".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "10.1.2.3");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-real-ip", "192.0.2.7".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.7");

        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.9");
    }
}
