//!
//! sessiongate HTTP server
//! -----------------------
//! Axum router binding cookie sessions to query resolution.
//!
//! Responsibilities:
//! - Session binder middleware on every route (load/create, settle, Set-Cookie).
//! - `POST /graphql` executing an operation envelope against the field registry.
//! - Background sweeper for idle sessions.
//! - Startup logging of the effective configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::identity::{AuthController, CredentialVerifier, FileCredentialStore, MemorySessionStore, RequestContext, SessionStore};

pub mod binder;
pub mod schema;

pub use binder::CookieSettings;
use schema::{Operation, ResolveError, Schema};

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub auth: AuthController,
    pub schema: Arc<Schema>,
    pub cookie: CookieSettings,
}

impl AppState {
    pub fn new(store: Arc<dyn SessionStore>, verifier: Arc<dyn CredentialVerifier>, cfg: &GatewayConfig) -> Self {
        Self {
            auth: AuthController::new(verifier, store.clone(), cfg.verify_timeout),
            store,
            schema: Arc::new(Schema::standard()),
            cookie: CookieSettings { name: cfg.cookie_name.clone(), secure: cfg.cookie_secure },
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "sessiongate ok" }))
        .route("/graphql", post(graphql_handler))
        .fallback(|| async { AppError::not_found("no_route", "no such route") })
        .layer(middleware::from_fn_with_state(state.clone(), binder::bind_session))
        .with_state(state)
}

async fn graphql_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<Operation>, JsonRejection>,
) -> Response {
    let Json(op) = match payload {
        Ok(p) => p,
        Err(rej) => return AppError::user("bad_request".to_string(), rej.body_text()).into_response(),
    };
    match state.schema.execute(&state.auth, &ctx, op).await {
        Ok(result) => Json(result).into_response(),
        Err(ResolveError::SessionUnavailable(msg)) => {
            error!(target: "http", request_id = ctx.request_id(), "request aborted: {}", msg);
            AppError::unavailable("session_unavailable".to_string(), msg).into_response()
        }
        Err(e @ ResolveError::Field(_)) => AppError::user("bad_request".to_string(), e.to_string()).into_response(),
    }
}

/// Periodically drop idle sessions nobody asked for again.
pub fn spawn_sweeper(store: Arc<dyn SessionStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = store.sweep_expired();
            if removed > 0 { tracing::debug!(target: "session", removed = removed, "session_sweep"); }
        }
    })
}

fn log_startup(cfg: &GatewayConfig) {
    info!(
        target: "startup",
        "sessiongate starting: bind={} port={} users_file={:?} session_idle_secs={} sweep={:?} cookie={} secure_cookie={}",
        cfg.bind,
        cfg.http_port,
        cfg.users_file,
        cfg.session_idle.as_secs(),
        cfg.sweep_interval,
        cfg.cookie_name,
        cfg.cookie_secure
    );
    if !cfg.users_file.exists() {
        warn!(target: "startup", "credential file {:?} does not exist; every login will fail", cfg.users_file);
    }
}

/// Start the gateway with the given configuration and serve until the listener fails.
pub async fn run_with_config(cfg: GatewayConfig) -> anyhow::Result<()> {
    log_startup(&cfg);

    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(cfg.session_idle));
    match cfg.sweep_interval {
        Some(every) => { spawn_sweeper(store.clone(), every); }
        None => info!(target: "startup", "session sweeper disabled; expiry is checked on access"),
    }
    let verifier = Arc::new(FileCredentialStore::new(&cfg.users_file));
    let app = router(AppState::new(store, verifier, &cfg));

    let addr = SocketAddr::new(cfg.bind, cfg.http_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(target: "startup", "listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Convenience entry point using configuration from the environment.
pub async fn run() -> anyhow::Result<()> {
    let cfg = GatewayConfig::from_env()?;
    run_with_config(cfg).await
}
