//! topogrid-workload: the stub service the topology runs.
//!
//! It honours the contract the compute service is built around: a probe
//! route that succeeds only once the process is ready, one plain
//! environment binding and one injected secret, and a fixed port.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | `200 {"status":"ok"}` once ready, `503` before |
//! | GET | `/` | `{"message":"Hello from <SERVICE_NAME>!"}` |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use axum::routing::get;
use serde::Serialize;

/// Port the load balancer's target groups forward to.
pub const CONTAINER_PORT: u16 = 8000;

pub const SERVICE_NAME_ENV: &str = "SERVICE_NAME";
pub const SECRET_ENV: &str = "APP_SECRET";

const DEFAULT_SERVICE_NAME: &str = "sample-service";

/// Bindings read from the environment at startup.
#[derive(Clone)]
pub struct WorkloadConfig {
    pub service_name: String,
    /// Never logged or returned.
    secret: Option<String>,
}

impl WorkloadConfig {
    pub fn new(service_name: &str, secret: Option<String>) -> Self {
        Self {
            service_name: service_name.to_string(),
            secret,
        }
    }

    pub fn from_env() -> Self {
        let service_name =
            std::env::var(SERVICE_NAME_ENV).unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());
        let secret = std::env::var(SECRET_ENV).ok().filter(|s| !s.is_empty());
        Self::new(&service_name, secret)
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }
}

// Hand-written so the secret cannot leak through `{:?}`.
impl std::fmt::Debug for WorkloadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadConfig")
            .field("service_name", &self.service_name)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: WorkloadConfig,
    ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: WorkloadConfig) -> Self {
        Self {
            config,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct Greeting {
    message: String,
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, Json(Health { status: "ok" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Health { status: "starting" }),
        )
    }
}

pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(Greeting {
        message: format!("Hello from {}!", state.config.service_name),
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(root))
        .with_state(state)
}
