pub mod builder;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod notify;
pub mod publish;
pub mod request;
pub mod source;
pub mod utils;

use axum::{Router, routing};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use crate::config::RelayConfig;
use crate::publish::Publisher;

pub struct AppState {
    pub publisher: Publisher,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// State backed by git, the configured build command and the GitHub API.
    pub fn new(config: RelayConfig) -> Self {
        Self::with_publisher(Publisher::from_config(Arc::new(config)))
    }

    pub fn with_publisher(publisher: Publisher) -> Self {
        Self {
            publisher,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

/// `/` accepts any method and runs a publish; `/status` reports liveness.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::any(handlers::publish))
        .route("/status", routing::get(handlers::status))
        .with_state(state)
}
