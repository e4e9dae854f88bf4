//! HTTP server for pr-apps.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub webhook deliveries and routes pull
//!   request events to the orchestrator
//! - `GET /deployments/{id}` - Returns a deployment and its log as JSON
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

pub mod deployments;
pub mod health;
pub mod webhook;

pub use deployments::deployment_handler;
pub use health::health_handler;
pub use webhook::webhook_handler;

use crate::orchestrator::Orchestrator;
use crate::tracker::DeploymentStore;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    orchestrator: Arc<Orchestrator>,

    /// Where deployment records are read from for the log endpoint.
    store: Arc<dyn DeploymentStore>,

    /// Webhook secret for HMAC-SHA256 signature verification.
    webhook_secret: Vec<u8>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn DeploymentStore>,
        webhook_secret: impl Into<Vec<u8>>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                orchestrator,
                store,
                webhook_secret: webhook_secret.into(),
            }),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner.orchestrator
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.inner.store
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/deployments/{id}", get(deployment_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
