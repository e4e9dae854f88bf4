//! Deployment log endpoint.
//!
//! The log URL reported on each deployment status points here.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::AppState;
use crate::tracker::{DeploymentStore, StoreError};
use crate::types::{Deployment, DeploymentId};

/// Errors that can occur when fetching a deployment.
#[derive(Debug, Error)]
pub enum DeploymentLookupError {
    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for DeploymentLookupError {
    fn into_response(self) -> Response {
        let status = match &self {
            DeploymentLookupError::NotFound(_) => StatusCode::NOT_FOUND,
            DeploymentLookupError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Returns a deployment with its log chunks as JSON.
///
/// An id that is not a UUID is reported as not found.
pub async fn deployment_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>, DeploymentLookupError> {
    let Some(parsed) = DeploymentId::parse(&id) else {
        return Err(DeploymentLookupError::NotFound(id));
    };
    app_state
        .store()
        .get(&parsed)
        .await?
        .map(Json)
        .ok_or(DeploymentLookupError::NotFound(id))
}
