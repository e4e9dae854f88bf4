//! Webhook endpoint handler.
//!
//! Verifies the delivery's signature, then hands `pull_request` events to
//! the orchestrator. The work itself runs on the queue; the response only
//! says whether the event was accepted.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::queue::QueueError;
use crate::webhooks::{ParseError, parse_pull_request_event, verify_signature};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Invalid signature.
    #[error("invalid signature")]
    InvalidSignature,

    /// The `pull_request` payload could not be read.
    #[error("invalid pull_request payload: {0}")]
    InvalidPayload(#[from] ParseError),

    /// The orchestrator is shutting down.
    #[error("{0}")]
    Unavailable(#[from] QueueError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Response
///
/// - 202 Accepted: `pull_request` event queued, or an event that needs no
///   work (other event types, irrelevant actions)
/// - 200 OK: `ping`
/// - 400 Bad Request: missing header or unreadable `pull_request` payload
/// - 401 Unauthorized: invalid signature
/// - 503 Service Unavailable: shutting down
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let delivery_id = get_header(&headers, HEADER_DELIVERY)?;
    let signature_header = get_header(&headers, HEADER_SIGNATURE)?;

    debug!(
        delivery_id = %delivery_id,
        event_type = %event_type,
        "Received webhook"
    );

    // Verify before parsing anything.
    if !verify_signature(&body, &signature_header, app_state.webhook_secret()) {
        warn!(delivery_id = %delivery_id, "Invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    match event_type.as_str() {
        "ping" => Ok((StatusCode::OK, "pong")),
        "pull_request" => {
            let Some(event) = parse_pull_request_event(&body)? else {
                debug!(delivery_id = %delivery_id, "Ignoring pull_request action");
                return Ok((StatusCode::ACCEPTED, "Ignored"));
            };
            info!(
                delivery_id = %delivery_id,
                pr = %event.number(),
                action = event.action.as_str(),
                "Routing pull_request event"
            );
            // The outcome is reported on the PR; nobody waits for it here.
            app_state.orchestrator().handle_event(event).await?;
            Ok((StatusCode::ACCEPTED, "Accepted"))
        }
        _ => {
            debug!(delivery_id = %delivery_id, event_type = %event_type, "Ignoring event");
            Ok((StatusCode::ACCEPTED, "Ignored"))
        }
    }
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}
