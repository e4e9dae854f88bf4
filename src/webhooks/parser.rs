//! `pull_request` webhook payload parser.
//!
//! Hosts are not consistent about what a delivery carries: `number` may sit at
//! the top level or only inside `pull_request`, `merged` likewise, and
//! `head.sha` is occasionally missing or not a string. The parser accepts all
//! of these shapes and fails only when it cannot tell which PR or branch the
//! delivery is about.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{PrNumber, PullRequestRef, Sha};

use super::events::{PrAction, PullRequestEvent};

/// Error type for webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes a wrongly-typed required field).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A field needed to identify the PR is absent.
    #[error("missing required field {0}")]
    MissingField(&'static str),
}

/// Just enough of a delivery to decide whether it needs parsing at all.
#[derive(Debug, Deserialize)]
struct RawAction {
    action: String,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    number: Option<u64>,
    merged: Option<bool>,
    pull_request: RawPullRequest,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: Option<u64>,
    merged: Option<bool>,
    head: RawHead,
}

#[derive(Debug, Deserialize)]
struct RawHead {
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    // Kept loose: some senders put a number (or nothing) here.
    sha: Option<serde_json::Value>,
}

/// Parses a `pull_request` webhook payload.
///
/// Returns `Ok(None)` for actions the orchestrator does not act on.
///
/// # Examples
///
/// ```
/// use pr_apps::webhooks::{parse_pull_request_event, PrAction};
///
/// let payload = br#"{
///     "action": "opened",
///     "number": 23,
///     "pull_request": { "head": { "ref": "Feature1", "sha": "abc123" } }
/// }"#;
///
/// let event = parse_pull_request_event(payload).unwrap().unwrap();
/// assert_eq!(event.action, PrAction::Opened);
/// assert_eq!(event.pr.branch, "Feature1");
/// ```
pub fn parse_pull_request_event(payload: &[u8]) -> Result<Option<PullRequestEvent>, ParseError> {
    let RawAction { action } = serde_json::from_slice(payload)?;
    let Some(action) = PrAction::from_wire(&action) else {
        return Ok(None);
    };

    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;

    let number = raw
        .number
        .or(raw.pull_request.number)
        .ok_or(ParseError::MissingField("number"))?;

    let branch = raw
        .pull_request
        .head
        .ref_name
        .ok_or(ParseError::MissingField("pull_request.head.ref"))?;

    let head = match raw.pull_request.head.sha {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(Sha::new(s)),
        _ => None,
    };

    let merged = raw.merged.or(raw.pull_request.merged).unwrap_or(false);

    Ok(Some(PullRequestEvent {
        action,
        pr: PullRequestRef::new(PrNumber(number), branch, head),
        merged,
    }))
}
