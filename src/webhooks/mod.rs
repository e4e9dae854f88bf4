//! Webhook handling for source-host events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - Parsing of `pull_request` deliveries into typed events

pub mod events;
pub mod parser;
pub mod signature;

pub use events::{PrAction, PullRequestEvent};
pub use parser::{ParseError, parse_pull_request_event};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_signature,
};
