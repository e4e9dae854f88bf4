//! Source-host adapter (GitHub via octocrab).
//!
//! Implements [`ConfigSource`](crate::preview::ConfigSource) over the contents
//! API and [`StatusReporter`](crate::tracker::StatusReporter) over the
//! deployments API. Transient failures are retried with exponential backoff.

mod client;
mod error;

pub use client::OctocrabClient;
pub use error::{GitHubApiError, GitHubErrorKind};
