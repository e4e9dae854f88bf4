//! Per-PR preview configuration (`pr-app.yaml`).
//!
//! The file lives at the repository root of the PR's head commit and tells the
//! orchestrator which environment variables to set, which platform resources
//! to provision and which extra routes to expose. A missing file means "no
//! extra configuration".

pub mod resolver;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub use resolver::{ConfigResolver, ConfigSource, SourceError};

/// Path of the preview config file, relative to the repository root.
pub const PREVIEW_CONFIG_PATH: &str = "pr-app.yaml";

/// A route exposing one of the app's processes on an extra domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Route {
    /// Platform service name, conventionally `<app>-<process>`.
    pub service: String,
    pub domain: String,
}

/// Parsed preview configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PreviewConfig {
    /// Extra environment variables. Scalar values are stringified.
    #[serde(deserialize_with = "stringified_env")]
    pub env: BTreeMap<String, String>,

    /// Platform resource providers to attach (e.g. `postgres`).
    pub resources: Vec<String>,

    pub routes: Vec<Route>,
}

/// Preview config could not be obtained.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but is not valid preview config.
    #[error("invalid {path}: {message}")]
    Parse { path: &'static str, message: String },

    /// The source host could not be read.
    #[error("failed to read {path}: {source}")]
    Source {
        path: &'static str,
        #[source]
        source: SourceError,
    },
}

/// Parses the contents of a preview config file.
///
/// Empty (or whitespace-only) contents and a bare `null` document yield the
/// default configuration.
///
/// # Examples
///
/// ```
/// use pr_apps::preview::parse_preview_config;
///
/// let config = parse_preview_config("env:\n  FEATURE: on\nresources: [postgres]\n").unwrap();
/// assert_eq!(config.env["FEATURE"], "on");
/// assert_eq!(config.resources, vec!["postgres"]);
/// ```
pub fn parse_preview_config(contents: &str) -> Result<PreviewConfig, ConfigError> {
    if contents.trim().is_empty() {
        return Ok(PreviewConfig::default());
    }
    let parsed: Option<PreviewConfig> =
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: PREVIEW_CONFIG_PATH,
            message: e.to_string(),
        })?;
    Ok(parsed.unwrap_or_default())
}

/// A scalar YAML value as it appears in `env`.
#[derive(Deserialize)]
#[serde(untagged)]
enum EnvScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for EnvScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvScalar::Bool(b) => write!(f, "{b}"),
            EnvScalar::Int(i) => write!(f, "{i}"),
            EnvScalar::Float(x) => write!(f, "{x}"),
            EnvScalar::Str(s) => f.write_str(s),
        }
    }
}

fn stringified_env<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, EnvScalar>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect())
}
