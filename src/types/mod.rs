//! Core domain types for the preview deployment orchestrator.

pub mod deployment;
pub mod ids;
pub mod pr;

pub use deployment::{AlreadyResolved, Deployment, DeploymentStatus, LogChunk};
pub use ids::{AppName, DeploymentId, PrNumber, RepoId, Sha};
pub use pr::PullRequestRef;
