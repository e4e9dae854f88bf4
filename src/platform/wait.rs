//! Waiting for a triggered deploy to finish.
//!
//! The platform reports the outcome of a deploy through its API. Polling backs
//! off exponentially and gives up at a hard deadline, so a wedged build never
//! holds its PR's queue forever.

use std::time::Duration;

use tokio::time::Instant;

use super::{AppIdentity, DeployState, DeployTarget, PlatformResult};
use crate::retry::{Classify, RetryConfig};

/// Polling schedule for [`await_deploy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitConfig {
    /// Backoff between polls. `max_retries` is ignored; the deadline bounds
    /// the number of polls.
    pub backoff: RetryConfig,

    /// Give up after this long.
    pub deadline: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        WaitConfig {
            backoff: RetryConfig::new(
                u32::MAX,
                Duration::from_secs(1),
                Duration::from_secs(15),
                2.0,
            ),
            deadline: Duration::from_secs(300),
        }
    }
}

impl WaitConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.backoff.initial_delay = interval;
        self
    }
}

/// Polls `deploy_state` until the deploy is terminal or the deadline passes.
///
/// Transient errors while polling are logged and polled through. A permanent
/// error ends the wait with that error.
pub async fn await_deploy(
    target: &dyn DeployTarget,
    app: &AppIdentity,
    config: WaitConfig,
) -> PlatformResult<DeployState> {
    let deadline = Instant::now() + config.deadline;
    let mut attempt = 0u32;

    loop {
        match target.deploy_state(app).await {
            Ok(state) if state.is_terminal() => return Ok(state),
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!(app = %app.name, error = %e, "deploy status check failed, will poll again");
            }
            Err(e) => return Err(e),
        }

        let delay = config.backoff.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        let now = Instant::now();
        if now + delay > deadline {
            let waited = config.deadline.as_secs();
            tracing::warn!(app = %app.name, waited, "deploy did not finish before deadline");
            return Ok(DeployState::Failed(format!(
                "timed out after {waited}s waiting for deploy to finish"
            )));
        }
        tokio::time::sleep(delay).await;
    }
}
