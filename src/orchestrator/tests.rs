//! End-to-end scenarios: webhook events in, platform state and status
//! reports out, with every collaborator faked.

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::platform::manager::VERSION_VAR;
use crate::platform::{AppManager, DeployState, PlatformError, WaitConfig};
use crate::preview::{ConfigResolver, ConfigSource};
use crate::queue::OperationOutcome;
use crate::retry::RetryConfig;
use crate::test_utils::{
    FakeCall, FakeConfigSource, FakeDeployTarget, FakePusher, RecordingReporter,
};
use crate::tracker::{DeploymentStore, DeploymentTracker, InMemoryDeploymentStore, StatusUpdate};
use crate::types::{Deployment, DeploymentStatus, PullRequestRef, Sha};
use crate::webhooks::PrAction;

struct Harness {
    orchestrator: Orchestrator,
    source: FakeConfigSource,
    target: FakeDeployTarget,
    pusher: FakePusher,
    reporter: RecordingReporter,
    store: InMemoryDeploymentStore,
}

fn harness() -> Harness {
    harness_with(QueueConfig::default())
}

fn harness_with(queue: QueueConfig) -> Harness {
    let source = FakeConfigSource::new();
    let target = FakeDeployTarget::new();
    let pusher = FakePusher::new();
    let reporter = RecordingReporter::new();
    let store = InMemoryDeploymentStore::new();

    let fast = RetryConfig::DEFAULT.with_initial_delay(Duration::from_millis(1));
    let config_source: Arc<dyn ConfigSource> = Arc::new(source.clone());
    let apps = AppManager::new(Arc::new(target.clone())).with_retry(fast);
    let tracker = DeploymentTracker::new(
        Arc::new(store.clone()),
        Arc::new(reporter.clone()),
        "pr-apps.prs.example.com",
    );
    let pipeline = DeployPipeline::new(
        config_source.clone(),
        apps,
        Arc::new(pusher.clone()),
        tracker,
    )
    .with_resolver(ConfigResolver::new(config_source).with_retry(fast))
    .with_wait(
        WaitConfig::default()
            .with_initial_interval(Duration::from_millis(1))
            .with_deadline(Duration::from_secs(2)),
    );

    Harness {
        orchestrator: Orchestrator::new(pipeline, queue),
        source,
        target,
        pusher,
        reporter,
        store,
    }
}

fn event(action: PrAction, number: u64, sha: &str) -> PullRequestEvent {
    PullRequestEvent {
        action,
        pr: PullRequestRef::new(PrNumber(number), "Feature1", Some(Sha::new(sha))),
        merged: false,
    }
}

impl Harness {
    async fn send(&self, event: PullRequestEvent) -> OperationOutcome {
        let queued = self.orchestrator.handle_event(event).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), queued.outcome())
            .await
            .expect("operation did not finish")
    }

    async fn deployments(&self, pr: u64) -> Vec<Deployment> {
        self.store.list_for_pr(PrNumber(pr)).await.unwrap()
    }

    fn states(&self) -> Vec<DeploymentStatus> {
        self.reporter.reports().iter().map(|r| r.state).collect()
    }
}

/// No deployment goes pending while another is still pending.
fn assert_sequential(reports: &[StatusUpdate]) {
    let mut open: Option<&str> = None;
    for report in reports {
        match report.state {
            DeploymentStatus::Pending => {
                assert!(open.is_none(), "pending while {open:?} still pending");
                open = Some(report.log_url.as_str());
            }
            _ => {
                if open == Some(report.log_url.as_str()) {
                    open = None;
                }
            }
        }
    }
}

// ─── Lifecycle ───

#[tokio::test]
async fn open_synchronize_close() {
    let h = harness();
    h.source.put("c1", "env:\n  GREETING: hello\n");
    h.source.put("c2", "env:\n  GREETING: hello again\n");

    let outcome = h.send(event(PrAction::Opened, 23, "c1")).await;
    assert_eq!(outcome, OperationOutcome::Completed);
    assert_eq!(h.target.app_names(), vec!["pr-23".to_string()]);
    let app = h.target.app("pr-23").unwrap();
    assert_eq!(app.env[VERSION_VAR], "1");
    assert_eq!(app.env["GREETING"], "hello");
    assert_eq!(h.orchestrator.phase(PrNumber(23)).await, Some(PrPhase::Live));

    let outcome = h.send(event(PrAction::Synchronize, 23, "c2")).await;
    assert_eq!(outcome, OperationOutcome::Completed);
    let redeployed = h.target.app("pr-23").unwrap();
    assert_eq!(redeployed.id, app.id);
    assert_eq!(redeployed.env[VERSION_VAR], "2");
    assert_eq!(redeployed.env["GREETING"], "hello again");

    let deployments = h.deployments(23).await;
    assert_eq!(deployments.len(), 2);
    assert_ne!(deployments[0].id, deployments[1].id);
    for d in &deployments {
        assert_eq!(d.status, DeploymentStatus::Success);
        assert_eq!(d.deployed_app_url, "https://pr-23.prs.example.com");
        assert_eq!(
            d.flynn_app_url.as_deref(),
            Some(format!("https://dashboard.prs.example.com/apps/{}", app.id).as_str())
        );
        assert!(d.log_text().contains(FakePusher::LOG));
    }
    assert!(deployments[1].log_text().contains("VERSION=2"));

    let reports = h.reporter.reports();
    assert_eq!(
        h.states(),
        vec![
            DeploymentStatus::Pending,
            DeploymentStatus::Success,
            DeploymentStatus::Pending,
            DeploymentStatus::Success,
        ]
    );
    assert_ne!(reports[0].log_url, reports[2].log_url);
    assert_eq!(
        h.pusher.pushes(),
        vec![("Feature1".to_string(), "https://git.prs.example.com/pr-23.git".to_string()); 2]
    );

    let outcome = h.send(event(PrAction::Closed, 23, "c2")).await;
    assert_eq!(outcome, OperationOutcome::Completed);
    assert!(h.target.app_names().is_empty());
    assert_eq!(h.orchestrator.phase(PrNumber(23)).await, None);
}

#[tokio::test]
async fn reopen_recreates_app_with_latest_config() {
    let h = harness();
    h.source.put("c1", "resources: [postgres]\n");
    h.source.put("c2", "resources: [postgres, redis]\n");

    h.send(event(PrAction::Opened, 7, "c1")).await;
    let first = h.target.app("pr-7").unwrap();
    h.send(event(PrAction::Closed, 7, "c1")).await;
    assert!(h.target.app_names().is_empty());

    let outcome = h.send(event(PrAction::Reopened, 7, "c2")).await;
    assert_eq!(outcome, OperationOutcome::Completed);
    let second = h.target.app("pr-7").unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.env[VERSION_VAR], "1");
    assert_eq!(second.resources, vec!["postgres", "redis"]);
}

#[tokio::test]
async fn merged_close_tears_down_too() {
    let h = harness();
    h.send(event(PrAction::Opened, 4, "c1")).await;

    let mut close = event(PrAction::Closed, 4, "c1");
    close.merged = true;
    assert_eq!(h.send(close).await, OperationOutcome::Completed);
    assert!(h.target.app_names().is_empty());
}

#[tokio::test]
async fn duplicate_close_is_harmless() {
    let h = harness();
    h.send(event(PrAction::Opened, 8, "c1")).await;

    assert!(h.send(event(PrAction::Closed, 8, "c1")).await.is_completed());
    assert!(h.send(event(PrAction::Closed, 8, "c1")).await.is_completed());
    assert_eq!(
        h.target
            .calls()
            .iter()
            .filter(|c| matches!(c, FakeCall::DeleteApp(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn successful_deploy_scales_web() {
    let h = harness();
    h.send(event(PrAction::Opened, 23, "c1")).await;

    let app = h.target.app("pr-23").unwrap();
    assert_eq!(app.formation.get("web"), Some(&1));
}

// ─── Failures ───

#[tokio::test]
async fn malformed_config_fails_without_building() {
    let h = harness();
    h.source.put("bad", "env: [not, a, map]\n");

    let outcome = h.send(event(PrAction::Opened, 23, "bad")).await;
    assert!(matches!(outcome, OperationOutcome::Failed(ref msg) if msg.contains("pr-app.yaml")));

    assert_eq!(h.states(), vec![DeploymentStatus::Failure]);
    let deployments = h.deployments(23).await;
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].status, DeploymentStatus::Failure);
    assert!(deployments[0].log_text().contains("invalid pr-app.yaml"));
    assert_eq!(deployments[0].flynn_app_url, None);

    assert!(h.pusher.pushes().is_empty());
    assert_eq!(h.target.deploy_polls(), 0);
}

#[tokio::test]
async fn partial_config_is_reported_and_not_built() {
    let h = harness();
    h.source.put(
        "c1",
        "resources: [postgres]\nroutes:\n  - service: pr-23-api\n    domain: api.example.com\n",
    );
    h.target
        .fail_next("add_route", PlatformError::permanent("domain taken"));

    let outcome = h.send(event(PrAction::Opened, 23, "c1")).await;
    assert!(!outcome.is_completed());

    let deployments = h.deployments(23).await;
    let log = deployments[0].log_text();
    assert!(log.contains("completed: set env, attach resources"), "{log}");
    assert!(log.contains("domain taken"), "{log}");
    assert!(deployments[0].flynn_app_url.is_some());
    assert!(h.pusher.pushes().is_empty());
    // Left in place for the next deploy to fix.
    assert_eq!(h.target.app_names(), vec!["pr-23".to_string()]);
}

#[tokio::test]
async fn rejected_push_fails_deployment() {
    let h = harness();
    h.pusher.reject_with("pre-receive hook declined");

    let outcome = h.send(event(PrAction::Opened, 23, "c1")).await;
    assert!(matches!(outcome, OperationOutcome::Failed(ref msg) if msg.contains("push failed")));
    assert_eq!(
        h.states(),
        vec![DeploymentStatus::Pending, DeploymentStatus::Failure]
    );
    let log = h.deployments(23).await[0].log_text();
    assert!(log.contains("pre-receive hook declined"), "{log}");
    assert_eq!(h.target.deploy_polls(), 0);
}

#[tokio::test]
async fn platform_build_failure_skips_scaling() {
    let h = harness();
    h.target
        .script_deploy_states(vec![DeployState::Pending, DeployState::Failed("build exited 1".into())]);

    let outcome = h.send(event(PrAction::Opened, 23, "c1")).await;
    assert!(!outcome.is_completed());
    let deployment = &h.deployments(23).await[0];
    assert_eq!(deployment.status, DeploymentStatus::Failure);
    assert!(deployment.log_text().contains("build exited 1"));
    assert!(
        !h.target
            .calls()
            .iter()
            .any(|c| matches!(c, FakeCall::SetScale(..)))
    );
}

#[tokio::test]
async fn failed_deploy_does_not_block_next() {
    let h = harness();
    h.source.put("bad", "routes: 3\n");
    h.source.put("good", "env:\n  A: b\n");

    assert!(!h.send(event(PrAction::Opened, 23, "bad")).await.is_completed());
    assert!(
        h.send(event(PrAction::Synchronize, 23, "good"))
            .await
            .is_completed()
    );
    assert_eq!(h.target.app("pr-23").unwrap().env[VERSION_VAR], "1");
}

#[tokio::test]
async fn timed_out_deploy_is_failed_and_queue_moves_on() {
    let h = harness_with(
        QueueConfig::default().with_operation_timeout(Duration::from_millis(300)),
    );
    h.pusher.set_delay(Duration::from_secs(30));

    let stuck = h
        .orchestrator
        .handle_event(event(PrAction::Opened, 23, "c1"))
        .await
        .unwrap();
    let next = h
        .orchestrator
        .handle_event(event(PrAction::Synchronize, 23, "c2"))
        .await
        .unwrap();

    let outcome = stuck.outcome().await;
    assert_eq!(outcome, OperationOutcome::TimedOut(Duration::from_millis(300)));
    h.pusher.set_delay(Duration::ZERO);
    // The second deploy may already have begun its push with the old delay,
    // so it can time out too; either way it resolves.
    let _ = next.outcome().await;

    let deployments = h.deployments(23).await;
    assert_eq!(deployments[0].status, DeploymentStatus::Failure);
    assert!(deployments[0].log_text().contains("timed out"));
    assert!(deployments.iter().all(|d| d.is_terminal()));
    assert_sequential(&h.reporter.reports());
}

#[tokio::test]
async fn timeout_while_registering_fails_the_prepared_deployment() {
    let h = harness_with(
        QueueConfig::default().with_operation_timeout(Duration::from_millis(300)),
    );
    h.reporter.set_register_delay(Duration::from_millis(500));

    let outcome = h.send(event(PrAction::Opened, 23, "c1")).await;
    assert_eq!(outcome, OperationOutcome::TimedOut(Duration::from_millis(300)));

    let deployments = h.deployments(23).await;
    assert_eq!(deployments.len(), 1, "{deployments:?}");
    assert_eq!(deployments[0].status, DeploymentStatus::Failure);
    assert!(deployments[0].log_text().contains("timed out"));
    assert_eq!(h.states(), vec![DeploymentStatus::Failure]);
}

// ─── Ordering ───

#[tokio::test]
async fn status_reports_for_one_pr_are_sequential() {
    let h = harness();
    h.pusher.set_delay(Duration::from_millis(20));

    let mut queued = Vec::new();
    for (action, sha) in [
        (PrAction::Opened, "c1"),
        (PrAction::Synchronize, "c2"),
        (PrAction::Synchronize, "c3"),
    ] {
        queued.push(h.orchestrator.handle_event(event(action, 23, sha)).await.unwrap());
    }
    for q in queued {
        assert!(q.outcome().await.is_completed());
    }

    let reports = h.reporter.reports();
    assert_eq!(reports.len(), 6);
    assert_sequential(&reports);
    assert_eq!(h.target.app("pr-23").unwrap().env[VERSION_VAR], "3");
    let shas: Vec<_> = h.source.requests().into_iter().map(|(_, r)| r).collect();
    assert_eq!(shas, vec!["c1", "c2", "c3"]);
}

#[tokio::test]
async fn different_prs_deploy_concurrently() {
    let h = harness();
    h.pusher.set_delay(Duration::from_millis(300));

    let a = h
        .orchestrator
        .handle_event(event(PrAction::Opened, 1, "a1"))
        .await
        .unwrap();
    let b = h
        .orchestrator
        .handle_event(event(PrAction::Opened, 2, "b1"))
        .await
        .unwrap();
    assert!(a.outcome().await.is_completed());
    assert!(b.outcome().await.is_completed());

    // Both went pending before either push finished.
    assert_eq!(
        &h.states()[..2],
        &[DeploymentStatus::Pending, DeploymentStatus::Pending]
    );
    assert_eq!(h.target.app_names(), vec!["pr-1".to_string(), "pr-2".to_string()]);
    assert_eq!(h.target.app("pr-1").unwrap().env[VERSION_VAR], "1");
    assert_eq!(h.target.app("pr-2").unwrap().env[VERSION_VAR], "1");
}

#[tokio::test]
async fn phase_tracks_latest_event() {
    let h = harness();
    h.pusher.set_delay(Duration::from_millis(100));
    // Keeps the teardown running after the deploy has settled.
    h.target.set_delete_delay(Duration::from_millis(300));

    let deploy = h
        .orchestrator
        .handle_event(event(PrAction::Opened, 5, "c1"))
        .await
        .unwrap();
    assert_eq!(h.orchestrator.phase(PrNumber(5)).await, Some(PrPhase::Deploying));
    let close = h
        .orchestrator
        .handle_event(event(PrAction::Closed, 5, "c1"))
        .await
        .unwrap();
    assert_eq!(h.orchestrator.phase(PrNumber(5)).await, Some(PrPhase::Closing));

    assert!(deploy.outcome().await.is_completed());
    // The finished deploy must not mark the PR live under a pending close.
    assert_eq!(h.orchestrator.phase(PrNumber(5)).await, Some(PrPhase::Closing));
    assert!(close.outcome().await.is_completed());
    assert_eq!(h.orchestrator.phase(PrNumber(5)).await, None);
}

#[tokio::test]
async fn events_for_other_prs_do_not_wait_on_a_busy_pr() {
    let h = harness();
    let busy = h
        .orchestrator
        .phases
        .entry(PrNumber(1))
        .or_default()
        .value()
        .clone();
    let held = busy.lock().await;

    let other = tokio::time::timeout(
        Duration::from_secs(1),
        h.orchestrator.handle_event(event(PrAction::Opened, 2, "b1")),
    )
    .await
    .expect("PR 2 waited on PR 1")
    .unwrap();

    let blocked = tokio::time::timeout(
        Duration::from_millis(100),
        h.orchestrator.handle_event(event(PrAction::Opened, 1, "a1")),
    )
    .await;
    assert!(blocked.is_err(), "PR 1 event ran while its phase was held");

    drop(held);
    assert!(other.outcome().await.is_completed());
}

#[tokio::test]
async fn closed_pr_leaves_no_phase_slot() {
    let h = harness();
    h.send(event(PrAction::Opened, 9, "c1")).await;
    assert!(h.orchestrator.phases.contains_key(&PrNumber(9)));

    h.send(event(PrAction::Closed, 9, "c1")).await;
    assert_eq!(h.orchestrator.phase(PrNumber(9)).await, None);
    assert!(!h.orchestrator.phases.contains_key(&PrNumber(9)));
}
