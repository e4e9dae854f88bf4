//! In-memory fakes of every external collaborator, for tests.
//!
//! Each fake is a cheap `Clone` handle over shared state, so a test can hand
//! one clone to the code under test and inspect another.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::git::{BranchPusher, GitError, GitResult, PushOutput};
use crate::platform::{
    AppIdentity, DeployState, DeployTarget, Formation, PlatformError, PlatformResult,
};
use crate::preview::{ConfigSource, Route, SourceError};
use crate::tracker::{HostDeploymentId, ReportError, StatusReporter, StatusUpdate};
use crate::types::{AppName, PullRequestRef};

/// Cluster domain the fakes build URLs under.
pub const FAKE_CLUSTER: &str = "prs.example.com";

// ─── Config source ───

#[derive(Default)]
struct SourceState {
    /// File contents by git ref.
    files: HashMap<String, String>,
    failures: VecDeque<SourceError>,
    requests: Vec<(String, String)>,
}

/// A repository holding one preview config per ref.
#[derive(Clone, Default)]
pub struct FakeConfigSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `contents` as the config file at `git_ref`.
    pub fn put(&self, git_ref: &str, contents: &str) {
        let mut state = self.state.lock().unwrap();
        state.files.insert(git_ref.to_string(), contents.to_string());
    }

    /// Makes the next fetch fail with `error`.
    pub fn fail_next(&self, error: SourceError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    /// Every `(path, git_ref)` fetched so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl ConfigSource for FakeConfigSource {
    async fn fetch_file(&self, path: &str, git_ref: &str) -> Result<Option<String>, SourceError> {
        let mut state = self.state.lock().unwrap();
        state
            .requests
            .push((path.to_string(), git_ref.to_string()));
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        Ok(state.files.get(git_ref).cloned())
    }
}

// ─── Deploy target ───

/// What the fake platform holds for one app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeApp {
    pub id: String,
    pub env: BTreeMap<String, String>,
    pub resources: Vec<String>,
    pub routes: Vec<Route>,
    pub formation: Formation,
}

/// A mutating call made against the fake platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    CreateApp(String),
    DeleteApp(String),
    SetEnv(String, BTreeMap<String, String>),
    AttachResource(String, String),
    AddRoute(String, Route),
    SetScale(String, Formation),
}

#[derive(Default)]
struct TargetState {
    apps: BTreeMap<String, FakeApp>,
    next_id: u64,
    calls: Vec<FakeCall>,
    failures: HashMap<String, VecDeque<PlatformError>>,
    deploy_states: VecDeque<DeployState>,
    deploy_polls: usize,
    delete_delay: Duration,
}

impl TargetState {
    fn take_failure(&mut self, method: &str) -> PlatformResult<()> {
        match self.failures.get_mut(method).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn app_mut(&mut self, app: &AppIdentity) -> PlatformResult<&mut FakeApp> {
        match self.apps.get_mut(app.name.as_str()) {
            Some(state) if state.id == app.id => Ok(state),
            _ => Err(PlatformError::not_found(format!("no app {app}"))),
        }
    }
}

/// A platform that keeps apps in memory.
///
/// Deploy state polls return the scripted states in order, then
/// `Succeeded` once the script runs out.
#[derive(Clone, Default)]
pub struct FakeDeployTarget {
    state: Arc<Mutex<TargetState>>,
}

impl FakeDeployTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call to `method` (e.g. `"create_app"`) fail.
    pub fn fail_next(&self, method: &str, error: PlatformError) {
        let mut state = self.state.lock().unwrap();
        state
            .failures
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn script_deploy_states(&self, states: Vec<DeployState>) {
        self.state.lock().unwrap().deploy_states = states.into();
    }

    /// Makes every app deletion take `delay` before it happens.
    pub fn set_delete_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delete_delay = delay;
    }

    /// Names of the apps that currently exist.
    pub fn app_names(&self) -> Vec<String> {
        self.state.lock().unwrap().apps.keys().cloned().collect()
    }

    pub fn app(&self, name: &str) -> Option<FakeApp> {
        self.state.lock().unwrap().apps.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// How many times deploy state was polled.
    pub fn deploy_polls(&self) -> usize {
        self.state.lock().unwrap().deploy_polls
    }
}

#[async_trait]
impl DeployTarget for FakeDeployTarget {
    async fn find_app(&self, name: &AppName) -> PlatformResult<Option<AppIdentity>> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("find_app")?;
        Ok(state.apps.get(name.as_str()).map(|app| AppIdentity {
            name: name.clone(),
            id: app.id.clone(),
        }))
    }

    async fn create_app(&self, name: &AppName) -> PlatformResult<AppIdentity> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("create_app")?;
        if state.apps.contains_key(name.as_str()) {
            return Err(PlatformError::permanent(format!("app {name} already exists")));
        }
        state.next_id += 1;
        let id = format!("app-{}", state.next_id);
        state.apps.insert(
            name.to_string(),
            FakeApp {
                id: id.clone(),
                ..FakeApp::default()
            },
        );
        state.calls.push(FakeCall::CreateApp(name.to_string()));
        Ok(AppIdentity {
            name: name.clone(),
            id,
        })
    }

    async fn delete_app(&self, app: &AppIdentity) -> PlatformResult<()> {
        let delay = self.state.lock().unwrap().delete_delay;
        tokio::time::sleep(delay).await;
        let mut state = self.state.lock().unwrap();
        state.take_failure("delete_app")?;
        state.app_mut(app)?;
        state.apps.remove(app.name.as_str());
        state.calls.push(FakeCall::DeleteApp(app.name.to_string()));
        Ok(())
    }

    async fn env(&self, app: &AppIdentity) -> PlatformResult<BTreeMap<String, String>> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("env")?;
        Ok(state.app_mut(app)?.env.clone())
    }

    async fn set_env(
        &self,
        app: &AppIdentity,
        env: &BTreeMap<String, String>,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("set_env")?;
        state.app_mut(app)?.env = env.clone();
        state
            .calls
            .push(FakeCall::SetEnv(app.name.to_string(), env.clone()));
        Ok(())
    }

    async fn resources(&self, app: &AppIdentity) -> PlatformResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("resources")?;
        Ok(state.app_mut(app)?.resources.clone())
    }

    async fn attach_resource(&self, app: &AppIdentity, provider: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("attach_resource")?;
        state.app_mut(app)?.resources.push(provider.to_string());
        state.calls.push(FakeCall::AttachResource(
            app.name.to_string(),
            provider.to_string(),
        ));
        Ok(())
    }

    async fn routes(&self, app: &AppIdentity) -> PlatformResult<Vec<Route>> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("routes")?;
        Ok(state.app_mut(app)?.routes.clone())
    }

    async fn add_route(&self, app: &AppIdentity, route: &Route) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("add_route")?;
        state.app_mut(app)?.routes.push(route.clone());
        state
            .calls
            .push(FakeCall::AddRoute(app.name.to_string(), route.clone()));
        Ok(())
    }

    async fn set_scale(&self, app: &AppIdentity, formation: &Formation) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.take_failure("set_scale")?;
        state.app_mut(app)?.formation = formation.clone();
        state
            .calls
            .push(FakeCall::SetScale(app.name.to_string(), formation.clone()));
        Ok(())
    }

    async fn deploy_state(&self, app: &AppIdentity) -> PlatformResult<DeployState> {
        let mut state = self.state.lock().unwrap();
        state.deploy_polls += 1;
        state.take_failure("deploy_state")?;
        state.app_mut(app)?;
        Ok(state
            .deploy_states
            .pop_front()
            .unwrap_or(DeployState::Succeeded))
    }

    fn git_remote_url(&self, name: &AppName) -> String {
        format!("https://git.{FAKE_CLUSTER}/{name}.git")
    }

    fn dashboard_url(&self, app: &AppIdentity) -> String {
        format!("https://dashboard.{FAKE_CLUSTER}/apps/{}", app.id)
    }

    fn app_url(&self, name: &AppName) -> String {
        format!("https://{name}.{FAKE_CLUSTER}")
    }
}

// ─── Pusher ───

#[derive(Default)]
struct PusherState {
    pushes: Vec<(String, String)>,
    reject: Option<String>,
    delay: Duration,
}

/// A git pusher that records pushes and replies with a fixed build log.
#[derive(Clone, Default)]
pub struct FakePusher {
    state: Arc<Mutex<PusherState>>,
}

impl FakePusher {
    /// Build output every successful push returns.
    pub const LOG: &'static str = "all done";

    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every push with `details` from now on.
    pub fn reject_with(&self, details: &str) {
        self.state.lock().unwrap().reject = Some(details.to_string());
    }

    /// Makes every push take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Every `(branch, remote_url)` pushed so far.
    pub fn pushes(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().pushes.clone()
    }
}

#[async_trait]
impl BranchPusher for FakePusher {
    async fn push_branch(&self, branch: &str, remote_url: &str) -> GitResult<PushOutput> {
        let (delay, reject) = {
            let mut state = self.state.lock().unwrap();
            state
                .pushes
                .push((branch.to_string(), remote_url.to_string()));
            (state.delay, state.reject.clone())
        };
        tokio::time::sleep(delay).await;
        match reject {
            Some(details) => Err(GitError::PushRejected { details }),
            None => Ok(PushOutput {
                log: Self::LOG.to_string(),
            }),
        }
    }
}

// ─── Status reporter ───

#[derive(Default)]
struct ReporterState {
    next_id: u64,
    environments: Vec<String>,
    reports: Vec<StatusUpdate>,
    failing: bool,
    register_delay: Duration,
}

/// A source host that records every deployment status it is sent.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    state: Arc<Mutex<ReporterState>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails and nothing is recorded.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    /// Makes every deployment registration take `delay` before answering.
    pub fn set_register_delay(&self, delay: Duration) {
        self.state.lock().unwrap().register_delay = delay;
    }

    /// Status updates in the order they were sent.
    pub fn reports(&self) -> Vec<StatusUpdate> {
        self.state.lock().unwrap().reports.clone()
    }

    /// Environment of each deployment created, in order.
    pub fn environments(&self) -> Vec<String> {
        self.state.lock().unwrap().environments.clone()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn create_deployment(
        &self,
        _pr: &PullRequestRef,
        environment: &str,
    ) -> Result<HostDeploymentId, ReportError> {
        let delay = self.state.lock().unwrap().register_delay;
        tokio::time::sleep(delay).await;
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(ReportError::new("source host unavailable"));
        }
        state.next_id += 1;
        state.environments.push(environment.to_string());
        Ok(HostDeploymentId(state.next_id))
    }

    async fn report_status(
        &self,
        _deployment: HostDeploymentId,
        update: &StatusUpdate,
    ) -> Result<(), ReportError> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(ReportError::new("source host unavailable"));
        }
        state.reports.push(update.clone());
        Ok(())
    }
}
