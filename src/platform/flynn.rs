//! [`DeployTarget`] over the Flynn controller HTTP API.
//!
//! Every cluster exposes the controller at `https://controller.<cluster>`,
//! the git receiver at `https://git.<cluster>` and the dashboard at
//! `https://dashboard.<cluster>`. Requests authenticate with HTTP basic auth,
//! empty user name, and the controller key as password.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::preview::Route;
use crate::types::AppName;

use super::{
    AppIdentity, DeployState, DeployTarget, Formation, PlatformError, PlatformResult,
};

/// Disk limit for the build process, large enough for big repositories.
pub const SLUGBUILDER_TEMP_DISK_LIMIT: u64 = 1_073_741_824;

/// Memory limit for the build process.
pub const SLUGBUILDER_MEMORY_LIMIT: u64 = 2_147_483_648;

#[derive(Debug, Deserialize)]
struct FlynnApp {
    id: String,
    name: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct FlynnRelease {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    app_id: Option<String>,
    #[serde(default)]
    artifacts: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    processes: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FlynnProvider {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FlynnResource {
    provider_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct FlynnRoute {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    domain: String,
}

#[derive(Debug, Deserialize)]
struct FlynnDeployment {
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Flynn controller client.
#[derive(Clone)]
pub struct FlynnClient {
    http: Client,
    controller_url: String,
    cluster_domain: String,
    auth_key: String,
}

impl std::fmt::Debug for FlynnClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlynnClient")
            .field("controller_url", &self.controller_url)
            .field("cluster_domain", &self.cluster_domain)
            .finish_non_exhaustive()
    }
}

impl FlynnClient {
    /// Creates a client for the cluster at `cluster_domain`.
    pub fn new(
        cluster_domain: impl Into<String>,
        auth_key: impl Into<String>,
    ) -> PlatformResult<Self> {
        let cluster_domain = cluster_domain.into();
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(FlynnClient {
            http,
            controller_url: format!("https://controller.{cluster_domain}"),
            cluster_domain,
            auth_key: auth_key.into(),
        })
    }

    /// Points the client at a different controller (tunnels, tests).
    pub fn with_controller_url(mut self, url: impl Into<String>) -> Self {
        self.controller_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.controller_url, path))
            .basic_auth("", Some(&self.auth_key))
    }

    async fn send(&self, req: RequestBuilder) -> PlatformResult<reqwest::Response> {
        let response = req.send().await.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::from_status(status.as_u16(), body.trim().to_string()))
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> PlatformResult<T> {
        self.send(req)
            .await?
            .json()
            .await
            .map_err(|e| PlatformError::permanent(format!("unexpected controller response: {e}")))
    }

    async fn current_release(&self, app: &AppIdentity) -> PlatformResult<Option<FlynnRelease>> {
        let req = self.request(Method::GET, &format!("/apps/{}/release", app.id));
        match self.json(req).await {
            Ok(release) => Ok(Some(release)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn providers(&self) -> PlatformResult<Vec<FlynnProvider>> {
        self.json(self.request(Method::GET, "/providers")).await
    }
}

fn classify_transport(e: reqwest::Error) -> PlatformError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        PlatformError::transient(e.to_string())
    } else {
        PlatformError::permanent(e.to_string())
    }
}

/// Sets the build process limits on a release's process table.
fn with_slugbuilder_limits(processes: &mut serde_json::Map<String, Value>) {
    let slugbuilder = processes
        .entry("slugbuilder")
        .or_insert_with(|| json!({}));
    if !slugbuilder.is_object() {
        *slugbuilder = json!({});
    }
    slugbuilder["resources"] = json!({
        "temp_disk": { "limit": SLUGBUILDER_TEMP_DISK_LIMIT },
        "memory": { "limit": SLUGBUILDER_MEMORY_LIMIT },
    });
}

fn deploy_state_from(deployment: Option<FlynnDeployment>) -> DeployState {
    let Some(deployment) = deployment else {
        return DeployState::Pending;
    };
    match deployment.status.as_deref() {
        Some("complete") => DeployState::Succeeded,
        Some("failed") => DeployState::Failed(
            deployment
                .error
                .unwrap_or_else(|| "deployment failed".to_string()),
        ),
        _ => DeployState::Pending,
    }
}

#[async_trait]
impl DeployTarget for FlynnClient {
    async fn find_app(&self, name: &AppName) -> PlatformResult<Option<AppIdentity>> {
        let req = self.request(Method::GET, &format!("/apps/{name}"));
        match self.json::<FlynnApp>(req).await {
            Ok(app) => Ok(Some(AppIdentity {
                name: name.clone(),
                id: app.id,
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_app(&self, name: &AppName) -> PlatformResult<AppIdentity> {
        let req = self
            .request(Method::POST, "/apps")
            .json(&json!({ "name": name.as_str() }));
        let app: FlynnApp = self.json(req).await?;
        tracing::debug!(app = %app.name, id = %app.id, "flynn app created");
        Ok(AppIdentity {
            name: name.clone(),
            id: app.id,
        })
    }

    async fn delete_app(&self, app: &AppIdentity) -> PlatformResult<()> {
        self.send(self.request(Method::DELETE, &format!("/apps/{}", app.id)))
            .await
            .map(|_| ())
    }

    async fn env(&self, app: &AppIdentity) -> PlatformResult<BTreeMap<String, String>> {
        Ok(self
            .current_release(app)
            .await?
            .map(|r| r.env)
            .unwrap_or_default())
    }

    async fn set_env(
        &self,
        app: &AppIdentity,
        env: &BTreeMap<String, String>,
    ) -> PlatformResult<()> {
        let mut release = self.current_release(app).await?.unwrap_or_default();
        release.id = None;
        release.app_id = Some(app.id.clone());
        release.env = env.clone();
        with_slugbuilder_limits(&mut release.processes);

        let created: FlynnRelease = self
            .json(self.request(Method::POST, "/releases").json(&release))
            .await?;
        let release_id = created
            .id
            .ok_or_else(|| PlatformError::permanent("controller returned a release without id"))?;

        self.send(
            self.request(Method::PUT, &format!("/apps/{}/release", app.id))
                .json(&json!({ "id": release_id })),
        )
        .await
        .map(|_| ())
    }

    async fn resources(&self, app: &AppIdentity) -> PlatformResult<Vec<String>> {
        let attached: Vec<FlynnResource> = self
            .json(self.request(Method::GET, &format!("/apps/{}/resources", app.id)))
            .await?;
        if attached.is_empty() {
            return Ok(Vec::new());
        }
        let providers = self.providers().await?;
        Ok(attached
            .iter()
            .filter_map(|r| {
                providers
                    .iter()
                    .find(|p| p.id == r.provider_id)
                    .map(|p| p.name.clone())
            })
            .collect())
    }

    async fn attach_resource(&self, app: &AppIdentity, provider: &str) -> PlatformResult<()> {
        self.send(
            self.request(Method::POST, &format!("/providers/{provider}/resources"))
                .json(&json!({ "apps": [app.id] })),
        )
        .await
        .map(|_| ())
    }

    async fn routes(&self, app: &AppIdentity) -> PlatformResult<Vec<Route>> {
        let routes: Vec<FlynnRoute> = self
            .json(self.request(Method::GET, &format!("/apps/{}/routes", app.id)))
            .await?;
        let default_service = format!("{}-web", app.name);
        Ok(routes
            .into_iter()
            .filter(|r| r.kind == "http" && r.service != default_service)
            .map(|r| Route {
                service: r.service,
                domain: r.domain,
            })
            .collect())
    }

    async fn add_route(&self, app: &AppIdentity, route: &Route) -> PlatformResult<()> {
        let body = FlynnRoute {
            kind: "http".to_string(),
            service: route.service.clone(),
            domain: route.domain.clone(),
        };
        self.send(
            self.request(Method::POST, &format!("/apps/{}/routes", app.id))
                .json(&body),
        )
        .await
        .map(|_| ())
    }

    async fn set_scale(&self, app: &AppIdentity, formation: &Formation) -> PlatformResult<()> {
        let release = self.current_release(app).await?.and_then(|r| r.id).ok_or_else(|| {
            PlatformError::permanent(format!("{} has no release to scale", app.name))
        })?;
        self.send(
            self.request(
                Method::PUT,
                &format!("/apps/{}/formations/{}", app.id, release),
            )
            .json(&json!({
                "app": app.id,
                "release": release,
                "processes": formation,
            })),
        )
        .await
        .map(|_| ())
    }

    async fn deploy_state(&self, app: &AppIdentity) -> PlatformResult<DeployState> {
        let mut deployments: Vec<FlynnDeployment> = self
            .json(self.request(Method::GET, &format!("/apps/{}/deployments", app.id)))
            .await?;
        // Newest first.
        Ok(deploy_state_from(if deployments.is_empty() {
            None
        } else {
            Some(deployments.swap_remove(0))
        }))
    }

    fn git_remote_url(&self, name: &AppName) -> String {
        format!(
            "https://:{}@git.{}/{}.git",
            self.auth_key, self.cluster_domain, name
        )
    }

    fn dashboard_url(&self, app: &AppIdentity) -> String {
        format!("https://dashboard.{}/apps/{}", self.cluster_domain, app.id)
    }

    fn app_url(&self, name: &AppName) -> String {
        format!("https://{}.{}", name, self.cluster_domain)
    }
}
