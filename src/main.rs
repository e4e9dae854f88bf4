use std::sync::Arc;

use pr_apps::config::Settings;
use pr_apps::git::GitPushDeployer;
use pr_apps::github::OctocrabClient;
use pr_apps::orchestrator::{DeployPipeline, Orchestrator};
use pr_apps::platform::{AppManager, FlynnClient, WaitConfig};
use pr_apps::queue::QueueConfig;
use pr_apps::server::{AppState, build_router};
use pr_apps::tracker::{DeploymentTracker, InMemoryDeploymentStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pr_apps=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    tracing::info!(?settings, "loaded settings");

    let github = Arc::new(OctocrabClient::from_token(
        settings.github_token.clone(),
        settings.github_repo.clone(),
    )?);
    let flynn = FlynnClient::new(
        settings.cluster_domain.clone(),
        settings.flynn_auth_key.clone(),
    )?;
    let pusher =
        GitPushDeployer::new(settings.source_url()).with_ssl_verify(settings.git_ssl_verify);
    let store = Arc::new(InMemoryDeploymentStore::new());
    let tracker = DeploymentTracker::new(store.clone(), github.clone(), &settings.domain);

    let pipeline = DeployPipeline::new(
        github,
        AppManager::new(Arc::new(flynn)),
        Arc::new(pusher),
        tracker,
    )
    .with_wait(WaitConfig::default().with_deadline(settings.deploy_wait));
    let queue = QueueConfig::default().with_operation_timeout(settings.operation_timeout);
    let orchestrator = Arc::new(Orchestrator::new(pipeline, queue));

    let app = build_router(AppState::new(
        orchestrator.clone(),
        store,
        settings.webhook_secret.as_bytes(),
    ));

    let listener = tokio::net::TcpListener::bind(settings.listen_addr).await?;
    tracing::info!("listening on {}", settings.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("draining work queue");
    orchestrator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
