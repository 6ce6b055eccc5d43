use anyhow::{Context, Result};
use pushaas_orchestrations::backend::{CloudBackend, KubeBackend, MemoryBackend};
use pushaas_orchestrations::config::ProvisionerConfig;
use pushaas_orchestrations::error::ConfigError;
use pushaas_orchestrations::orchestrator::Orchestrator;
use pushaas_orchestrations::queue::{WorkerPool, WorkerPoolHandle};
use pushaas_orchestrations::registry::create_handler_registry;
use pushaas_orchestrations::service::InstanceService;
use std::sync::Arc;

use crate::api::{self, AppState};
use crate::config::{BackendKind, ServerConfig};
use crate::db::{self, Storage};

pub async fn run_standalone_mode(
    config: ServerConfig,
    port: Option<u16>,
    workers: Option<usize>,
) -> Result<()> {
    let workers = workers.unwrap_or(config.workers);
    tracing::info!("Starting Pushaas in standalone mode (API + Workers)");

    let storage = db::open(&config).await?;
    storage.recover_jobs().await?;
    let pool = start_workers(&config, &storage, workers).await?;

    let addr = format!("{}:{}", config.server_host, port.unwrap_or(config.server_port));
    tracing::info!("✓ Pushaas server ready");
    tracing::info!("  API: http://{}", addr);
    tracing::info!("  Workers: {}", workers);
    tracing::info!("  Press Ctrl+C to stop");

    let result = api::start_server(&addr, app_state(&config, &storage), shutdown_signal()).await;

    tracing::info!("Shutting down...");
    pool.shutdown().await;
    result
}

pub async fn run_api_mode(config: ServerConfig, port: Option<u16>) -> Result<()> {
    tracing::info!("Starting Pushaas in API-only mode");

    let storage = db::open(&config).await?;
    if !storage.is_shared() {
        anyhow::bail!("API mode needs DATABASE_URL so separate workers can pick up jobs");
    }

    let addr = format!("{}:{}", config.server_host, port.unwrap_or(config.server_port));
    api::start_server(&addr, app_state(&config, &storage), shutdown_signal()).await
}

pub async fn run_worker_mode(config: ServerConfig, workers: Option<usize>) -> Result<()> {
    let workers = workers.unwrap_or(config.workers);
    tracing::info!("Starting Pushaas in worker-only mode");

    let storage = db::open(&config).await?;
    if !storage.is_shared() {
        anyhow::bail!("Worker mode needs DATABASE_URL to share the job queue with the API");
    }
    let pool = start_workers(&config, &storage, workers).await?;

    tracing::info!("✓ {} worker(s) running, press Ctrl+C to stop", workers);
    shutdown_signal().await;

    tracing::info!("Shutting down...");
    pool.shutdown().await;
    Ok(())
}

fn app_state(config: &ServerConfig, storage: &Storage) -> AppState {
    AppState {
        service: InstanceService::new(storage.store.clone(), storage.queue.clone()),
        credentials: config.credentials.clone().map(Arc::new),
    }
}

async fn start_workers(
    config: &ServerConfig,
    storage: &Storage,
    workers: usize,
) -> Result<WorkerPoolHandle> {
    let provisioner = provisioner_config(config.backend)?;
    let completion_policy = provisioner.completion_policy;

    let backend: Arc<dyn CloudBackend> = match config.backend {
        BackendKind::Kubernetes => Arc::new(
            KubeBackend::try_default(config.kube_namespace.clone())
                .await
                .context("Failed to create Kubernetes backend")?,
        ),
        BackendKind::Memory => Arc::new(MemoryBackend::new(provisioner.dns_namespace.clone())),
    };
    let orchestrator = Arc::new(
        Orchestrator::new(backend, provisioner).context("Invalid provisioner configuration")?,
    );

    let registry = create_handler_registry(
        orchestrator,
        storage.store.clone(),
        storage.queue.clone(),
        config.completion_routing,
        completion_policy,
    );
    let pool = Arc::new(WorkerPool::new(storage.queue.clone(), registry));
    Ok(pool.start(workers))
}

/// The memory backend runs with local defaults when nothing is configured
fn provisioner_config(backend: BackendKind) -> Result<ProvisionerConfig> {
    match ProvisionerConfig::from_env() {
        Ok(config) => Ok(config),
        Err(ConfigError::Missing(var)) if backend == BackendKind::Memory => {
            tracing::warn!(missing = var, "Provisioner not configured, using local defaults");
            Ok(ProvisionerConfig::local())
        }
        Err(e) => Err(e).context("Invalid provisioner configuration"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
