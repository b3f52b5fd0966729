use std::sync::Arc;

use sigpool_control_plane::features::capacity_table::repo::InMemoryCapacityTableRepository;
use sigpool_control_plane::shared::config::{ControlPlaneConfig, LogFormat, NotifierTargets};
use sigpool_control_plane::shared::types::{CapacitySlot, ProvisionRequest};
use sigpool_control_plane::{Collaborators, ControlPlane};
use sigpool_core::{BootstrapTemplate, DEFAULT_PLACEHOLDER};
use sigpool_providers::{
    http_matchmaker, HttpNotifierRepository, InMemoryNotifierRepository, InMemorySessionQueue,
    NotifierRepository, NotifierService, SimulatedComputeRepository,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "sigpool_control_plane=info,info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ControlPlaneConfig::from_env()?;
    init_tracing(config.log_format);

    info!("Starting sigpool control plane");

    let bootstrap = load_bootstrap(&config).await?;

    let notifier_repo: Arc<dyn NotifierRepository> = match &config.notifier {
        NotifierTargets::Http {
            keep_alive_url,
            session_details_url,
        } => {
            info!(%keep_alive_url, %session_details_url, "Using HTTP notifiers");
            Arc::new(HttpNotifierRepository::new(
                keep_alive_url.clone(),
                session_details_url.clone(),
                config.matchmaker_timeout,
            )?)
        }
        NotifierTargets::Local => {
            warn!("KEEP_ALIVE_URL and SESSION_DETAILS_URL not set, notifications are only recorded locally");
            Arc::new(InMemoryNotifierRepository::new())
        }
    };

    if config.matchmaker_client_secret.is_empty() {
        warn!("MATCHMAKER_CLIENT_SECRET is empty");
    }
    let matchmaker = http_matchmaker(
        config.matchmaker_url.clone(),
        config.matchmaker_client_secret.clone(),
        config.matchmaker_timeout,
    )?;

    warn!("No cloud compute adapter configured, launching into the simulated compute pool");
    let control_plane = ControlPlane::assemble(
        &config,
        bootstrap,
        Collaborators {
            queue: Arc::new(InMemorySessionQueue::new(config.queue_visibility_timeout)),
            matchmaker: Arc::new(matchmaker),
            notifier: Arc::new(NotifierService::new(notifier_repo)),
            compute: Arc::new(SimulatedComputeRepository::default()),
            slots: Arc::new(InMemoryCapacityTableRepository::new()),
        },
    )?;

    if let Some(path) = &config.slot_seed_file {
        let raw = tokio::fs::read_to_string(path).await?;
        let slots: Vec<CapacitySlot> = serde_json::from_str(&raw)?;
        let report = control_plane
            .capacity
            .seed(slots, config.clear_slots_on_seed)
            .await?;
        info!(path = %path.display(), added = report.added, skipped = report.skipped, "Capacity table seeded");
    }

    if config.bulk_fill_on_start {
        let response = control_plane
            .provision
            .invoke(ProvisionRequest::bulk_fill())
            .await;
        if response.is_success() {
            info!(limit = config.concurrency_limit, "Initial bulk fill issued");
        } else {
            warn!(status = response.status_code, body = %response.body, "Initial bulk fill failed");
        }
    }

    let polling = if config.dispatch_interval.is_zero() {
        info!("DISPATCH_INTERVAL_SECS is 0, scheduled dispatch disabled");
        None
    } else {
        Some(control_plane.dispatch.clone().spawn_periodic_polling())
    };

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(listen_addr = %config.listen_addr, "Control plane initialized successfully");

    axum::serve(listener, control_plane.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = polling {
        handle.abort();
    }
    info!("Control plane stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn load_bootstrap(
    config: &ControlPlaneConfig,
) -> Result<BootstrapTemplate, Box<dyn std::error::Error>> {
    let template = match &config.bootstrap_template_file {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            BootstrapTemplate::new(text, config.bootstrap_placeholder.clone())?
        }
        None => {
            if config.bootstrap_placeholder != DEFAULT_PLACEHOLDER {
                warn!("BOOTSTRAP_PLACEHOLDER ignored without BOOTSTRAP_TEMPLATE_FILE");
            }
            BootstrapTemplate::default()
        }
    };
    Ok(template)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
