use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use devlab::cli::{format_dry_run, Args};
use devlab::config::Config;
use devlab::controllers::{
    spawn_reaper, spawn_route_controller, spawn_supervisor, HealthSupervisor, LifecycleReaper,
    RouteController,
};
use devlab::notify::{spawn_dispatcher, LogSink, Notifier};
use devlab::persistence::{spawn_save_loop, SaveSignal, Store};
use devlab::provisioner::http::{resolve_base_url, HttpProvisioner};
use devlab::registry::Registry;
use devlab::server::{spawn_server, AppState};
use devlab::workflow::Engine;

/// How long shutdown waits for in-flight workflows
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        dotenvy::from_path(env_file)
            .with_context(|| format!("Failed to load env file {}", env_file.display()))?;
    }

    let mut config = Config::load(args.config.as_deref()).context("Failed to load config")?;
    args.apply(&mut config);
    config.validate().context("Invalid config")?;

    let base_url = resolve_base_url(
        &config.provisioner.protocol,
        &config.provisioner.endpoint,
        |key| std::env::var(key).ok(),
    )?;

    if args.dry_run {
        println!("{}", format_dry_run(&config, &base_url));
        return Ok(());
    }

    // Registry and saved state
    let registry = Arc::new(Registry::new());
    let store = Arc::new(Store::new(
        config.state_path(),
        registry.clone(),
        config.port_range(),
    ));
    if store
        .load()
        .await
        .with_context(|| format!("Failed to load state from {}", store.path().display()))?
    {
        info!(
            nodes = registry.node_count(),
            accounts = registry.account_count(),
            "Restored saved state"
        );
    }

    let provisioner = HttpProvisioner::new(
        base_url,
        Duration::from_secs(config.provisioner.timeout_secs),
    )?;

    let cancel = CancellationToken::new();
    let (notifier, notifications) = Notifier::new(config.notification.queue_size);
    let notifier = notifier.with_domain(config.notification.domain.clone());
    let (saver, save_requests) = SaveSignal::new();

    let engine = Engine::new(
        &config,
        registry.clone(),
        Arc::new(provisioner),
        notifier,
        saver,
    )?;
    engine.initialize_admin().await;

    // Background tasks
    let mut handles = vec![
        spawn_dispatcher(notifications, Arc::new(LogSink), cancel.clone()),
        spawn_save_loop(
            store.clone(),
            save_requests,
            Duration::from_secs(config.persistence.sync_period_secs.max(1)),
            cancel.clone(),
        ),
        spawn_reaper(
            LifecycleReaper::new(engine.clone(), config.lifecycle.clone()),
            cancel.clone(),
        ),
        spawn_supervisor(
            HealthSupervisor::new(engine.clone(), config.supervisor.clone()),
            cancel.clone(),
        ),
        spawn_route_controller(
            RouteController::new(engine.clone(), config.network.clone()),
            cancel.clone(),
        ),
    ];

    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let (local, server) = spawn_server(&addr, AppState::new(engine.clone()), cancel.clone())
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    handles.push(server);

    info!("devlab running, introspection on {}", local);
    info!("Endpoints:");
    info!("  GET  /health    - Health check");
    info!("  GET  /v1/status - Task and registry counts");
    info!("  GET  /v1/nodes  - Node summaries");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    engine.tasks().cancel_all();
    if !engine.tasks().wait_idle(DRAIN_TIMEOUT).await {
        warn!(
            outstanding = engine.outstanding_tasks(),
            "Workflows still running at shutdown"
        );
    }

    // Request a last save so the loop's final write is current
    engine.saver().notify();
    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}
