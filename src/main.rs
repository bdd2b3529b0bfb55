//! # Pipes Main Entry Point
//!
//! `pipes serve` (the default) runs the API with the run workers, the queue
//! worker and autosync. `pipes migrate` applies migrations and exits.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pipes::alerting::TracingAlerter;
use pipes::auth::WorkspaceResolver;
use pipes::authorization::AuthorizationService;
use pipes::config::{AppConfig, ConfigLoader};
use pipes::crypto::CryptoKey;
use pipes::integrations::{IntegrationCatalog, VendorRegistry};
use pipes::locks::TenantLocks;
use pipes::oauth::ConfigOAuthProvider;
use pipes::platform::{HttpPlatformClient, PlatformClient};
use pipes::repositories::{
    AuthorizationRepository, IdMappingRepository, ImportRepository, PipeRepository,
    QueueRepository,
};
use pipes::scheduler::{Autosync, QueueWorker, RunExecutor, RunScheduler};
use pipes::server::{AppState, run_server};
use pipes::service::PipesService;
use pipes::sync::PipeSyncService;
use pipes::{db, telemetry};

#[derive(Debug, Parser)]
#[command(name = "pipes", version, about = "Pipes synchronization service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API and background workers
    Serve,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    telemetry::init_tracing(&config)?;

    info!(profile = %config.profile, "configuration loaded");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "effective configuration");
    }

    let db = db::init_pool(&config).await?;
    db::migrate(&db).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            info!("migrations applied");
            Ok(())
        }
        Command::Serve => serve(config, db).await,
    }
}

async fn serve(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let db = Arc::new(db);
    let shutdown = CancellationToken::new();

    let catalog = Arc::new(
        IntegrationCatalog::load(&config.integrations_path)
            .context("failed to load integration catalog")?,
    );
    let vendor_http = reqwest::Client::builder()
        .user_agent("pipes-sync")
        .timeout(std::time::Duration::from_secs(config.platform.timeout_seconds))
        .build()?;
    let registry = Arc::new(VendorRegistry::with_bundled_adapters(vendor_http));
    registry.verify_catalog(&catalog)?;

    let oauth_http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let oauth = Arc::new(ConfigOAuthProvider::new(
        config.oauth2.clone(),
        config.oauth1.clone(),
        oauth_http,
    ));
    let platform: Arc<dyn PlatformClient> = Arc::new(HttpPlatformClient::new(&config.platform)?);

    let crypto_key = CryptoKey::new(config.crypto_key.clone().unwrap_or_default())?;
    let pipes = PipeRepository::new(db.clone());
    let imports = ImportRepository::new(db.clone());
    let mappings = IdMappingRepository::new(db.clone());
    let queue = QueueRepository::new(db.clone());
    let authorizations = AuthorizationService::new(
        AuthorizationRepository::new(db.clone(), crypto_key),
        pipes.clone(),
        mappings.clone(),
        catalog.clone(),
        oauth,
    );

    let sync = PipeSyncService::new(
        pipes.clone(),
        imports.clone(),
        mappings.clone(),
        authorizations.clone(),
        registry.clone(),
        platform.clone(),
        Arc::new(TracingAlerter),
        config.pipes_api_host.clone(),
    );
    let executor = Arc::new(RunExecutor::new(sync, TenantLocks::new()));
    let (scheduler, mut tasks) = RunScheduler::start(
        executor.clone(),
        queue.clone(),
        pipes.clone(),
        &config.worker,
        shutdown.clone(),
    );

    let queue_worker = QueueWorker::new(executor.clone(), queue.clone(), pipes.clone(), &config.worker);
    tasks.push(tokio::spawn(queue_worker.run(shutdown.clone())));
    if config.autosync.enabled {
        let autosync = Autosync::new(queue, pipes.clone(), &config.autosync);
        tasks.push(tokio::spawn(autosync.run(shutdown.clone())));
    }

    let service = PipesService::new(
        db,
        pipes,
        imports,
        mappings,
        authorizations,
        catalog,
        registry,
        platform.clone(),
        executor,
        scheduler,
    );
    let state = AppState {
        workspaces: Arc::new(WorkspaceResolver::new(platform, config.workspace_cache_size)),
        config,
        service,
    };

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        signal_token.cancel();
    });

    let result = run_server(state, shutdown.clone()).await;
    shutdown.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            error!(error = %err, "background task ended abnormally");
        }
    }
    result
}
