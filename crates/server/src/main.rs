use std::path::Path;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use vault_core::OwnerId;
use vault_engine::{TicketSweeper, Vault, VaultBuilder};
use vault_server::config::VaultConfig;
use vault_server::error::ServerError;
use vault_server::{store_factory, telemetry};

/// File Vault storage daemon and maintenance tool.
#[derive(Parser, Debug)]
#[command(name = "vault-server", about = "Deduplicating file storage engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "vault.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the background worker and ticket sweeper until interrupted (default).
    Run,
    /// Run database migrations for the configured metadata backend, then exit.
    Migrate,
    /// Remove expired download tickets once, then exit.
    Sweep,
    /// Print storage statistics as JSON.
    Stats {
        /// Also report the storage attributed to this owner.
        #[arg(long)]
        owner: Option<uuid::Uuid>,

        /// Number of most-shared contents to list.
        #[arg(long, default_value_t = 10)]
        duplicates: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from TOML file, or use defaults if the file does not exist.
    let config_exists = Path::new(&cli.config).exists();
    let config: VaultConfig = if config_exists {
        let contents = std::fs::read_to_string(&cli.config)?;
        toml::from_str(&contents)?
    } else {
        toml::from_str("")?
    };

    telemetry::init(&config.logging);

    if !config_exists {
        info!(path = %cli.config, "config file not found, using defaults");
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config).await?,
        Commands::Migrate => run_migrate(&config).await?,
        Commands::Sweep => run_sweep(&config).await?,
        Commands::Stats { owner, duplicates } => {
            run_stats(&config, owner.map(OwnerId::from_uuid), duplicates).await?;
        }
    }
    Ok(())
}

async fn build_vault(
    config: &VaultConfig,
) -> Result<(Vault, vault_engine::BackgroundWorker), ServerError> {
    let store = store_factory::create_metadata_store(&config.metadata).await?;
    let blobs = store_factory::create_blob_store(&config.storage).await?;
    Ok(VaultBuilder::new()
        .metadata_store(store)
        .blob_store(blobs)
        .config(config.engine())
        .build()?)
}

/// Run the long-lived maintenance tasks until SIGINT or SIGTERM.
async fn run(config: &VaultConfig) -> Result<(), ServerError> {
    let (vault, worker) = build_vault(config).await?;

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    tracker.spawn(worker.run(shutdown.clone()));
    tracker.spawn(TicketSweeper::new(vault.clone()).run(shutdown.clone()));
    tracker.close();

    info!(
        backend = %config.metadata.backend,
        root = %config.storage.root.display(),
        "vault server running"
    );

    shutdown_signal().await;
    vault.wait_for_uploads().await;
    shutdown.cancel();
    tracker.wait().await;

    let metrics = vault.metrics().snapshot();
    info!(
        uploads = metrics.uploads,
        deletes = metrics.deletes,
        blobs_deleted = metrics.blobs_deleted,
        tickets_swept = metrics.tickets_swept,
        jobs_dropped = metrics.jobs_dropped,
        "vault server stopped"
    );
    Ok(())
}

async fn run_migrate(config: &VaultConfig) -> Result<(), ServerError> {
    info!(backend = %config.metadata.backend, "running metadata backend migrations...");
    let _store = store_factory::create_metadata_store(&config.metadata).await?;
    info!(backend = %config.metadata.backend, "all migrations complete");
    Ok(())
}

/// Refuse one-shot commands that would only see a fresh, empty catalog.
fn require_persistent(config: &VaultConfig, command: &str) -> Result<(), ServerError> {
    if config.metadata.is_persistent() {
        return Ok(());
    }
    Err(ServerError::Config(format!(
        "`{command}` requires a persistent metadata backend, but [metadata] backend is \"{}\"",
        config.metadata.backend
    )))
}

async fn run_sweep(config: &VaultConfig) -> Result<(), ServerError> {
    require_persistent(config, "sweep")?;
    let (vault, _worker) = build_vault(config).await?;
    let removed = TicketSweeper::new(vault).sweep_once().await?;
    info!(removed, "sweep complete");
    Ok(())
}

async fn run_stats(
    config: &VaultConfig,
    owner: Option<OwnerId>,
    duplicates: u32,
) -> Result<(), ServerError> {
    require_persistent(config, "stats")?;
    let (vault, _worker) = build_vault(config).await?;

    let global = vault.storage_stats().await?;
    let owner_stats = match owner {
        Some(owner) => Some(vault.owner_storage_stats(owner).await?),
        None => None,
    };
    let shared = vault.duplicate_contents(duplicates, 0).await?;

    let report = serde_json::json!({
        "global": global,
        "owner": owner_stats,
        "duplicates": shared,
    });
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|e| ServerError::Config(format!("failed to render stats: {e}")))?;
    println!("{rendered}");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
