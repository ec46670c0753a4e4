#![warn(clippy::all)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use vigil_hub::database::{LibsqlStore, initialize_database};
use vigil_hub::notify::{LogNotifier, Notifier, WebhookNotifier};
use vigil_hub::{Config, Hub, HubError, HubSettings, pool};

#[derive(Parser)]
#[command(name = "vigil-hub", version, about = "Coordinates validator agents and aggregates their checks")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(long, env = "VIGIL_BIND")]
    bind: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(long, env = "VIGIL_PORT")]
    port: Option<u16>,

    /// Database file (overrides the config file)
    #[arg(long, env = "VIGIL_DATABASE")]
    database: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), HubError> {
    logger::init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_config(cli.config.as_ref())?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    if cli.show_config {
        println!("{config}");
        return Ok(());
    }

    run(config).await
}

async fn run(config: Config) -> Result<(), HubError> {
    info!("Starting vigil-hub (protocol {})", vigil::PROTOCOL_VERSION);
    info!("Opening database at {}", config.database.path);
    let pool = pool::open_pool(&config.database.path, config.database.max_connections).await?;
    {
        let conn = pool.get().await.map_err(|e| anyhow::anyhow!("Failed to get connection: {e}"))?;
        initialize_database(&conn).await?;
    }
    let store = Arc::new(LibsqlStore::new_from_pool(pool));

    let notifier: Arc<dyn Notifier> = match config.alerts.webhook_url.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(url)?),
        None => {
            warn!("No alert webhook configured, outages will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let hub = Hub::new(HubSettings::from(&config), store, notifier).await?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    hub.run(listener, shutdown_rx).await?;
    info!("Hub shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
