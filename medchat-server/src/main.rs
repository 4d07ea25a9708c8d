use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use medchat_server::config::{self, ServerConfig};
use medchat_server::messaging::ChatHub;
use medchat_server::network::{self, AppState};
use medchat_server::storage::{self, SqliteMessageStore};
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Parser)]
#[command(
    name = "medchat-server",
    version,
    about = "Realtime patient/doctor messaging server"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Overrides `bind_addr` from the config file
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
    /// Overrides `database_path` from the config file
    #[arg(long, value_name = "FILE")]
    database: Option<String>,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Write the effective config to the config path and exit
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut server_config = config::load_config(&cli.config);
    if let Some(bind) = cli.bind {
        server_config.bind_addr = bind;
    }
    if let Some(database) = cli.database {
        server_config.database_path = database;
    }

    if cli.mode == Some(Mode::InitConfig) {
        config::save_config(&cli.config, &server_config)?;
        log::info!("Wrote config to {}", cli.config);
        return Ok(());
    }

    run(server_config).await
}

async fn run(server_config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Starting medchat server...");

    let database_path = Path::new(&server_config.database_path);
    storage::ensure_data_dir(database_path)?;
    let store = SqliteMessageStore::open(database_path)?;
    log::info!(
        "Message store at {} holds {} messages",
        database_path.display(),
        store.message_count()?
    );

    let hub = ChatHub::init(Arc::new(store), server_config.hub_settings());
    hub.spawn_stats_logger(server_config.stats_interval());

    let listener = TcpListener::bind(&server_config.bind_addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    let state = AppState::new(Arc::clone(&hub), &server_config);
    let shutdown = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {err}");
            std::future::pending::<()>().await;
        }
        log::info!("Received shutdown signal, stopping server...");
    };

    let drain_hub = Arc::clone(&hub);
    let result = network::serve(listener, state, async move {
        shutdown.await;
        drain_hub.shutdown();
    })
    .await;
    if let Err(err) = result {
        log::error!("Server error: {err}");
    }

    let stats = hub.stats();
    log::info!(
        "Final statistics: {} connections, {} online users",
        stats.connections,
        stats.online_users
    );

    Ok(())
}
