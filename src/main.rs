use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parley_server::{ChatServer, ServerConfig, StoreConfig};
use parley_store::{Database, SqliteMessageStore};
use parley_telemetry::TelemetryConfig;

/// Multi-client WebSocket chat server with a persistent message log.
#[derive(Parser, Debug)]
#[command(name = "parley", version)]
struct Cli {
    /// Host to bind (overrides PARLEY_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides PARLEY_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Database URL, e.g. sqlite://parley.db (overrides DATABASE_URL).
    #[arg(long)]
    database_url: Option<String>,

    /// Default log level (RUST_LOG takes precedence).
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Per-module level override, e.g. `parley_store=debug`. Repeatable.
    #[arg(long = "log-module", value_parser = parley_telemetry::parse_module_level)]
    log_modules: Vec<(String, tracing::Level)>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    parley_telemetry::init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        module_levels: cli.log_modules,
        json: cli.log_json,
    });

    let mut server_config = ServerConfig::from_env();
    if let Some(host) = cli.host {
        server_config.host = host;
    }
    if let Some(port) = cli.port {
        server_config.port = port;
    }
    let mut store_config = StoreConfig::from_env();
    if let Some(url) = cli.database_url {
        store_config.database_url = url;
    }

    let db = Database::from_url(&store_config.database_url)
        .with_context(|| format!("failed to open database {}", store_config.database_url))?;
    tracing::info!(path = %db.path().display(), "database opened");

    let server = ChatServer::new(server_config, Arc::new(SqliteMessageStore::new(db)));
    let (addr, handle) = server
        .listen()
        .await
        .context("failed to bind listener")?;
    tracing::info!(%addr, "parley ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    let closed = server.registry().close_all();
    tracing::info!(closed, "sessions closed");
    server.shutdown().graceful_shutdown(vec![handle], None).await;

    Ok(())
}
