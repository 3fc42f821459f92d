//! BigQuery MCP - read-only BigQuery access over stdio

use std::sync::Arc;

use bigquery_mcp::{config, telemetry, BigQueryMcpServer, Cli, RestBackend, ServerState};
use clap::Parser;
use rmcp::ServiceExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(&cli)?;

    if cli.check_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    telemetry::init_tracing(&config.logging.log_level)?;
    tracing::info!(
        "Starting {} v{}",
        config.server_name,
        config.server_version
    );
    config.log_summary();

    let backend = Arc::new(RestBackend::new(config.service_account_path.clone())?);
    let state = Arc::new(ServerState::new(config, backend)?);

    #[cfg(unix)]
    spawn_reload_listener(cli.clone(), Arc::clone(&state))?;

    let server = BigQueryMcpServer::new(state);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Re-read the configuration on SIGHUP
#[cfg(unix)]
fn spawn_reload_listener(cli: Cli, state: Arc<ServerState>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            let reloaded = config::load(&cli).and_then(|config| state.reload(config));
            if let Err(e) = reloaded {
                tracing::warn!("Reload failed, keeping the current configuration: {}", e);
            }
        }
    });
    Ok(())
}
