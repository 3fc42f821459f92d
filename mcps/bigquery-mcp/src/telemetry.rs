//! Tracing setup
//!
//! Logs go to stderr only; stdout carries the MCP protocol.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the server process
///
/// `RUST_LOG` filters as usual. The configured level applies to this crate
/// and the gate. Set `LOG_FORMAT=json` for JSON lines.
pub fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let level = log_level.to_ascii_lowercase();
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("bigquery_mcp={}", level).parse()?)
        .add_directive(format!("query_gate={}", level).parse()?);

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }

    Ok(())
}
