use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relay_server::ServerConfig;
use relay_telemetry::{parse_module_level, TelemetryConfig};
use tracing::Level;

/// Relay HTTP commands to connected game clients over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about)]
struct Cli {
    /// Port for both the HTTP API and the game-client WebSocket.
    #[arg(long, env = "RELAY_PORT", default_value_t = 8080)]
    port: u16,

    /// Per-client deadline for a dispatched command, in milliseconds.
    #[arg(long, env = "RELAY_TIMEOUT_MS", default_value_t = 3000)]
    timeout_ms: u64,

    /// Time a new client has to report its player name, in milliseconds.
    #[arg(long, env = "RELAY_HANDSHAKE_TIMEOUT_MS", default_value_t = 5000)]
    handshake_timeout_ms: u64,

    /// Interval between WebSocket pings sent to each client, in milliseconds.
    #[arg(long, env = "RELAY_HEARTBEAT_INTERVAL_MS", default_value_t = 30_000)]
    heartbeat_interval_ms: u64,

    /// A client silent for this long is disconnected, in milliseconds.
    #[arg(long, env = "RELAY_CLIENT_TIMEOUT_MS", default_value_t = 90_000)]
    client_timeout_ms: u64,

    /// Outgoing frames buffered per client before sends fail.
    #[arg(long, env = "RELAY_MAX_SEND_QUEUE", default_value_t = 256)]
    max_send_queue: usize,

    /// Default log level (RUST_LOG takes precedence).
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Per-module level override, e.g. `relay_server=debug`. Repeatable.
    #[arg(long = "module-level", value_parser = parse_module_level)]
    module_levels: Vec<(String, Level)>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "RELAY_JSON_LOGS")]
    json_logs: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            command_timeout: Duration::from_millis(self.timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            client_timeout: Duration::from_millis(self.client_timeout_ms),
            max_send_queue: self.max_send_queue,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = relay_telemetry::init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        module_levels: cli.module_levels.clone(),
        json: cli.json_logs,
    });

    tracing::info!("Starting command relay");

    let config = cli.server_config();
    let port = config.port;
    let handle = relay_server::start(config, telemetry.metrics())
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    tracing::info!(port = handle.port, "Command relay ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
