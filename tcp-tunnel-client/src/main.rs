//! tcp-tunnel-client — dials a tunnel server's carrier listener and
//! services logical streams against a private local service (spec.md §6).

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tunnel_core::dial::TcpDialer;
use tunnel_core::TunnelClient;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const COUNTERS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// tcp-tunnel-client — reverse TCP tunnel client
#[derive(Parser, Debug)]
#[command(name = "tcp-tunnel-client", version, about)]
struct Cli {
    /// Server carrier address
    #[arg(long = "remote", env = "TT_C_remove", default_value = "127.0.0.1:8090")]
    remote: String,

    /// Private service to tunnel
    #[arg(long = "local", env = "TT_C_local", default_value = "127.0.0.1:8128")]
    local: String,

    /// Advisory concurrency level. Kept for CLI compatibility; this
    /// implementation spawns one splice task per accepted stream rather
    /// than bounding a fixed worker pool.
    #[arg(long = "worker", env = "TT_C_worker", default_value_t = 3)]
    worker: u32,

    /// Shared secret. `"no"` or empty disables encryption.
    #[arg(long = "token", env = "TT_C_token", default_value = "hello:tcp-tunnel")]
    token: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        remote = %cli.remote,
        local = %cli.local,
        worker = cli.worker,
        "starting tcp-tunnel-client"
    );

    let server_dialer = TcpDialer::new(cli.remote, CONNECT_TIMEOUT);
    let local_dialer = TcpDialer::new(cli.local, CONNECT_TIMEOUT);
    let client = TunnelClient::new(server_dialer, local_dialer, cli.token);
    let counters = client.counters();
    let stop = client.stop_handle();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(COUNTERS_LOG_INTERVAL);
        loop {
            ticker.tick().await;
            match serde_json::to_string(&counters.snapshot()) {
                Ok(counters) => info!(%counters, "counters"),
                Err(err) => tracing::warn!(error = %err, "failed to serialize counters"),
            }
        }
    });

    tokio::select! {
        _ = client.run() => {}
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            stop.cancel();
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
