//! tcp-tunnel-server — exposes a public listener backed by whichever
//! tunnel client currently holds the active carrier (spec.md §6).

use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tunnel_core::TunnelServer;

const COUNTERS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// tcp-tunnel-server — reverse TCP tunnel server
#[derive(Parser, Debug)]
#[command(name = "tcp-tunnel-server", version, about)]
struct Cli {
    /// Public listener, serviced by whatever the registered carrier
    /// tunnels to
    #[arg(long = "out", env = "TT_S_out", default_value = "127.0.0.1:8100")]
    out: String,

    /// Listener tunnel clients dial in to register a carrier
    #[arg(long = "in", env = "TT_S_in", default_value = ":8090")]
    r#in: String,

    /// Shared secret. `"no"` or empty disables encryption.
    #[arg(long = "token", env = "TT_S_token", default_value = "hello:tcp-tunnel")]
    token: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Go's `net.Listen` accepts a bare `:PORT` to mean "all interfaces";
/// Rust's `TcpListener::bind` needs a concrete host, so translate the
/// shorthand to the `0.0.0.0` equivalent.
fn normalize_bind_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
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

    let out_addr = normalize_bind_addr(&cli.out);
    let in_addr = normalize_bind_addr(&cli.r#in);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        out = %out_addr,
        r#in = %in_addr,
        "starting tcp-tunnel-server"
    );

    let server = TunnelServer::new(out_addr, in_addr, cli.token);
    let counters = server.counters();
    let stop = server.stop_handle();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(COUNTERS_LOG_INTERVAL);
        loop {
            ticker.tick().await;
            match serde_json::to_string(&counters.snapshot()) {
                Ok(counters) => info!(%counters, "counters"),
                Err(err) => error!(error = %err, "failed to serialize counters"),
            }
        }
    });

    tokio::select! {
        result = server.run() => {
            if let Err(err) = result {
                error!(error = %err, "server failed to start");
                std::process::exit(1);
            }
        }
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
