//! Tunnel endpoint, client side (spec.md §4.3).
//!
//! A single carrier-dialer loop repeatedly dials the server, handshakes,
//! and hands the resulting carrier to an initiator [`Mux`]. While that
//! carrier lives, it repeatedly `accept`s streams and spawns a splice task
//! per stream against a freshly dialed local service connection. Losing the
//! carrier (an `accept` failure) tears the Mux down and re-enters the
//! dial loop with backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tunnel_crypto::MaybeCiphered;
use tunnel_mux::{Mux, Role};

use crate::backoff::backoff_delay;
use crate::counters::TunnelCounters;
use crate::dial::Dialer;
use crate::handshake::client_handshake;
use crate::splice::splice;

pub struct TunnelClient<D, L> {
    server_dialer: D,
    local_dialer: L,
    token: String,
    counters: Arc<TunnelCounters>,
    stop: CancellationToken,
}

impl<D, L> TunnelClient<D, L>
where
    D: Dialer + 'static,
    L: Dialer + Clone + 'static,
{
    pub fn new(server_dialer: D, local_dialer: L, token: impl Into<String>) -> Self {
        Self {
            server_dialer,
            local_dialer,
            token: token.into(),
            counters: TunnelCounters::new(),
            stop: CancellationToken::new(),
        }
    }

    pub fn counters(&self) -> Arc<TunnelCounters> {
        self.counters.clone()
    }

    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run the carrier-dialer loop until `stop` is cancelled. Normally
    /// never returns `Err`; it only stops retrying when cancelled.
    pub async fn run(self) {
        let mut attempt: u32 = 0;
        while !self.stop.is_cancelled() {
            match self.run_one_carrier().await {
                Ok(()) => attempt = 0,
                Err(err) => {
                    tracing::warn!(error = %err, attempt, "carrier dropped, retrying");
                    let delay = backoff_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.stop.cancelled() => break,
                    }
                }
            }
        }
    }

    async fn run_one_carrier(&self) -> std::io::Result<()> {
        let raw = self.server_dialer.dial().await?;
        let mut carrier = MaybeCiphered::wrap(raw, &self.token);
        client_handshake(&mut carrier)
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
        self.counters.inc_carriers_created();

        let mux = Mux::new(carrier, Role::Initiator);
        tracing::info!("carrier established, servicing incoming streams");

        loop {
            let stream = tokio::select! {
                result = mux.accept() => result,
                _ = self.stop.cancelled() => {
                    mux.close();
                    return Ok(());
                }
            };
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "mux accept failed, carrier is done");
                    return Ok(());
                }
            };
            self.counters.inc_streams_created();

            let local_dialer = self.local_dialer.clone();
            let counters = self.counters.clone();
            tokio::spawn(async move {
                match local_dialer.dial().await {
                    Ok(local) => splice(stream, local).await,
                    Err(err) => {
                        tracing::warn!(error = %err, "dial to local service failed");
                        counters.inc_streams_io_errors();
                    }
                }
            });
        }
    }
}

#[allow(dead_code)]
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
