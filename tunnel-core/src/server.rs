//! Tunnel endpoint, server side (spec.md §4.4).
//!
//! Two independent accept loops: `ListenOut` (the public-facing port) and
//! `ListenClient` (where tunnel clients dial in to register a carrier).
//! The single active carrier lives behind an [`ArcSwapOption`] -- a
//! lock-free, atomically-swappable cell matching §9's "single-word
//! atomically-swappable cell" design note -- and a `summoning` signal
//! ([`tokio::sync::Notify`], a capacity-one non-blocking mailbox) lets an
//! external handler starved for a carrier nudge the registration side to
//! hurry up.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tunnel_crypto::{is_bad_conn, MaybeCiphered};
use tunnel_mux::{Mux, Role};

use crate::counters::TunnelCounters;
use crate::error::{Result, TunnelError};
use crate::handshake::server_handshake;
use crate::splice::splice;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const EXTERNAL_RETRY_BACKOFF: Duration = Duration::from_millis(100);
const EXTERNAL_RETRY_ATTEMPTS: u32 = 3;
const LIVENESS_TICK: Duration = Duration::from_secs(1);

pub struct TunnelServer {
    out_addr: String,
    in_addr: String,
    token: String,
    counters: Arc<TunnelCounters>,
    active_mux: ArcSwapOption<Mux>,
    summon: Notify,
    stop: CancellationToken,
}

/// The two bound listeners, returned separately from [`TunnelServer::bind`]
/// so callers (tests in particular) can read back the actual addresses
/// before the accept loops start, e.g. when the configured port is `:0`.
pub struct BoundListeners {
    pub out_listener: TcpListener,
    pub in_listener: TcpListener,
}

impl TunnelServer {
    pub fn new(
        out_addr: impl Into<String>,
        in_addr: impl Into<String>,
        token: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            out_addr: out_addr.into(),
            in_addr: in_addr.into(),
            token: token.into(),
            counters: TunnelCounters::new(),
            active_mux: ArcSwapOption::empty(),
            summon: Notify::new(),
            stop: CancellationToken::new(),
        })
    }

    pub fn counters(&self) -> Arc<TunnelCounters> {
        self.counters.clone()
    }

    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// For tests and diagnostics: whether a carrier is currently active.
    pub fn has_active_mux(&self) -> bool {
        self.active_mux.load().is_some()
    }

    /// For tests and diagnostics: an opaque identity for the currently
    /// active carrier, suitable only for equality comparison (e.g.
    /// detecting that a reconnect swapped in a new carrier). Not a
    /// meaningful address once the underlying `Mux` is dropped.
    pub fn active_mux_identity(&self) -> Option<usize> {
        self.active_mux
            .load()
            .as_ref()
            .map(|mux| Arc::as_ptr(mux) as usize)
    }

    pub async fn bind(&self) -> Result<BoundListeners> {
        let out_listener =
            TcpListener::bind(&self.out_addr)
                .await
                .map_err(|source| TunnelError::ListenerFailed {
                    addr: self.out_addr.clone(),
                    source,
                })?;
        let in_listener =
            TcpListener::bind(&self.in_addr)
                .await
                .map_err(|source| TunnelError::ListenerFailed {
                    addr: self.in_addr.clone(),
                    source,
                })?;
        Ok(BoundListeners {
            out_listener,
            in_listener,
        })
    }

    /// Run both accept loops over already-bound listeners until `stop` is
    /// cancelled.
    pub async fn serve(self: Arc<Self>, listeners: BoundListeners) {
        let out_self = self.clone();
        let out_loop = tokio::spawn(out_self.accept_external_loop(listeners.out_listener));
        let in_self = self.clone();
        let in_loop = tokio::spawn(in_self.accept_client_loop(listeners.in_listener));

        tokio::select! {
            _ = self.stop.cancelled() => {}
            result = out_loop => { result.ok(); }
            result = in_loop => { result.ok(); }
        }
    }

    /// Convenience entry point for the CLI binary: bind then serve.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listeners = self.bind().await?;
        self.serve(listeners).await;
        Ok(())
    }

    async fn accept_external_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((conn, _addr)) => {
                            let this = self.clone();
                            tokio::spawn(this.handle_external(conn));
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to accept external connection");
                        }
                    }
                }
                _ = self.stop.cancelled() => return,
            }
        }
    }

    async fn accept_client_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((conn, _addr)) => {
                            let this = self.clone();
                            tokio::spawn(this.register_client_carrier(conn));
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to accept client carrier connection");
                        }
                    }
                }
                _ = self.stop.cancelled() => return,
            }
        }
    }

    /// §4.4 "External request handling": up to three attempts to snapshot
    /// the active Mux and open a stream on it, interleaved with a
    /// 100ms/attempt backoff and a `summoning` nudge when no carrier is
    /// registered yet.
    async fn handle_external(self: Arc<Self>, conn: TcpStream) {
        self.counters.inc_active_external_conns();
        let mut serviced = false;

        for _attempt in 0..EXTERNAL_RETRY_ATTEMPTS {
            if self.stop.is_cancelled() {
                break;
            }
            let snapshot = self.active_mux.load_full();
            match snapshot {
                None => {
                    self.summon.notify_one();
                    tokio::select! {
                        _ = tokio::time::sleep(EXTERNAL_RETRY_BACKOFF) => {}
                        _ = self.stop.cancelled() => break,
                    }
                }
                Some(mux) => match mux.open() {
                    Ok(stream) => {
                        self.counters.inc_streams_created();
                        splice(conn, stream).await;
                        serviced = true;
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "open on active mux failed, presumed dead");
                        self.retire_if_current(&mux);
                        self.summon.notify_one();
                    }
                },
            }
        }

        if !serviced {
            tracing::error!("no active carrier available after retries, closing external connection");
        }
        self.counters.dec_active_external_conns();
    }

    /// §4.4 "Carrier registration": Link Layer wrap, bounded handshake,
    /// a liveness check performed on the raw socket while it is still
    /// ours to peek at (before the Mux's reader task takes exclusive
    /// ownership of the read half), then publish as the active carrier.
    async fn register_client_carrier(self: Arc<Self>, conn: TcpStream) {
        let mut carrier = MaybeCiphered::wrap(conn, &self.token);

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, server_handshake(&mut carrier)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "client handshake failed, dropping carrier");
                return;
            }
            Err(_) => {
                tracing::warn!("client handshake timed out, dropping carrier");
                return;
            }
        }

        match is_bad_conn(carrier.get_ref()) {
            Ok(true) => {
                tracing::warn!("carrier failed liveness check before publish, dropping");
                return;
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, "liveness check errored, dropping carrier");
                return;
            }
        }

        let new_mux = Arc::new(Mux::new(carrier, Role::Acceptor));
        let previous = self.active_mux.swap(Some(new_mux.clone()));
        if let Some(previous) = previous {
            previous.close();
        }
        self.counters.inc_carriers_created();
        self.counters.set_active_client_carriers(1);
        tracing::info!("carrier published as the active mux");

        // Once the Mux owns the socket, nothing outside it may read from
        // the carrier, so liveness is observed through the Mux's own
        // bookkeeping (its reader/writer tasks flip `is_closed` the
        // moment they see EOF or an I/O error) rather than a second peek
        // racing the frame reader for bytes.
        let mut ticker = tokio::time::interval(LIVENESS_TICK);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if new_mux.is_closed() {
                        break;
                    }
                }
                _ = self.summon.notified() => {
                    // A starved external handler announced demand. If this
                    // carrier has already died we'd otherwise sit on it
                    // until the next liveness tick before the slot frees up
                    // for a fresher registration; check now instead of
                    // waiting out the tick.
                    if new_mux.is_closed() {
                        break;
                    }
                }
                _ = self.stop.cancelled() => {
                    new_mux.close();
                    break;
                }
            }
        }

        self.retire_if_current(&new_mux);
    }

    fn retire_if_current(&self, mux: &Arc<Mux>) {
        let should_clear = self
            .active_mux
            .load()
            .as_ref()
            .map(|current| Arc::ptr_eq(current, mux))
            .unwrap_or(false);
        if should_clear {
            self.active_mux.store(None);
            self.counters.set_active_client_carriers(0);
        }
    }
}
