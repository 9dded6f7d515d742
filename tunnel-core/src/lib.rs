//! Tunnel endpoint logic: the client-side carrier dialer and per-stream
//! splice loop (spec.md §4.3), and the server-side dual-listener,
//! active-Mux registrar (spec.md §4.4). Built on [`tunnel_crypto`]'s link
//! layer and [`tunnel_mux`]'s stream multiplexer.

pub mod backoff;
pub mod client;
pub mod counters;
pub mod dial;
pub mod error;
pub mod handshake;
pub mod server;
pub mod splice;

pub use client::TunnelClient;
pub use counters::{CountersSnapshot, TunnelCounters};
pub use dial::{Dialer, DuplexDialer, TcpDialer};
pub use error::{Result, TunnelError};
pub use server::{BoundListeners, TunnelServer};
