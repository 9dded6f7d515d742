//! Link layer for the reverse TCP tunnel: symmetric stream encryption over a
//! raw carrier connection, plus a non-blocking liveness probe.
//!
//! This crate has exactly one job: make an arbitrary [`tokio::net::TcpStream`]
//! look like a confidential byte stream to the layer above (`tunnel-mux`),
//! and tell callers when a carrier has gone bad before they waste an
//! `accept()` on it. It has no notion of frames, streams, or handshakes —
//! those live in `tunnel-mux` and `tunnel-core` respectively.

pub mod cipher;
pub mod error;
pub mod key;
pub mod liveness;

pub use cipher::MaybeCiphered;
pub use error::{CryptoError, Result};
pub use liveness::is_bad_conn;
