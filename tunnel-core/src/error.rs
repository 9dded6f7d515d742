use thiserror::Error;

/// Errors surfaced by the tunnel endpoints. Composes the lower-layer crates'
/// error types via `#[from]` so a `?` anywhere below lands here.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] tunnel_crypto::CryptoError),

    #[error(transparent)]
    Mux(#[from] tunnel_mux::MuxError),

    #[error("dial to {addr} failed: {source}")]
    DialFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake with {peer} failed: {reason}")]
    HandshakeFailed { peer: String, reason: String },

    #[error("carrier is dead: {0}")]
    CarrierDead(String),

    #[error("listener failed to bind {addr}: {source}")]
    ListenerFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TunnelError>;
