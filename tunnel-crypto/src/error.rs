use thiserror::Error;

/// Errors produced by the link layer (key derivation, cipher wrapping, liveness probe).
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
