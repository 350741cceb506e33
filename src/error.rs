use thiserror::Error;

/// Unified error type for the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Obfuscated2 handshake error (malformed frame, wrong secret, short write)
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Backend dial error (unknown datacenter, unreachable, connect timeout)
    #[error("Dial error: {0}")]
    Dial(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<hex::FromHexError> for ProxyError {
    fn from(err: hex::FromHexError) -> Self {
        ProxyError::Config(format!("invalid hex: {}", err))
    }
}
