//! Infrastructure errors of the server process.
//!
//! Request-level failures are `shared::GameError` and go back to the client;
//! these are the ones that stop a listener or refuse to start.

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding, accepting or handshake failures
    #[error("Network error: {0}")]
    Network(String),

    /// Unreadable or invalid configuration
    #[error("Config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Network(e.to_string())
    }
}
