use std::io::ErrorKind;
use std::net::SocketAddr;

/// Errors that can occur in stream transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in the service-discovery substrate.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The advertised record or browse session silently died.
    /// Transient: listeners and browsers tear down and re-register
    /// instead of surfacing it.
    #[error("discovery session defunct: {0}")]
    Defunct(String),

    /// Failed to set up the discovery socket.
    #[error("discovery socket setup failed: {0}")]
    Socket(std::io::Error),

    /// An I/O error occurred while announcing or browsing.
    #[error("discovery I/O error: {0}")]
    Io(std::io::Error),

    /// Failed to encode or decode an announcement.
    #[error("announcement codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The discovery session has been cancelled.
    #[error("discovery cancelled")]
    Cancelled,
}

impl DiscoveryError {
    /// Transient failures are retried internally by listeners and
    /// browsers; everything else is surfaced once and is fatal.
    pub fn is_transient(&self) -> bool {
        matches!(self, DiscoveryError::Defunct(_))
    }

    /// Classify an announce/browse I/O error. Network-down conditions
    /// behave like a silently dying service record and are retried;
    /// anything else is fatal.
    pub fn from_session_io(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::NetworkDown
            | ErrorKind::NetworkUnreachable
            | ErrorKind::AddrNotAvailable
            | ErrorKind::NotConnected => DiscoveryError::Defunct(err.to_string()),
            _ => DiscoveryError::Io(err),
        }
    }
}
