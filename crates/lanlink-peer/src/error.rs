use lanlink_frame::FrameError;
use lanlink_transport::{DiscoveryError, TransportError};

/// Errors that can occur in peer connection, listener, and browser
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame codec error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Discovery substrate error.
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// `send` was called before the connection reached `Ready`.
    #[error("connection is not ready")]
    NotReady,

    /// The operation is invalid in the current lifecycle state.
    #[error("invalid lifecycle state: {0}")]
    InvalidState(&'static str),

    /// The handle is terminal and must be replaced, never revived.
    #[error("handle is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, PeerError>;
