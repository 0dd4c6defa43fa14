//! Socket provisioning trait.
//!
//! The daemon does not bind sockets itself; it asks a [`SocketProvider`]
//! for a listener. This keeps the stale-socket and permission handling in
//! one place and lets tests hand the daemon sockets in temporary
//! directories.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tokio::net::UnixListener;

/// Error type for socket provider operations.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Failed to bind to the socket.
    #[error("failed to bind socket: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Socket path is invalid.
    #[error("invalid socket path: {0}")]
    InvalidPath(String),

    /// Another daemon answers on the socket path.
    #[error("daemon already running (socket {0} is in use)")]
    AlreadyRunning(String),

    /// Failed to create the socket directory.
    #[error("failed to create socket directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),
}

/// Trait for socket provider implementations.
pub trait SocketProvider: Send + Sync {
    /// Create and return a Unix socket listener.
    fn listen(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UnixListener, SocketError>> + Send + '_>>;

    /// Return the socket path (for logging/debugging).
    fn socket_path(&self) -> Option<&Path> {
        None
    }
}
