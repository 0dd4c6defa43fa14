//! Unix socket binding.
//!
//! Before the admin socket is replaced, a connection to it is attempted:
//! if something accepts, another daemon owns it and startup fails. The
//! read-only socket is always replaced.

use std::future::Future;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;

use credctl_core::{SocketError, SocketProvider};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

/// What to do with a socket file left at the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleSocket {
    /// Connect first; only remove the file if nobody answers.
    CheckOwner,
    /// Remove unconditionally.
    Replace,
}

/// Binds a Unix socket at a fixed path with owner-only permissions.
pub struct UnixSocketProvider {
    path: PathBuf,
    stale: StaleSocket,
}

impl UnixSocketProvider {
    pub fn new(path: impl Into<PathBuf>, stale: StaleSocket) -> Self {
        Self {
            path: path.into(),
            stale,
        }
    }

    /// Provider for the admin socket.
    pub fn admin(path: impl Into<PathBuf>) -> Self {
        Self::new(path, StaleSocket::CheckOwner)
    }

    /// Provider for the read-only socket.
    pub fn readonly(path: impl Into<PathBuf>) -> Self {
        Self::new(path, StaleSocket::Replace)
    }

    async fn bind(&self) -> Result<UnixListener, SocketError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| SocketError::InvalidPath(self.path.display().to_string()))?;

        if !parent.exists() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(parent)
                .map_err(SocketError::DirectoryCreationFailed)?;
            debug!(path = %parent.display(), "Created socket directory");
        }

        if self.path.exists() {
            if self.stale == StaleSocket::CheckOwner && UnixStream::connect(&self.path).await.is_ok() {
                return Err(SocketError::AlreadyRunning(self.path.display().to_string()));
            }
            std::fs::remove_file(&self.path).map_err(|e| {
                SocketError::BindFailed(std::io::Error::other(format!(
                    "failed to remove existing socket: {}",
                    e
                )))
            })?;
            debug!(path = %self.path.display(), "Removed stale socket");
        }

        let listener = UnixListener::bind(&self.path).map_err(SocketError::BindFailed)?;

        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).map_err(
            |e| {
                SocketError::BindFailed(std::io::Error::other(format!(
                    "failed to set socket permissions: {}",
                    e
                )))
            },
        )?;

        debug!(path = %self.path.display(), "Socket bound");
        Ok(listener)
    }
}

impl SocketProvider for UnixSocketProvider {
    fn listen(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UnixListener, SocketError>> + Send + '_>> {
        Box::pin(self.bind())
    }

    fn socket_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
