//! Daemon orchestration.
//!
//! The daemon listens on two sockets. Connections on the admin socket may
//! do everything; connections on the read-only socket may only `get`,
//! `list` and `describe`. Each connection carries exactly one request and
//! one response and is served on its own task.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use credctl_core::{Request, Response, SocketProvider};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::SocketAddr;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::handlers::{self, Access, GET_TIMEOUT};
use crate::state::State;

/// Requests larger than this are cut off and fail to parse.
const MAX_REQUEST_BYTES: u64 = 1024 * 1024;

pub struct Daemon<S: SocketProvider> {
    state: Arc<State>,
    admin_socket: S,
    readonly_socket: Option<S>,
    get_timeout: Duration,
}

impl<S: SocketProvider> Daemon<S> {
    /// A daemon serving only the admin socket.
    pub fn new(state: Arc<State>, admin_socket: S) -> Self {
        Self {
            state,
            admin_socket,
            readonly_socket: None,
            get_timeout: GET_TIMEOUT,
        }
    }

    pub fn with_readonly_socket(mut self, socket: S) -> Self {
        self.readonly_socket = Some(socket);
        self
    }

    pub fn with_get_timeout(mut self, timeout: Duration) -> Self {
        self.get_timeout = timeout;
        self
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    /// Serve until SIGINT or SIGTERM.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` completes, then remove the socket files.
    pub async fn run_until<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut cleanup = SocketCleanup::default();

        let admin = self.admin_socket.listen().await?;
        cleanup.track(&self.admin_socket);
        info!(path = ?self.admin_socket.socket_path(), "Listening on admin socket");

        let readonly = match &self.readonly_socket {
            Some(socket) => {
                let listener = socket.listen().await?;
                cleanup.track(socket);
                info!(path = ?socket.socket_path(), "Listening on read-only socket");
                Some(listener)
            }
            None => None,
        };

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = admin.accept() => self.dispatch(accepted, Access::Admin),
                accepted = accept_optional(readonly.as_ref()) => self.dispatch(accepted, Access::ReadOnly),
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn dispatch(&self, accepted: io::Result<(UnixStream, SocketAddr)>, access: Access) {
        match accepted {
            Ok((stream, _addr)) => {
                let state = Arc::clone(&self.state);
                let timeout = self.get_timeout;
                tokio::spawn(async move {
                    handle_connection(stream, &state, access, timeout).await;
                });
            }
            Err(e) => error!(access = %access, error = %e, "Failed to accept connection"),
        }
    }
}

async fn accept_optional(
    listener: Option<&UnixListener>,
) -> io::Result<(UnixStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Read one request line, answer it, close.
async fn handle_connection(stream: UnixStream, state: &State, access: Access, timeout: Duration) {
    debug!(access = %access, "New connection");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));
    let mut line = String::new();

    match reader.read_line(&mut line).await {
        Ok(0) => {
            debug!(access = %access, "Connection closed by client (no data)");
            return;
        }
        Ok(n) => debug!(access = %access, bytes = n, "Received request"),
        Err(e) => {
            error!(access = %access, error = %e, "Failed to read request");
            return;
        }
    }

    let response = match serde_json::from_str::<Request>(line.trim()) {
        Ok(request) => {
            let action = request.action.clone();
            debug!(access = %access, action = %action, "Processing request");
            let response = handlers::handle(state, request, access, timeout).await;
            info!(access = %access, action = %action, status = %response.status, "Request handled");
            response
        }
        Err(e) => {
            warn!(access = %access, error = %e, "Failed to parse request");
            Response::generic_error(format!("invalid JSON: {}", e))
        }
    };

    if let Err(e) = send_response(&mut writer, &response).await {
        error!(access = %access, error = %e, "Failed to send response");
    }
}

async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &Response,
) -> anyhow::Result<()> {
    let json = response.to_json_line()?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    debug!(bytes = json.len(), "Response sent");
    Ok(())
}

/// Removes the socket files the daemon bound when it stops, including on
/// early returns.
#[derive(Default)]
struct SocketCleanup {
    paths: Vec<PathBuf>,
}

impl SocketCleanup {
    fn track(&mut self, socket: &impl SocketProvider) {
        if let Some(path) = socket.socket_path() {
            self.paths.push(path.to_path_buf());
        }
    }
}

impl Drop for SocketCleanup {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed socket"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove socket"),
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!(signal = "SIGINT", "Received shutdown signal"),
        _ = terminate => info!(signal = "SIGTERM", "Received shutdown signal"),
    }
}
