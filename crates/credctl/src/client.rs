//! Blocking client for the daemon sockets.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use credctl_core::paths::SOCKET_ENV;
use credctl_core::protocol::{Action, ErrorType, Request, Response};
use credctl_core::Paths;
use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroize;

/// Pick the socket to talk to.
///
/// Order: `CREDCTL_SOCK`, the configured `client.socket`, the admin socket
/// if it exists, then the read-only socket.
pub fn discover_socket(
    env_override: Option<PathBuf>,
    configured: Option<&Path>,
    paths: &Paths,
) -> Result<PathBuf> {
    if let Some(path) = env_override.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path);
    }
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }

    [paths.admin_socket(), paths.readonly_socket()]
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| anyhow!("no credctl socket found (is the daemon running?)"))
}

/// The `CREDCTL_SOCK` value, if set.
pub fn socket_from_env() -> Option<PathBuf> {
    std::env::var_os(SOCKET_ENV).map(PathBuf::from)
}

pub struct Client {
    socket: PathBuf,
}

impl Client {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Send one request and read the response.
    pub fn send(&self, request: &Request) -> Result<Response> {
        let mut stream = UnixStream::connect(&self.socket).with_context(|| {
            format!(
                "failed to connect to daemon at {} (is the daemon running?)",
                self.socket.display()
            )
        })?;

        let mut request_json = request
            .to_json_line()
            .context("Failed to serialize request")?;
        let sent = stream.write_all(request_json.as_bytes());
        request_json.zeroize();
        sent.context("Failed to send request")?;
        stream.flush().context("Failed to flush request")?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        let read = reader
            .read_line(&mut response_line)
            .context("Failed to read response")?;
        if read == 0 {
            bail!("no response received from daemon");
        }

        let response = Response::parse(response_line.trim()).context("Failed to parse response");
        response_line.zeroize();
        response
    }

    /// Send `action` and fail on an error response.
    pub fn call(&self, action: Action, payload: impl Serialize) -> Result<Response> {
        let request = Request::new(action, payload).context("Failed to build request")?;
        let response = self.send(&request)?;
        if response.is_ok() {
            Ok(response)
        } else {
            Err(ResponseError::from(&response).into())
        }
    }

    /// Like [`Client::call`], decoding the response payload.
    pub fn call_for<T: DeserializeOwned>(&self, action: Action, payload: impl Serialize) -> Result<T> {
        self.call(action, payload)?
            .payload_as()
            .context("Failed to parse response")
    }
}

/// An error response from the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseError {
    pub error_type: ErrorType,
    pub message: String,
}

impl From<&Response> for ResponseError {
    fn from(response: &Response) -> Self {
        Self {
            error_type: response.error_type.unwrap_or(ErrorType::Generic),
            message: response.error_message().to_string(),
        }
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ResponseError {}
