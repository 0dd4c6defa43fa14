//! One-shot loopback HTTP listener for OAuth redirects.
//!
//! The listener is bound before the browser is opened, so a fast redirect
//! cannot arrive before anyone is listening. It listens on `127.0.0.1` and,
//! when available, `::1`, since `localhost` may resolve to either.
//!
//! Each connection is read on its own task with a short deadline, so an
//! idle connection cannot hold up the redirect. Requests for other paths
//! (favicons, preconnects) get a 404 and the listener keeps waiting. The
//! first request on the callback path decides the outcome. Dropping the
//! listener, or the future waiting on it, closes the sockets.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;
use url::Url;

use super::FlowError;

/// How long the user gets to finish in the browser.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const MAX_REQUEST_BYTES: usize = 8192;

/// How long a connection may take to send its request head.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

const SUCCESS_HTML: &str = "<!DOCTYPE html><html><head><title>Authentication successful</title></head>\
<body><h1>Authentication successful</h1><p>You can close this window and return to the terminal.</p></body></html>";

const ERROR_HTML: &str = "<!DOCTYPE html><html><head><title>Authentication failed</title></head>\
<body><h1>Authentication failed</h1><p>You can close this window and check the terminal for details.</p></body></html>";

/// Query parameters of the callback request.
pub type CallbackParams = HashMap<String, String>;

/// A bound loopback listener waiting for a single redirect.
#[derive(Debug)]
pub struct CallbackListener {
    v4: TcpListener,
    v6: Option<TcpListener>,
    port: u16,
    path: String,
}

impl CallbackListener {
    /// Bind `127.0.0.1:<port>`, and `[::1]:<port>` if IPv6 loopback is
    /// usable. Port 0 picks a free port.
    pub async fn bind(port: u16, path: &str) -> Result<Self, FlowError> {
        let v4 = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(FlowError::Callback)?;
        let port = v4.local_addr().map_err(FlowError::Callback)?.port();

        let v6 = match TcpListener::bind(("::1", port)).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                debug!(port, error = %e, "IPv6 loopback unavailable for callback");
                None
            }
        };
        debug!(port, path = %path, ipv6 = v6.is_some(), "Callback listener bound");

        Ok(Self {
            v4,
            v6,
            port,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
        })
    }

    /// The port actually bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the authorization code.
    ///
    /// `state` is checked first; a mismatch is answered with 400 and fails
    /// the flow without looking at any other parameter.
    pub async fn wait_for_code(
        self,
        expected_state: &str,
        timeout: Duration,
    ) -> Result<String, FlowError> {
        self.wait_with(timeout, |params| code_from_params(params, expected_state))
            .await
    }

    /// Wait for the first request on the callback path and let `check`
    /// decide the outcome. The browser sees 200 on `Ok` and 400 on `Err`.
    pub async fn wait_with<T, F>(self, timeout: Duration, check: F) -> Result<T, FlowError>
    where
        F: FnOnce(&CallbackParams) -> Result<T, FlowError>,
    {
        tokio::time::timeout(timeout, async move {
            let (mut stream, params) = self.next_callback().await?;
            let outcome = check(&params);
            let (status, body) = match &outcome {
                Ok(_) => ("200 OK", SUCCESS_HTML),
                Err(_) => ("400 Bad Request", ERROR_HTML),
            };
            respond(&mut stream, status, body).await;
            outcome
        })
        .await
        .map_err(|_| FlowError::CallbackTimeout)?
    }

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.v6 {
            Some(v6) => tokio::select! {
                accepted = self.v4.accept() => accepted,
                accepted = v6.accept() => accepted,
            },
            None => self.v4.accept().await,
        }
    }

    /// Accept connections until one carries a request for the callback path.
    /// Pending connections are dropped when this returns.
    async fn next_callback(&self) -> Result<(TcpStream, CallbackParams), FlowError> {
        let (found_tx, mut found_rx) = mpsc::channel(1);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.accept() => {
                    let (stream, peer) = accepted.map_err(FlowError::Callback)?;
                    let found_tx = found_tx.clone();
                    let path = self.path.clone();
                    connections.spawn(async move {
                        if let Some(found) = read_callback(stream, peer, &path).await {
                            let _ = found_tx.send(found).await;
                        }
                    });
                }
                Some(found) = found_rx.recv() => return Ok(found),
            }
        }
    }
}

/// Read one request. Returns the stream and parameters if it targets
/// `path`; anything else is answered and dropped.
async fn read_callback(
    mut stream: TcpStream,
    peer: SocketAddr,
    path: &str,
) -> Option<(TcpStream, CallbackParams)> {
    let read = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream)).await;
    let target = match read {
        Ok(Ok(Some(target))) => target,
        Ok(Ok(None)) | Ok(Err(_)) => {
            respond(&mut stream, "400 Bad Request", ERROR_HTML).await;
            return None;
        }
        Err(_) => {
            debug!(peer = %peer, "Dropping idle callback connection");
            return None;
        }
    };

    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        respond(&mut stream, "400 Bad Request", ERROR_HTML).await;
        return None;
    };

    if url.path() != path {
        debug!(peer = %peer, path = %url.path(), "Ignoring request for unexpected path");
        respond(&mut stream, "404 Not Found", "Not Found").await;
        return None;
    }

    let params = url.query_pairs().into_owned().collect();
    Some((stream, params))
}

/// Extract the code from callback parameters, in the order: state, error, code.
pub fn code_from_params(params: &CallbackParams, expected_state: &str) -> Result<String, FlowError> {
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(FlowError::StateMismatch);
    }

    if let Some(code) = params.get("error").filter(|e| !e.is_empty()) {
        return Err(FlowError::AuthorizationDenied {
            code: code.clone(),
            description: params.get("error_description").cloned(),
        });
    }

    params
        .get("code")
        .filter(|c| !c.is_empty())
        .cloned()
        .ok_or(FlowError::MissingCode)
}

/// Read the request head and return the target of a GET request line.
async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    while !buffer.windows(4).any(|w| w == b"\r\n\r\n") && buffer.len() < MAX_REQUEST_BYTES {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buffer);
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) if target.starts_with('/') => Ok(Some(target.to_string())),
        _ => Ok(None),
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let content_type = if body.starts_with('<') {
        "text/html; charset=utf-8"
    } else {
        "text/plain; charset=utf-8"
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    // The browser going away early does not change the outcome.
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> CallbackParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn get(port: u16, path_and_query: &str) -> reqwest::Response {
        reqwest::get(format!("http://127.0.0.1:{}{}", port, path_and_query))
            .await
            .unwrap()
    }

    #[test]
    fn state_is_checked_before_anything_else() {
        let err = code_from_params(&params(&[("code", "c"), ("state", "evil")]), "good").unwrap_err();
        assert!(matches!(err, FlowError::StateMismatch));

        let err = code_from_params(&params(&[("error", "access_denied")]), "good").unwrap_err();
        assert!(matches!(err, FlowError::StateMismatch));
    }

    #[test]
    fn error_parameter_is_terminal() {
        let err = code_from_params(
            &params(&[
                ("state", "s"),
                ("error", "access_denied"),
                ("error_description", "user said no"),
            ]),
            "s",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FlowError::AuthorizationDenied { ref code, ref description }
                if code == "access_denied" && description.as_deref() == Some("user said no")
        ));
    }

    #[test]
    fn missing_code_is_an_error() {
        let err = code_from_params(&params(&[("state", "s")]), "s").unwrap_err();
        assert!(matches!(err, FlowError::MissingCode));
        assert_eq!(
            code_from_params(&params(&[("state", "s"), ("code", "abc")]), "s").unwrap(),
            "abc"
        );
    }

    #[tokio::test]
    async fn accepts_one_matching_callback() {
        let listener = CallbackListener::bind(0, "/callback").await.unwrap();
        let port = listener.port();
        assert_ne!(port, 0);

        let waiter = tokio::spawn(listener.wait_for_code("st", CALLBACK_TIMEOUT));

        let not_found = get(port, "/favicon.ico").await;
        assert_eq!(not_found.status(), 404);

        let ok = get(port, "/callback?code=the-code&state=st").await;
        assert_eq!(ok.status(), 200);
        assert!(ok.text().await.unwrap().contains("Authentication successful"));

        assert_eq!(waiter.await.unwrap().unwrap(), "the-code");
    }

    #[tokio::test]
    async fn state_mismatch_answers_400() {
        let listener = CallbackListener::bind(0, "/callback").await.unwrap();
        let port = listener.port();
        let waiter = tokio::spawn(listener.wait_for_code("expected", CALLBACK_TIMEOUT));

        let response = get(port, "/callback?code=c&state=forged").await;
        assert_eq!(response.status(), 400);

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_security_violation());
    }

    #[tokio::test]
    async fn idle_connection_does_not_block_callback() {
        let listener = CallbackListener::bind(0, "/callback").await.unwrap();
        let port = listener.port();
        let waiter = tokio::spawn(listener.wait_for_code("S", Duration::from_secs(3)));

        let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ok = get(port, "/callback?state=S&code=C").await;
        assert_eq!(ok.status(), 200);
        assert_eq!(waiter.await.unwrap().unwrap(), "C");
    }

    #[tokio::test]
    async fn accepts_callback_over_ipv6_loopback() {
        if std::net::TcpListener::bind("[::1]:0").is_err() {
            return;
        }
        let listener = CallbackListener::bind(0, "/callback").await.unwrap();
        let port = listener.port();
        if listener.v6.is_none() {
            return;
        }
        let waiter = tokio::spawn(listener.wait_for_code("S", Duration::from_secs(3)));

        let ok = reqwest::get(format!("http://[::1]:{}/callback?state=S&code=six", port))
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(waiter.await.unwrap().unwrap(), "six");
    }

    #[tokio::test]
    async fn times_out_without_callback() {
        let listener = CallbackListener::bind(0, "/callback").await.unwrap();
        let err = listener
            .wait_for_code("s", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::CallbackTimeout));
    }

    #[tokio::test]
    async fn listener_is_closed_after_wait() {
        let listener = CallbackListener::bind(0, "/callback").await.unwrap();
        let port = listener.port();
        let _ = listener.wait_for_code("s", Duration::from_millis(10)).await;

        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }
}
