//! Async TCP front end using Tokio.
//!
//! Accepts TCP connections, parses HTTP/1.1 requests, turns each into a
//! [`RequestContext`] and hands it to an [`Endpoint`]. Controllers run
//! synchronously, so the endpoint is called on Tokio's blocking pool; the
//! [`Reply`](crate::controller::Reply) it returns is written exactly once.
//! Persistent connections (keep-alive) are supported.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::RequestContext;
use crate::controller::Endpoint;
use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Serves one [`Endpoint`] over HTTP/1.1.
///
/// # Examples
///
/// ```rust,no_run
/// use simplectl::context::RequestContext;
/// use simplectl::controller::Reply;
/// use simplectl::http::StatusCode;
/// use simplectl::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server
///         .run(|_ctx: &RequestContext| Reply::text(StatusCode::Ok, "Hello!"))
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<Config>,
}

impl Server {
    /// Binds the server to the given TCP address with the default [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(Config::default()),
        })
    }

    /// Uses `config` for request limits and parameter extraction.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and answering requests with `endpoint`.
    ///
    /// Runs until the process is terminated or the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<E: Endpoint>(self, endpoint: E) -> Result<(), ServerError> {
        let endpoint = Arc::new(endpoint);
        info!(address = %self.local_addr, mode = %self.config.mode, "simplectl listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let endpoint = Arc::clone(&endpoint);
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, endpoint, config).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: one request is read per
/// iteration until the peer closes the connection or sends `Connection: close`.
async fn handle_connection<E: Endpoint>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    endpoint: Arc<E>,
    config: Arc<Config>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    let mut need_more = true;

    loop {
        // Pipelined requests may already be buffered in full.
        if need_more || buf.is_empty() {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
        }
        need_more = false;

        if buf.len() > config.max_request_bytes {
            warn!(peer = %peer_addr, limit = config.max_request_bytes, "request too large, sending 413");
            reject_too_large(&mut stream).await?;
            break;
        }

        let (mut request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                need_more = true;
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let Some(total_needed) = body_offset
            .checked_add(content_length)
            .filter(|total| *total <= config.max_request_bytes)
        else {
            warn!(peer = %peer_addr, content_length, "declared body too large, sending 413");
            reject_too_large(&mut stream).await?;
            break;
        };
        if buf.len() < total_needed {
            need_more = true;
            continue;
        }
        request.truncate_body(content_length);

        let keep_alive = request.is_keep_alive();
        let ctx = RequestContext::from_request(&request, &config);

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            service = ctx.service().unwrap_or(""),
            "dispatching request"
        );

        let handler = Arc::clone(&endpoint);
        let response = match tokio::task::spawn_blocking(move || {
            let reply = handler.handle(&ctx);
            reply.into_response(&ctx)
        })
        .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(peer = %peer_addr, error = %e, "endpoint panicked");
                Response::new(StatusCode::InternalServerError)
            }
        };

        debug!(peer = %peer_addr, status = response.status().as_u16(), "request answered");
        stream
            .write_all(&response.keep_alive(keep_alive).into_bytes())
            .await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

async fn reject_too_large(stream: &mut TcpStream) -> Result<(), std::io::Error> {
    let response = Response::new(StatusCode::PayloadTooLarge)
        .body("Request entity too large")
        .keep_alive(false);
    stream.write_all(&response.into_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Reply;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn exchange(server: Server, raw: &str) -> String {
        let addr = server.local_addr();
        tokio::spawn(server.run(|ctx: &RequestContext| match ctx.service() {
            Some("echo") => Reply::json(
                StatusCode::Ok,
                json!({ "id": ctx.params().get("id"), "fetch": ctx.is_fetch() }),
            ),
            _ => Reply::text(StatusCode::Ok, ctx.target().to_owned()),
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn answers_a_service_request() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let body = "service=echo&id=7";
        let raw = format!(
            "POST /users HTTP/1.1\r\nHost: x\r\nX-Fetch: 1\r\nConnection: close\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );

        let out = exchange(server, &raw).await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{out}");
        assert!(out.contains("Content-Type: application/json\r\n"));
        assert!(out.ends_with(r#"{"fetch":true,"id":"7"}"#), "{out}");
    }

    #[tokio::test]
    async fn rejects_oversized_requests() {
        let config = Config {
            max_request_bytes: 16,
            ..Config::default()
        };
        let server = Server::bind("127.0.0.1:0").await.unwrap().with_config(config);
        let out = exchange(server, "GET /a-rather-long-path HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 413 "), "{out}");
    }

    #[tokio::test]
    async fn rejects_unrepresentable_content_length() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let raw = format!("POST / HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n", u64::MAX);
        let out = exchange(server, &raw).await;
        assert!(out.starts_with("HTTP/1.1 413 "), "{out}");
    }

    #[tokio::test]
    async fn answers_pipelined_requests_from_one_read() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let raw = "GET /first HTTP/1.1\r\nHost: x\r\n\r\nGET /second HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";

        let out = tokio::time::timeout(std::time::Duration::from_secs(5), exchange(server, raw))
            .await
            .expect("second request was left waiting for more bytes");
        assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2, "{out}");
        assert!(out.contains("/first"), "{out}");
        assert!(out.ends_with("/second"), "{out}");
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let out = exchange(server, "\x01\x02 nonsense\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 400 "), "{out}");
    }

    #[tokio::test]
    async fn bind_error_names_the_address() {
        let err = match Server::bind("definitely not an address").await {
            Err(err) => err,
            Ok(_) => panic!("bind should fail"),
        };
        assert!(err.to_string().contains("definitely not an address"));
    }
}
