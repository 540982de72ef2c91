//! Async TCP server using Tokio.
//!
//! Each accepted connection runs on its own task and serves requests one at
//! a time, keeping the connection open between them when both sides allow it.
//!
//! The request head is read and parsed first. The body is then pumped from
//! the socket into the request's [`RequestBody`] while the request is already
//! being dispatched, so actions that never look at the body do not wait for
//! it, and actions that do simply await completion.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::http::{
    BodyWriter, RequestBody, StatusCode,
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

/// Largest request head we buffer before answering `413` (64 KiB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct BodyLimits {
    max_size: usize,
    read_timeout: Duration,
}

/// The HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wwwroot::config::ServerConfig;
/// use wwwroot::dispatcher::Dispatcher;
/// use wwwroot::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::default();
///     let server = Server::bind(config.address()).await?.with_config(&config);
///     server.run(Arc::new(Dispatcher::new(&config))).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    limits: BodyLimits,
}

impl Server {
    /// Binds the server to the given TCP address.
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
        let defaults = ServerConfig::default();
        Ok(Self {
            listener,
            local_addr,
            limits: BodyLimits {
                max_size: defaults.max_body_size,
                read_timeout: defaults.body_timeout(),
            },
        })
    }

    /// Applies the body size and timeout limits from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &ServerConfig) -> Self {
        self.limits = BodyLimits {
            max_size: config.max_body_size,
            read_timeout: config.body_timeout(),
        };
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and serves them with `dispatcher` until the
    /// process ends or the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self, dispatcher: Arc<Dispatcher>) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "wwwroot listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let dispatcher = Arc::clone(&dispatcher);
            let limits = self.limits;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, dispatcher, limits).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    limits: BodyLimits,
) -> io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let Some((request, head_len)) = read_head(&mut reader, &mut buf, &mut writer, peer_addr).await?
        else {
            return Ok(());
        };

        let Some(content_length) = check_framing(&request, limits, peer_addr, &mut writer).await?
        else {
            return Ok(());
        };
        let reusable = request.is_keep_alive();

        buf.advance(head_len);
        let already = content_length.min(buf.len());
        let (body_writer, body) = RequestBody::channel();
        body_writer.append(&buf.split_to(already));

        let request = request.with_body(body).with_peer_addr(peer_addr);
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let pump = pump_body(
            &mut reader,
            &mut buf,
            body_writer,
            content_length - already,
            limits.read_timeout,
        );
        let respond = async {
            let mut response = Arc::clone(&dispatcher).dispatch(request).await;
            if !reusable {
                response = response.keep_alive(false);
            }
            let keep_alive = response.is_keep_alive();
            response.write_to(&mut writer).await.map(|()| keep_alive)
        };

        let (pumped, written) = tokio::join!(pump, respond);
        let response_keep_alive = written?;

        if let Err(e) = pumped {
            debug!(peer = %peer_addr, error = %e, "request body not received");
            return Ok(());
        }
        if !(reusable && response_keep_alive) {
            debug!(peer = %peer_addr, "closing connection");
            return Ok(());
        }
    }
}

/// Reads until `buf` holds a complete request head.
///
/// Returns `None` when the connection should end: the peer closed it, or the
/// head was rejected with a `400`/`413` that has already been written.
async fn read_head<R, W>(
    reader: &mut R,
    buf: &mut BytesMut,
    writer: &mut W,
    peer_addr: SocketAddr,
) -> io::Result<Option<(Request, usize)>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        match Request::parse(buf) {
            Ok(pair) => return Ok(Some(pair)),
            Err(RequestError::Incomplete) => {
                if buf.len() > MAX_HEAD_SIZE {
                    warn!(peer = %peer_addr, "request head too large");
                    reject(writer, StatusCode::PayloadTooLarge).await?;
                    return Ok(None);
                }
                if reader.read_buf(buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    return Ok(None);
                }
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request");
                reject(writer, StatusCode::BadRequest).await?;
                return Ok(None);
            }
        }
    }
}

/// Decides how many body bytes follow the head.
///
/// Returns `None` after writing a rejection: `400` for a malformed or
/// conflicting `Content-Length`, `413` for one above the limit, `411` for a
/// `Transfer-Encoding` body. The connection must close after a rejection
/// since the body boundary is unknown.
async fn check_framing<W>(
    request: &Request,
    limits: BodyLimits,
    peer_addr: SocketAddr,
    writer: &mut W,
) -> io::Result<Option<usize>>
where
    W: AsyncWrite + Unpin,
{
    if request.headers().contains("transfer-encoding") {
        warn!(peer = %peer_addr, "transfer-encoded request bodies are not supported");
        reject(writer, StatusCode::LengthRequired).await?;
        return Ok(None);
    }

    let status = match request.content_length() {
        Ok(length) if length.unwrap_or(0) <= limits.max_size => {
            return Ok(Some(length.unwrap_or(0)));
        }
        Ok(_) | Err(RequestError::ContentLengthOverflow) => {
            let e = RequestError::BodyTooLarge {
                max_bytes: limits.max_size,
            };
            warn!(peer = %peer_addr, error = %e, "rejecting request");
            StatusCode::PayloadTooLarge
        }
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "bad request");
            StatusCode::BadRequest
        }
    };
    reject(writer, status).await?;
    Ok(None)
}

/// Moves `remaining` body bytes from the socket into `body`.
///
/// Bytes read past the body stay in `buf` for the next request. If the peer
/// closes early, a read fails, or no data arrives within `read_timeout`, the
/// writer is dropped unfinished and waiters observe an incomplete body.
async fn pump_body<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    body: BodyWriter,
    mut remaining: usize,
    read_timeout: Duration,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    while remaining > 0 {
        let read = tokio::time::timeout(read_timeout, reader.read_buf(buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request body timed out"))??;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection closed with {remaining} body bytes outstanding"),
            ));
        }
        let take = remaining.min(buf.len());
        body.append(&buf.split_to(take));
        remaining -= take;
    }
    body.finish();
    Ok(())
}

async fn reject<W>(writer: &mut W, status: StatusCode) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    Response::new(status)
        .body(status.canonical_reason())
        .keep_alive(false)
        .write_to(writer)
        .await
}
