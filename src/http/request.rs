//! HTTP/1.1 request head parsing using the [`httparse`] crate.

use std::net::SocketAddr;

use percent_encoding::percent_decode_str;
use thiserror::Error;

use super::{Headers, Method, RequestBody};
use crate::form;

/// Errors that can occur while parsing an HTTP/1.1 request head.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request path is not valid percent-encoded UTF-8")]
    InvalidPath,

    #[error("request body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("Content-Length does not fit in memory")]
    ContentLengthOverflow,
}

/// A parsed HTTP/1.1 request.
///
/// Created by [`Request::parse`] from the raw head bytes. The body is attached
/// separately with [`Request::with_body`] because it may still be arriving
/// while the request is dispatched.
///
/// # Examples
///
/// ```
/// use wwwroot::http::request::Request;
///
/// let raw = b"GET /docs/caf%C3%A9.txt?lang=fr%2Dca HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.target(), "/docs/caf%C3%A9.txt");
/// assert_eq!(request.path(), "/docs/café.txt");
/// assert_eq!(request.query_param("lang"), Some("fr-ca"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    params: Vec<(String, String)>,
    body: RequestBody,
    peer_addr: Option<SocketAddr>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from `buf`.
    ///
    /// Returns the request (with an empty, complete body) and the offset at
    /// which the body begins in `buf`.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] if the head is not fully buffered yet.
    /// - [`RequestError::Parse`] if the head is malformed.
    /// - [`RequestError::MissingField`] if method, path or version is absent.
    /// - [`RequestError::InvalidPath`] if the path does not percent-decode to UTF-8.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let Ok(method) = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>();

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (target, query) = match raw_path.split_once('?') {
            Some((target, query)) => (target.to_owned(), Some(query.to_owned())),
            None => (raw_path.to_owned(), None),
        };

        let path = percent_decode_str(&target)
            .decode_utf8()
            .map_err(|_| RequestError::InvalidPath)?
            .into_owned();

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let params = query
            .as_deref()
            .map(|q| form::decode_pairs(q.as_bytes()).collect())
            .unwrap_or_default();

        Ok((
            Self {
                method,
                target,
                path,
                version,
                headers: header_map,
                query,
                params,
                body: RequestBody::empty(),
                peer_addr: None,
            },
            body_offset,
        ))
    }

    /// Attaches the body handle for this request.
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Records the address of the connected client.
    #[must_use]
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The percent-decoded request path, used for routing and file lookup.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The request path exactly as sent by the client (without the query string).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the first decoded query parameter named `key`.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Address of the client, when known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => !conn.eq_ignore_ascii_case("close")
                && (self.version == 1 || conn.eq_ignore_ascii_case("keep-alive")),
            None => self.version == 1,
        }
    }

    /// Returns the declared body length, or `None` when no `Content-Length`
    /// header is present.
    ///
    /// Repeated headers and comma-separated lists are accepted only when every
    /// value is the same.
    ///
    /// # Errors
    ///
    /// - [`RequestError::InvalidContentLength`] for a value that is not a
    ///   plain decimal number, or for conflicting values.
    /// - [`RequestError::ContentLengthOverflow`] for a number too large for `usize`.
    pub fn content_length(&self) -> Result<Option<usize>, RequestError> {
        let mut length = None;
        for value in self.headers.get_all("content-length").flat_map(|v| v.split(',')) {
            let value = value.trim();
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(RequestError::InvalidContentLength(value.to_owned()));
            }
            let parsed: usize = value
                .parse()
                .map_err(|_| RequestError::ContentLengthOverflow)?;
            match length {
                Some(seen) if seen != parsed => {
                    return Err(RequestError::InvalidContentLength(value.to_owned()));
                }
                _ => length = Some(parsed),
            }
        }
        Ok(length)
    }
}
