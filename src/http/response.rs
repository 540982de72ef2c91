//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing responses and writing them
//! to an async stream. File bodies are streamed, never loaded into memory.

use std::io;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Headers, StatusCode};

/// The payload of a [`Response`].
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    /// An in-memory payload.
    Bytes(Vec<u8>),
    /// `len` bytes read from `file` starting at its current position.
    File { file: tokio::fs::File, len: u64 },
}

impl Body {
    /// Number of payload bytes that will be written.
    pub fn len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An HTTP/1.1 response, ready to be written.
///
/// # Examples
///
/// ```
/// use wwwroot::http::{Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let response = Response::content("<h1>hi</h1>", StatusCode::Ok);
/// assert_eq!(response.headers().get("content-type"), Some("text/html"));
///
/// let mut wire = Vec::new();
/// response.write_to(&mut wire).await.unwrap();
/// let text = String::from_utf8(wire).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.ends_with("\r\n\r\n<h1>hi</h1>"));
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
    content_length: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Empty,
            keep_alive: true,
            content_length: true,
        }
    }

    /// A `text/html` response.
    pub fn content(text: impl Into<String>, status: StatusCode) -> Self {
        Self::new(status)
            .header("Content-Type", "text/html")
            .body(text)
    }

    /// An `application/json` response carrying `data` serialized as UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Fails if `data` cannot be serialized.
    pub fn json<T>(data: &T, status: StatusCode) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(data)?;
        Ok(Self::new(status)
            .header("Content-Type", "application/json")
            .body_bytes(body))
    }

    /// A `301 Moved Permanently` pointing at `location`.
    pub fn redirect(location: impl Into<String>) -> Self {
        let location = location.into();
        Self::new(StatusCode::MovedPermanently)
            .header("Location", location.clone())
            .body(format!("redirect to {location}"))
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place, for middleware decorating a downstream response.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Body::Bytes(body.into().into_bytes());
        self
    }

    /// Sets the body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Bytes(body.into());
        self
    }

    /// Streams `len` bytes of `file`, starting at its current position.
    #[must_use]
    pub fn file_body(mut self, file: tokio::fs::File, len: u64) -> Self {
        self.body = Body::File { file, len };
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Suppresses the `Content-Length` header. The body is then delimited by
    /// closing the connection, so keep-alive is switched off as well.
    #[must_use]
    pub fn without_content_length(mut self) -> Self {
        self.content_length = false;
        self.keep_alive = false;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    /// Returns the in-memory body, or `None` for empty and file bodies.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Whether the connection may be reused after this response.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    // 1xx, 204 and 304 never carry a body or a Content-Length.
    fn is_bodiless(&self) -> bool {
        matches!(self.status, StatusCode::NoContent | StatusCode::NotModified)
    }

    /// Serializes the status line and headers.
    ///
    /// Adds `Content-Type: text/plain; charset=utf-8` when a body is present
    /// without a type, the `Connection` header, and `Content-Length` unless it
    /// was suppressed or the status forbids a body.
    fn head_bytes(&mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        self.headers.set("Connection", connection);

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        if self.content_length && !self.is_bodiless() {
            buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        }

        buf.put(&b"\r\n"[..]);
        buf
    }

    /// Writes the response to `writer` and flushes it.
    ///
    /// # Errors
    ///
    /// Any I/O error from the writer or from reading a file body. A file that
    /// ends before `len` bytes were copied yields [`io::ErrorKind::UnexpectedEof`];
    /// the head has already been sent at that point, so the caller must close
    /// the connection.
    pub async fn write_to<W>(mut self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut head = self.head_bytes();
        let bodiless = self.is_bodiless();

        match self.body {
            Body::Empty => writer.write_all(&head).await?,
            Body::Bytes(bytes) => {
                if !bodiless {
                    head.put(bytes.as_slice());
                }
                writer.write_all(&head).await?;
            }
            Body::File { file, len } => {
                writer.write_all(&head).await?;
                if !bodiless {
                    let mut reader = file.take(len);
                    let copied = tokio::io::copy(&mut reader, writer).await?;
                    if copied < len {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("file ended after {copied} of {len} bytes"),
                        ));
                    }
                }
            }
        }

        writer.flush().await
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn to_string(response: Response) -> String {
        let mut wire = Vec::new();
        response.write_to(&mut wire).await.unwrap();
        String::from_utf8(wire).unwrap()
    }

    #[tokio::test]
    async fn simple_ok_response() {
        let s = to_string(Response::new(StatusCode::Ok).body("Hello")).await;
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[tokio::test]
    async fn json_helper_sets_content_type() {
        let r = Response::json(&serde_json::json!({"ok": true}), StatusCode::Ok).unwrap();
        assert_eq!(r.headers().get("content-type"), Some("application/json"));
        assert_eq!(r.bytes(), Some(&br#"{"ok":true}"#[..]));
    }

    #[tokio::test]
    async fn redirect_sets_location() {
        let s = to_string(Response::redirect("/docs/")).await;
        assert!(s.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        assert!(s.contains("Location: /docs/\r\n"));
    }

    #[tokio::test]
    async fn not_modified_has_no_length_or_body() {
        let s = to_string(Response::new(StatusCode::NotModified).body("ignored")).await;
        assert!(s.starts_with("HTTP/1.1 304 Not Modified\r\n"));
        assert!(!s.contains("Content-Length"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn suppressed_length_forces_close() {
        let r = Response::new(StatusCode::PartialContent)
            .body("abc")
            .without_content_length();
        assert!(!r.is_keep_alive());
        let s = to_string(r).await;
        assert!(!s.contains("Content-Length"));
        assert!(s.contains("Connection: close\r\n"));
        assert!(s.ends_with("abc"));
    }

    #[tokio::test]
    async fn file_body_is_streamed() {
        use std::io::Write;

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let file = tokio::fs::File::open(tmp.path()).await.unwrap();

        let s = to_string(Response::new(StatusCode::Ok).file_body(file, 4)).await;
        assert!(s.contains("Content-Length: 4\r\n"));
        assert!(s.ends_with("\r\n\r\n0123"));
    }

    #[tokio::test]
    async fn short_file_is_an_error() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = tokio::fs::File::open(tmp.path()).await.unwrap();
        let mut wire = Vec::new();
        let err = Response::new(StatusCode::Ok)
            .file_body(file, 10)
            .write_to(&mut wire)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
