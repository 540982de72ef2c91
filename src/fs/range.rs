//! Conditional and single-range file responses.
//!
//! [`serve_file`] answers one file:
//!
//! - `If-Modified-Since` equal to the file's `Last-Modified` → `304`, no body.
//! - A satisfiable `Range: bytes=<start>-<end>` → `206` with `Accept-Ranges`
//!   and `Content-Range`, streaming `[start, end]` inclusive. The response
//!   carries no `Content-Length` and closes the connection afterwards.
//! - Anything else, including malformed or unsatisfiable ranges → `200` with
//!   the whole file and a `Content-Length`.
//!
//! The file is opened and positioned before any header is produced, so open
//! and seek failures still become a `500`.

use std::io::SeekFrom;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncSeekExt;
use tracing::debug;

use super::mime;
use crate::error::ServeError;
use crate::http::{Headers, Response, StatusCode};

static RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"bytes=(\d+)-(\d*)").expect("range regex should be valid"));

/// An inclusive byte interval within a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Parses a `Range` header value against a file of `size` bytes.
    ///
    /// A missing or unparsable end means "to the last byte", and an end past
    /// the file is clamped to it. Returns `None` for values that do not match
    /// `bytes=<start>-<end>` or whose start lies beyond the end.
    ///
    /// ```
    /// use wwwroot::fs::range::ByteRange;
    ///
    /// assert_eq!(ByteRange::parse("bytes=0-99", 1000), Some(ByteRange { start: 0, end: 99 }));
    /// assert_eq!(ByteRange::parse("bytes=500-", 1000), Some(ByteRange { start: 500, end: 999 }));
    /// assert_eq!(ByteRange::parse("bytes=-100", 1000), None);
    /// assert_eq!(ByteRange::parse("bytes=1000-", 1000), None);
    /// ```
    pub fn parse(header: &str, size: u64) -> Option<Self> {
        if size == 0 {
            return None;
        }
        let caps = RANGE.captures(header)?;
        let last = size - 1;

        let start = caps[1].parse::<u64>().unwrap_or(0);
        let end = caps[2].parse::<u64>().map_or(last, |end| end.min(last));

        (start <= end).then_some(Self { start, end })
    }

    /// Number of bytes in the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A parsed range always holds at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The `Content-Range` header value for a file of `size` bytes.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Builds the response for the file at `path`, honoring `If-Modified-Since`
/// and `Range` from `headers`.
///
/// # Errors
///
/// [`ServeError::Io`] if the file cannot be opened, inspected or positioned.
pub async fn serve_file(path: &Path, headers: &Headers) -> Result<Response, ServeError> {
    let mut file = tokio::fs::File::open(path).await?;
    let metadata = file.metadata().await?;
    let size = metadata.len();
    let last_modified = httpdate::fmt_http_date(metadata.modified()?);

    if headers.get("if-modified-since") == Some(last_modified.as_str()) {
        debug!(path = %path.display(), "not modified");
        return Ok(Response::new(StatusCode::NotModified).header("Last-Modified", last_modified));
    }

    let range = headers
        .get("range")
        .and_then(|value| ByteRange::parse(value, size));
    let status = if range.is_some() {
        StatusCode::PartialContent
    } else {
        StatusCode::Ok
    };

    let response = Response::new(status)
        .header("Content-Type", mime::for_path(path))
        .header("Last-Modified", last_modified);

    let Some(range) = range else {
        return Ok(response.file_body(file, size));
    };

    file.seek(SeekFrom::Start(range.start)).await?;
    debug!(path = %path.display(), start = range.start, end = range.end, "partial content");

    Ok(response
        .header("Accept-Ranges", "bytes")
        .header("Content-Range", range.content_range(size))
        .file_body(file, range.len())
        .without_content_length())
}
