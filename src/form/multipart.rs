//! `multipart/form-data` decoding (RFC 7578).
//!
//! The body is scanned as bytes from start to finish. Delimiters are located
//! with [`memchr::memmem`], part headers are parsed with
//! [`httparse::parse_headers`], and only fields without a `filename` are ever
//! turned into text. File contents are returned as zero-copy slices of the
//! request body.
//!
//! The first delimiter is `--boundary`; every later one is
//! `\r\n--boundary`, so the line break that precedes a delimiter is not part
//! of the previous value. `--boundary--` closes the body.

use bytes::Bytes;
use memchr::memmem;

use super::{FieldValue, FormData};

const MAX_PART_HEADERS: usize = 16;

/// Extracts the `boundary` parameter from a `multipart/form-data` content type.
///
/// ```
/// use wwwroot::form::multipart::boundary;
///
/// assert_eq!(
///     boundary("multipart/form-data; boundary=----WebKitFormBoundaryni3Zmn3h").as_deref(),
///     Some("----WebKitFormBoundaryni3Zmn3h"),
/// );
/// assert_eq!(boundary(r#"multipart/form-data; boundary="a b""#).as_deref(), Some("a b"));
/// assert_eq!(boundary("multipart/form-data"), None);
/// ```
pub fn boundary(content_type: &str) -> Option<String> {
    split_params(content_type).skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = unquote(value);
        (!value.is_empty()).then_some(value)
    })
}

/// Decodes a complete multipart body delimited by `boundary`.
///
/// Malformed parts are skipped; a missing close delimiter is tolerated.
pub fn decode(body: &Bytes, boundary: &str) -> FormData {
    let mut form = FormData::new();
    for part in split_parts(body, boundary) {
        if let Some((name, value)) = parse_part(body, part) {
            form.push(name, value);
        }
    }
    form
}

// Raw parts (part headers + content) between delimiters.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let opening = format!("--{boundary}");
    let delimiter = format!("\r\n--{boundary}");

    let Some(first) = memmem::find(body, opening.as_bytes()) else {
        return Vec::new();
    };
    let finder = memmem::Finder::new(delimiter.as_bytes());
    let mut rest = &body[first + opening.len()..];
    let mut parts = Vec::new();

    loop {
        if rest.starts_with(b"--") {
            break;
        }
        // Skip transport padding up to the end of the delimiter line.
        let Some(line_end) = memmem::find(rest, b"\r\n") else {
            break;
        };
        rest = &rest[line_end + 2..];

        match finder.find(rest) {
            Some(end) => {
                parts.push(&rest[..end]);
                rest = &rest[end + delimiter.len()..];
            }
            None => {
                parts.push(rest.strip_suffix(b"\r\n").unwrap_or(rest));
                break;
            }
        }
    }

    parts
}

fn parse_part(body: &Bytes, part: &[u8]) -> Option<(String, FieldValue)> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
    let (offset, headers) = match httparse::parse_headers(part, &mut storage) {
        Ok(httparse::Status::Complete(parsed)) => parsed,
        _ => return None,
    };

    let header = |name: &str| {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| String::from_utf8_lossy(h.value).into_owned())
    };

    let (name, filename) = disposition(&header("content-disposition")?)?;
    let content = &part[offset..];

    let value = match filename {
        Some(filename) => FieldValue::File {
            filename,
            content_type: header("content-type").map(|ct| ct.trim().to_owned()),
            data: body.slice_ref(content),
        },
        None => FieldValue::Text(String::from_utf8_lossy(content).into_owned()),
    };

    Some((name, value))
}

// Parses `form-data; name="…"; filename="…"` into (name, filename).
fn disposition(value: &str) -> Option<(String, Option<String>)> {
    let mut params = split_params(value);
    if !params.next()?.trim().eq_ignore_ascii_case("form-data") {
        return None;
    }

    let mut name = None;
    let mut filename = None;
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(unquote(value)),
            "filename" => filename = Some(unquote(value)),
            _ => {}
        }
    }

    Some((name?, filename))
}

// Splits a header value on `;`, ignoring separators inside quoted strings.
fn split_params(value: &str) -> impl Iterator<Item = &str> {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    let mut pieces = Vec::new();

    for (idx, ch) in value.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                pieces.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    pieces.push(&value[start..]);
    pieces.into_iter()
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_owned(),
    }
}
