//! HTML directory listings.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::path::Path;
use std::time::SystemTime;

use html_escape::{encode_single_quoted_attribute, encode_text};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::error::ServeError;

// Characters that must be escaped inside a single path segment of an href.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
}

impl Entry {
    // Directories first, then by name.
    fn listing_order(&self, other: &Self) -> Ordering {
        other
            .is_dir
            .cmp(&self.is_dir)
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// Reads the entries of `dir`, sorted for display.
///
/// Names that are not valid UTF-8 are shown lossily.
pub async fn read_entries(dir: &Path) -> Result<Vec<Entry>, ServeError> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        // Follow symlinks so the listing agrees with `StaticFiles::classify`.
        let is_dir = match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) => metadata.is_dir(),
            Err(_) => entry.file_type().await?.is_dir(),
        };
        entries.push(Entry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
        });
    }

    entries.sort_by(Entry::listing_order);
    Ok(entries)
}

/// Renders a listing page.
///
/// `path` is the decoded URL path shown as the title, `target` the raw
/// request path used to build the parent link. Both end with `/`.
pub fn render(path: &str, target: &str, entries: &[Entry], now: SystemTime) -> String {
    let title = encode_text(path);
    let mut html = format!(
        "<html><head><meta charset='utf-8'/><title>{title}</title></head><body><h1>{title}</h1><div><ul>"
    );

    if path != "/" {
        let parent = encode_single_quoted_attribute(parent_of(target));
        let _ = write!(html, "<li>&lt;dir&gt; <a href='{parent}'>..</a></li>");
    }

    if entries.is_empty() {
        html.push_str("<li><b>EMPTY</b></li>");
    }

    for entry in entries {
        let href = utf8_percent_encode(&entry.name, SEGMENT).to_string();
        let href = encode_single_quoted_attribute(&href);
        let name = encode_text(&entry.name);
        if entry.is_dir {
            let _ = write!(html, "<li>&lt;dir&gt; <a href='{href}/'>{name}</a></li>");
        } else {
            let _ = write!(html, "<li><a href='{href}'>{name}</a></li>");
        }
    }

    let _ = write!(
        html,
        "</ul></div><footer>{}</footer></body></html>",
        httpdate::fmt_http_date(now)
    );
    html
}

// `/a/b/` → `/a/`, `/a/` → `/`.
fn parent_of(target: &str) -> &str {
    let trimmed = target.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..=idx],
        None => "/",
    }
}
