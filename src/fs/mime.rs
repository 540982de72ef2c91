//! Extension to MIME type lookup.

use std::path::Path;

/// Returned for extensions the table does not know.
pub const FALLBACK: &str = "application/octet-stream";

/// Maps a file extension (without the dot, any case) to a MIME type.
///
/// ```
/// use wwwroot::fs::mime::from_extension;
///
/// assert_eq!(from_extension("HTML"), "text/html");
/// assert_eq!(from_extension("png"), "image/png");
/// assert_eq!(from_extension("weird"), "application/octet-stream");
/// ```
pub fn from_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "css" => "text/css",
        "txt" | "gitignore" => "text/plain",
        "htm" | "html" => "text/html",
        "xml" => "text/xml",
        "js" => "text/javascript",
        "ico" => "image/x-icon",
        "gif" => "image/gif",
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "swf" => "application/x-shockwave-flash",
        "woff" | "woff2" => "application/x-font-woff",
        "eot" => "application/vnd.ms-fontobject",
        "ttf" => "application/font-sfnt",
        "mp3" => "audio/mpeg",
        "wav" => "audio/x-wav",
        "wma" => "audio/x-ms-wma",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "zip" => "application/zip",
        _ => FALLBACK,
    }
}

/// The MIME type for `path`, judged by its extension.
///
/// Dotfiles such as `.gitignore` are looked up by the name after the dot.
pub fn for_path(path: &Path) -> &'static str {
    let ext = path.extension().or_else(|| {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix('.'))
            .map(std::ffi::OsStr::new)
    });
    ext.and_then(|ext| ext.to_str())
        .map_or(FALLBACK, from_extension)
}
