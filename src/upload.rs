//! The `upload.action` demo route.
//!
//! `GET` answers `ok!`. `POST` decodes the form, stores the first uploaded
//! file in the static root under its base name, and answers with a JSON
//! summary of every field.

use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::context::Context;
use crate::error::ActionResult;
use crate::form::FieldSummary;
use crate::http::{Method, Response, StatusCode};
use crate::router::{PathMatcher, Route};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadSummary<'a> {
    fields: Vec<FieldSummary<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved: Option<String>,
}

/// The upload route, matched case-insensitively anywhere in the path.
///
/// # Errors
///
/// Only if the built-in matcher fails to compile.
pub fn route() -> Result<Route, regex::Error> {
    Ok(Route::new(
        [Method::Get, Method::Post],
        PathMatcher::regex(r"(?i)upload\.action")?,
        upload,
    ))
}

/// Handles one request to the upload route.
pub async fn upload(ctx: Context) -> ActionResult {
    if ctx.request().method() != &Method::Post {
        return Ok(Response::content("ok!", StatusCode::Ok));
    }

    let form = ctx.form().await?;
    let mut saved = None;

    if let Some((_, file)) = form.first_file() {
        let name = file
            .filename()
            .and_then(|name| Path::new(name).file_name())
            .and_then(|name| name.to_str());
        if let Some(name) = name {
            let target = ctx.files().root().join(name);
            tokio::fs::write(&target, file.as_bytes()).await?;
            info!(file = %target.display(), bytes = file.as_bytes().len(), "upload saved");
            saved = Some(name.to_owned());
        }
    }

    let summary = UploadSummary {
        fields: form.summary(),
        saved,
    };
    Ok(Response::json(&summary, StatusCode::Ok)?)
}
