//! Dispatch errors and their HTTP rendering.

use html_escape::encode_text;
use thiserror::Error;
use tracing::{error, warn};

use crate::http::{Response, StatusCode};

/// Boxed error type returned by route actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a route action returns. `Err` becomes a `500 Internal Server Error`.
pub type ActionResult = Result<Response, BoxError>;

/// Failures handled at the dispatch boundary.
///
/// Each kind maps to a status code and a short HTML body that never includes
/// the underlying detail unless debug output is enabled.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("resource not found")]
    NotFound,

    #[error("access forbidden")]
    Forbidden,

    #[error("authorization failed")]
    Unauthorized,

    #[error("route action failed: {0}")]
    Handler(#[source] BoxError),

    #[error("route action panicked")]
    HandlerPanicked,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NotFound,
            Self::Forbidden => StatusCode::Forbidden,
            Self::Unauthorized => StatusCode::Unauthorized,
            Self::Handler(_) | Self::HandlerPanicked | Self::Io(_) => {
                StatusCode::InternalServerError
            }
        }
    }

    fn public_body(&self) -> &'static str {
        match self {
            Self::NotFound => {
                "<html><head><title>404</title></head><body><h1>404 - File Not Found.</h1></body></html>"
            }
            Self::Forbidden => "<h1>403 Forbidden</h1>",
            Self::Unauthorized => "<h1>401 Unauthorized</h1>",
            Self::Handler(_) | Self::HandlerPanicked | Self::Io(_) => "<h1>500 Server Error</h1>",
        }
    }

    /// Logs the error and renders it as a response.
    ///
    /// With `debug` set, server errors append the escaped detail to the body.
    pub fn into_response(self, debug: bool) -> Response {
        let status = self.status();
        let mut body = self.public_body().to_owned();

        if status == StatusCode::InternalServerError {
            error!(error = %self, "request failed");
            if debug {
                body.push_str("<pre>");
                body.push_str(&encode_text(&self.to_string()));
                body.push_str("</pre>");
            }
        } else if status == StatusCode::Unauthorized {
            warn!("authorization failed");
        }

        Response::content(body, status)
    }
}
