//! Static resources under a root directory.
//!
//! [`StaticFiles::classify`] maps a decoded URL path onto the filesystem and
//! [`StaticFiles::serve`] turns the result into a response:
//!
//! | Resource                           | Response                               |
//! |------------------------------------|----------------------------------------|
//! | missing                            | `404`                                  |
//! | file                               | [`range::serve_file`]                  |
//! | directory, no trailing slash       | `301` to the same path plus `/`        |
//! | directory with a default document  | that document                          |
//! | directory, browsing disabled       | `403`                                  |
//! | directory, browsing enabled        | [`listing`] page                       |
//!
//! Paths containing `..` never leave the root: they are refused with `403`.

use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::config::ServerConfig;
use crate::error::ServeError;
use crate::http::{Request, Response, StatusCode};

pub mod listing;
pub mod mime;
pub mod range;

/// What a URL path resolved to.
#[derive(Debug)]
pub enum Resource {
    Missing,
    File { path: PathBuf, metadata: Metadata },
    Directory { path: PathBuf },
}

/// The static side of the server.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    default_documents: Vec<String>,
    directory_browse: bool,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_documents: ServerConfig::default().default_documents,
            directory_browse: true,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            root: config.root.clone(),
            default_documents: config.default_documents.clone(),
            directory_browse: config.directory_browse,
        }
    }

    /// Sets the names tried, in order, when a directory is requested.
    #[must_use]
    pub fn default_documents<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_documents = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn directory_browse(mut self, enabled: bool) -> Self {
        self.directory_browse = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a decoded URL path to a filesystem path below the root.
    ///
    /// # Errors
    ///
    /// [`ServeError::Forbidden`] if the path contains a `..` segment.
    pub fn resolve_path(&self, url_path: &str) -> Result<PathBuf, ServeError> {
        let mut path = self.root.clone();
        for component in Path::new(url_path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => return Err(ServeError::Forbidden),
            }
        }
        Ok(path)
    }

    /// Classifies `url_path` as missing, a regular file or a directory.
    ///
    /// # Errors
    ///
    /// [`ServeError::Forbidden`] for paths escaping the root.
    pub async fn classify(&self, url_path: &str) -> Result<Resource, ServeError> {
        let path = self.resolve_path(url_path)?;
        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            return Ok(Resource::Missing);
        };

        if metadata.is_file() {
            Ok(Resource::File { path, metadata })
        } else {
            Ok(Resource::Directory { path })
        }
    }

    /// Serves `request` from the filesystem.
    ///
    /// # Errors
    ///
    /// [`ServeError::NotFound`], [`ServeError::Forbidden`] or
    /// [`ServeError::Io`]; the dispatcher renders them.
    pub async fn serve(&self, request: &Request) -> Result<Response, ServeError> {
        match self.classify(request.path()).await? {
            Resource::Missing => Err(ServeError::NotFound),
            Resource::File { path, .. } => range::serve_file(&path, request.headers()).await,
            Resource::Directory { path } => self.serve_directory(request, &path).await,
        }
    }

    /// Serves the file at `path` directly, bypassing URL resolution.
    pub async fn serve_path(&self, path: &Path, request: &Request) -> Result<Response, ServeError> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => range::serve_file(path, request.headers()).await,
            _ => Err(ServeError::NotFound),
        }
    }

    async fn serve_directory(&self, request: &Request, dir: &Path) -> Result<Response, ServeError> {
        if !request.path().ends_with('/') {
            let mut location = format!("{}/", request.target());
            if let Some(query) = request.query_string() {
                location.push('?');
                location.push_str(query);
            }
            debug!(location = %location, "directory redirect");
            return Ok(Response::redirect(location));
        }

        for name in &self.default_documents {
            let candidate = dir.join(name);
            if tokio::fs::metadata(&candidate)
                .await
                .is_ok_and(|m| m.is_file())
            {
                debug!(document = %candidate.display(), "default document");
                return range::serve_file(&candidate, request.headers()).await;
            }
        }

        if !self.directory_browse {
            return Err(ServeError::Forbidden);
        }

        let entries = listing::read_entries(dir).await?;
        let html = listing::render(request.path(), request.target(), &entries, SystemTime::now());
        Ok(Response::content(html, StatusCode::Ok))
    }
}
