//! Server configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config file.
//! Keys are camelCase:
//!
//! ```json
//! {
//!   "root": "./public",
//!   "port": 8080,
//!   "directoryBrowse": false,
//!   "defaultDocuments": ["index.html"],
//!   "bodyTimeoutSecs": 10
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while loading or validating a [`ServerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("root {root} is not a directory")]
    RootNotDirectory { root: PathBuf },

    #[error("port must not be 0")]
    InvalidPort,
}

/// Settings for one server instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Directory static files are served from.
    pub root: PathBuf,
    pub host: String,
    pub port: u16,
    /// Render a listing for directories without a default document.
    pub directory_browse: bool,
    /// File names tried, in order, when a directory is requested.
    pub default_documents: Vec<String>,
    /// Include error details in `500` bodies and log at debug level.
    pub debug: bool,
    /// Longest pause allowed between two reads of a request body.
    pub body_timeout_secs: u64,
    /// Largest accepted `Content-Length`.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            host: "127.0.0.1".to_owned(),
            port: 8080,
            directory_browse: true,
            default_documents: ["index.html", "index.htm", "default.html", "default.htm"]
                .map(String::from)
                .to_vec(),
            debug: false,
            body_timeout_secs: 30,
            max_body_size: 8 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Loads a config from a JSON file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Resolves `root` to an absolute path and checks the settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::RootNotDirectory`] or [`ConfigError::InvalidPort`].
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        let root = std::fs::canonicalize(&self.root)
            .ok()
            .filter(|root| root.is_dir())
            .ok_or_else(|| ConfigError::RootNotDirectory {
                root: self.root.clone(),
            })?;
        self.root = root;
        Ok(())
    }

    /// `host:port`, ready for [`Server::bind`](crate::server::Server::bind).
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn body_timeout(&self) -> Duration {
        Duration::from_secs(self.body_timeout_secs)
    }
}
