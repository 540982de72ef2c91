//! # wwwroot
//!
//! A from-scratch async static file server with programmatic routes.
//!
//! Requests first pass through a middleware chain, then a priority-ordered
//! route table with pluggable authorization, and finally fall back to the
//! static root: range-aware file responses, default documents and directory
//! listings.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wwwroot::config::ServerConfig;
//! use wwwroot::dispatcher::Dispatcher;
//! use wwwroot::http::{Method, Response, StatusCode};
//! use wwwroot::router::Route;
//! use wwwroot::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let mut dispatcher = Dispatcher::new(&config);
//!     dispatcher.route(Route::new(Method::Get, "/hello", |_ctx| async {
//!         Ok(Response::content("Hello, World!", StatusCode::Ok))
//!     }));
//!
//!     let server = Server::bind(config.address()).await?.with_config(&config);
//!     server.run(Arc::new(dispatcher)).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod form;
pub mod fs;
pub mod http;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;
pub mod upload;

pub use config::ServerConfig;
pub use dispatcher::Dispatcher;
pub use error::{ActionResult, BoxError, ServeError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{Route, Router};
pub use server::{Server, ServerError};
