//! Route authorization.
//!
//! A route declares an [`Authorize`] requirement. The dispatcher hands it to
//! the server's [`AuthorizationChain`], which runs the configured
//! [`Authorizer`]s in registration order until one of them satisfies the
//! requirement. A failed authorizer is a normal outcome, not an error; the
//! chain only reports [`ServeError::Unauthorized`] once every authorizer has
//! been tried.
//!
//! With a requirement in place and no authorizers configured, every request
//! is refused.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ServeError;
use crate::http::Request;

/// Result of a single authorizer run.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthOutcome {
    pub success: bool,
    /// Opaque data handed to route predicates and, on success, to the action.
    pub data: Value,
}

impl AuthOutcome {
    pub fn granted(data: Value) -> Self {
        Self {
            success: true,
            data,
        }
    }

    pub fn denied() -> Self {
        Self {
            success: false,
            data: Value::Null,
        }
    }
}

/// A pluggable credential check.
///
/// `config` is the opaque value the authorizer was registered with. The
/// returned future may perform I/O; the dispatcher awaits it before running
/// the route action.
///
/// Plain closures `Fn(&Request, &Value) -> AuthOutcome` implement this trait.
pub trait Authorizer: Send + Sync {
    fn authorize<'a>(
        &'a self,
        request: &'a Request,
        config: &'a Value,
    ) -> Pin<Box<dyn Future<Output = AuthOutcome> + Send + 'a>>;
}

impl<F> Authorizer for F
where
    F: Fn(&Request, &Value) -> AuthOutcome + Send + Sync,
{
    fn authorize<'a>(
        &'a self,
        request: &'a Request,
        config: &'a Value,
    ) -> Pin<Box<dyn Future<Output = AuthOutcome> + Send + 'a>> {
        let outcome = self(request, config);
        Box::pin(std::future::ready(outcome))
    }
}

/// An authorizer paired with its configuration.
#[derive(Clone)]
pub struct AuthorizerEntry {
    authorizer: Arc<dyn Authorizer>,
    config: Value,
}

impl AuthorizerEntry {
    pub fn new<A>(authorizer: A, config: Value) -> Self
    where
        A: Authorizer + 'static,
    {
        Self {
            authorizer: Arc::new(authorizer),
            config,
        }
    }
}

impl fmt::Debug for AuthorizerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizerEntry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A route's authorization requirement.
#[derive(Clone, Default)]
pub enum Authorize {
    /// No check.
    #[default]
    None,
    /// Any configured authorizer must succeed.
    Required,
    /// An authorizer must succeed and the predicate must accept its data.
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl Authorize {
    /// Builds a [`Authorize::Predicate`] requirement.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn is_required(&self) -> bool {
        !matches!(self, Self::None)
    }

    fn accepts(&self, data: &Value) -> bool {
        match self {
            Self::None | Self::Required => true,
            Self::Predicate(f) => f(data),
        }
    }
}

impl From<bool> for Authorize {
    fn from(required: bool) -> Self {
        if required { Self::Required } else { Self::None }
    }
}

impl fmt::Debug for Authorize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Required => f.write_str("Required"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// The server's ordered list of authorizers.
#[derive(Debug, Default, Clone)]
pub struct AuthorizationChain {
    authorizers: Vec<AuthorizerEntry>,
}

impl AuthorizationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: AuthorizerEntry) {
        self.authorizers.push(entry);
    }

    pub fn len(&self) -> usize {
        self.authorizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorizers.is_empty()
    }

    /// Checks `request` against `requirement`.
    ///
    /// Returns `Ok(None)` when nothing is required, and `Ok(Some(data))` with
    /// the data of the first authorizer that satisfied the requirement.
    ///
    /// # Errors
    ///
    /// [`ServeError::Unauthorized`] when no authorizer satisfied it, including
    /// when none are configured.
    pub async fn evaluate(
        &self,
        requirement: &Authorize,
        request: &Request,
    ) -> Result<Option<Value>, ServeError> {
        if !requirement.is_required() {
            return Ok(None);
        }
        if self.authorizers.is_empty() {
            warn!(path = %request.path(), "route requires authorization but no authorizer is configured");
            return Err(ServeError::Unauthorized);
        }

        for (index, entry) in self.authorizers.iter().enumerate() {
            let outcome = entry.authorizer.authorize(request, &entry.config).await;
            if outcome.success && requirement.accepts(&outcome.data) {
                debug!(authorizer = index, "authorization granted");
                return Ok(Some(outcome.data));
            }
        }

        Err(ServeError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
struct TokenConfig {
    #[serde(default = "default_token_header")]
    header: String,
    tokens: Vec<String>,
}

fn default_token_header() -> String {
    "Authorization".to_owned()
}

/// Accepts requests carrying one of a fixed set of tokens in a header.
///
/// Configuration: `{"header": "X-Api-Key", "tokens": ["secret"]}`. The header
/// defaults to `Authorization`, where an optional `Bearer ` prefix is
/// stripped. On success the data is `{"token": "<token>"}`.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use wwwroot::security::{AuthorizerEntry, HeaderTokenAuthorizer};
///
/// let entry = AuthorizerEntry::new(
///     HeaderTokenAuthorizer,
///     json!({"header": "X-Api-Key", "tokens": ["letmein"]}),
/// );
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderTokenAuthorizer;

impl HeaderTokenAuthorizer {
    fn check(request: &Request, config: &Value) -> AuthOutcome {
        let config = match TokenConfig::deserialize(config) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "invalid token authorizer config");
                return AuthOutcome::denied();
            }
        };

        let Some(value) = request.headers().get(&config.header) else {
            return AuthOutcome::denied();
        };
        let value = value.trim();
        let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();

        if config.tokens.iter().any(|t| t == token) {
            AuthOutcome::granted(json!({ "token": token }))
        } else {
            AuthOutcome::denied()
        }
    }
}

impl Authorizer for HeaderTokenAuthorizer {
    fn authorize<'a>(
        &'a self,
        request: &'a Request,
        config: &'a Value,
    ) -> Pin<Box<dyn Future<Output = AuthOutcome> + Send + 'a>> {
        Box::pin(std::future::ready(Self::check(request, config)))
    }
}
