//! Per-request orchestration.
//!
//! A request moves through these phases, in order:
//!
//! 1. middleware, in registration order (any layer may answer early);
//! 2. [`Router::resolve`]; on a match, the [`AuthorizationChain`] and then
//!    the route action, run on its own task so a panic becomes a `500`;
//! 3. otherwise [`StaticFiles::serve`]: a file, a redirect, a default
//!    document, a listing, `403` or `404`.
//!
//! Every failure is turned into exactly one response here; only socket
//! errors reach the connection loop.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::ServerConfig;
use crate::context::{Context, Parameters};
use crate::error::ServeError;
use crate::fs::StaticFiles;
use crate::http::{Request, Response};
use crate::middleware::{MiddlewareHandler, Next};
use crate::router::{Handler, Route, Router};
use crate::security::{AuthorizationChain, Authorize, Authorizer, AuthorizerEntry};

/// Routes, authorizers, middleware and the static root of one server.
///
/// Built before the server starts and shared read-only afterwards.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use wwwroot::config::ServerConfig;
/// use wwwroot::dispatcher::Dispatcher;
/// use wwwroot::http::{Method, Response, StatusCode};
/// use wwwroot::router::Route;
///
/// let mut dispatcher = Dispatcher::new(&ServerConfig::default());
/// dispatcher.route(Route::new(Method::Get, "/ping", |_ctx| async {
///     Ok(Response::content("pong", StatusCode::Ok))
/// }));
/// let dispatcher = Arc::new(dispatcher);
/// ```
pub struct Dispatcher {
    router: Router,
    authorizers: AuthorizationChain,
    middleware: Vec<MiddlewareHandler>,
    files: Arc<StaticFiles>,
    debug: bool,
}

impl Dispatcher {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            router: Router::new(),
            authorizers: AuthorizationChain::new(),
            middleware: Vec::new(),
            files: Arc::new(StaticFiles::from_config(config)),
            debug: config.debug,
        }
    }

    /// Registers a route.
    pub fn route(&mut self, route: Route) -> &mut Self {
        self.router.register(route);
        self
    }

    /// Appends an authorizer with its configuration.
    pub fn authorizer<A>(&mut self, authorizer: A, config: Value) -> &mut Self
    where
        A: Authorizer + 'static,
    {
        self.authorizers.push(AuthorizerEntry::new(authorizer, config));
        self
    }

    /// Appends a middleware layer.
    pub fn middleware(&mut self, handler: MiddlewareHandler) -> &mut Self {
        self.middleware.push(handler);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn files(&self) -> &StaticFiles {
        &self.files
    }

    pub(crate) fn middleware_at(&self, index: usize) -> Option<MiddlewareHandler> {
        self.middleware.get(index).cloned()
    }

    /// Produces the response for `request`.
    pub async fn dispatch(self: Arc<Self>, request: Request) -> Response {
        let ctx = Context::new(request, Arc::clone(&self.files)).with_debug(self.debug);
        Next::new(self).run(ctx).await
    }

    // Runs after the middleware chain.
    pub(crate) async fn endpoint(&self, ctx: Context) -> Response {
        let routed = self
            .router
            .resolve(ctx.request().method(), ctx.request().path())
            .map(|found| {
                debug!(
                    path = %ctx.request().path(),
                    priority = found.route.priority_value(),
                    "route matched"
                );
                (
                    found.route.requirement().clone(),
                    Arc::clone(found.route.action()),
                    found.params,
                )
            });

        let result = match routed {
            Some((requirement, action, params)) => {
                self.run_route(ctx, requirement, action, params).await
            }
            None => self.files.serve(ctx.request()).await,
        };

        result.unwrap_or_else(|e| e.into_response(self.debug))
    }

    async fn run_route(
        &self,
        mut ctx: Context,
        requirement: Authorize,
        action: Handler,
        params: Parameters,
    ) -> Result<Response, ServeError> {
        let auth = self.authorizers.evaluate(&requirement, ctx.request()).await?;
        ctx.set_params(params);
        ctx.set_auth(auth);

        let mut task = AbortOnDrop(tokio::spawn(action(ctx)));
        match (&mut task.0).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ServeError::Handler(e)),
            Err(e) => {
                error!(error = %e, "route action did not complete");
                Err(ServeError::HandlerPanicked)
            }
        }
    }
}

// The action task lives no longer than the request that started it: if the
// connection task is dropped mid-dispatch, the action is cancelled too.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.router.len())
            .field("authorizers", &self.authorizers.len())
            .field("middleware", &self.middleware.len())
            .field("files", &self.files)
            .field("debug", &self.debug)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::error::ActionResult;
    use crate::http::{Method, StatusCode};
    use crate::security::HeaderTokenAuthorizer;

    fn dispatcher(root: &std::path::Path, debug: bool) -> Dispatcher {
        let config = ServerConfig {
            root: root.to_owned(),
            debug,
            ..ServerConfig::default()
        };
        Dispatcher::new(&config)
    }

    fn request(method: &str, target: &str, headers: &str) -> Request {
        let raw = format!("{method} {target} HTTP/1.1\r\n{headers}\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn body_text(response: &Response) -> String {
        String::from_utf8(response.bytes().unwrap_or_default().to_vec()).unwrap()
    }

    // ── Routing vs static ─────────────────────────────────────────────────

    #[tokio::test]
    async fn routes_take_precedence_over_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.html"), "static").unwrap();
        std::fs::write(dir.path().join("other.html"), "other").unwrap();

        let mut d = dispatcher(dir.path(), false);
        d.route(Route::new(Method::Get, "/page.html", |_ctx| async {
            Ok(Response::content("routed", StatusCode::Ok))
        }));
        let d = Arc::new(d);

        let response = Arc::clone(&d).dispatch(request("GET", "/page.html", "")).await;
        assert_eq!(body_text(&response), "routed");

        let response = Arc::clone(&d).dispatch(request("POST", "/page.html", "")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(response.bytes().is_none(), "falls through to the file");

        let response = d.dispatch(request("GET", "/nothing", "")).await;
        assert_eq!(response.status(), StatusCode::NotFound);
        assert!(body_text(&response).contains("404 - File Not Found."));
    }

    #[tokio::test]
    async fn params_reach_the_action() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(dir.path(), false);
        d.router_mut().get("/users/:id", |ctx| async move {
            let id = ctx.params().get("id").unwrap_or_default().to_owned();
            Ok(Response::content(id, StatusCode::Ok))
        });

        let response = Arc::new(d).dispatch(request("GET", "/users/7", "")).await;
        assert_eq!(body_text(&response), "7");
    }

    // ── Authorization ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn required_authorization_without_authorizers_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(dir.path(), false);
        d.route(
            Route::new(Method::Get, "/admin", |_ctx| async {
                Ok(Response::content("secret", StatusCode::Ok))
            })
            .authorize(Authorize::Required),
        );
        let d = Arc::new(d);

        for headers in ["", "Authorization: Bearer anything\r\n"] {
            let response = Arc::clone(&d).dispatch(request("GET", "/admin", headers)).await;
            assert_eq!(response.status(), StatusCode::Unauthorized);
            assert_eq!(body_text(&response), "<h1>401 Unauthorized</h1>");
        }
    }

    #[tokio::test]
    async fn authorizer_data_reaches_the_action() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(dir.path(), false);
        d.authorizer(HeaderTokenAuthorizer, json!({"tokens": ["t0k"]}));
        d.route(
            Route::new(Method::Get, "/me", |ctx| async move {
                let token = ctx.auth_data().map(|d| d["token"].to_string()).unwrap_or_default();
                Ok(Response::content(token, StatusCode::Ok))
            })
            .authorize(Authorize::Required),
        );
        let d = Arc::new(d);

        let ok = Arc::clone(&d)
            .dispatch(request("GET", "/me", "Authorization: Bearer t0k\r\n"))
            .await;
        assert_eq!(body_text(&ok), "\"t0k\"");

        let denied = d.dispatch(request("GET", "/me", "Authorization: nope\r\n")).await;
        assert_eq!(denied.status(), StatusCode::Unauthorized);
    }

    // ── Action failures ───────────────────────────────────────────────────

    #[tokio::test]
    async fn action_errors_become_500() {
        let dir = tempfile::tempdir().unwrap();
        for debug in [false, true] {
            let mut d = dispatcher(dir.path(), debug);
            d.route(Route::new(Method::Get, "/fail", |_ctx| async {
                Err("disk on fire".into())
            }));
            let response = Arc::new(d).dispatch(request("GET", "/fail", "")).await;
            assert_eq!(response.status(), StatusCode::InternalServerError);
            assert_eq!(body_text(&response).contains("disk on fire"), debug);
        }
    }

    #[tokio::test]
    async fn action_panics_become_500() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(dir.path(), false);
        d.route(Route::new(Method::Get, "/panic", |_ctx| async {
            if true {
                panic!("boom");
            }
            Ok(Response::new(StatusCode::Ok))
        }));
        let response = Arc::new(d).dispatch(request("GET", "/panic", "")).await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_eq!(body_text(&response), "<h1>500 Server Error</h1>");
    }

    #[tokio::test]
    async fn dropping_a_dispatch_cancels_its_action() {
        let dir = tempfile::tempdir().unwrap();
        let witness = Arc::new(());
        let held = Arc::clone(&witness);

        let mut d = dispatcher(dir.path(), false);
        d.route(Route::new(Method::Get, "/slow", move |_ctx| {
            let held = Arc::clone(&held);
            async move {
                let _held = held;
                std::future::pending::<ActionResult>().await
            }
        }));
        let d = Arc::new(d);
        let baseline = Arc::strong_count(&witness);

        let dispatch = Arc::clone(&d).dispatch(request("GET", "/slow", ""));
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), dispatch).await;
        assert!(timed_out.is_err());

        for _ in 0..100 {
            if Arc::strong_count(&witness) == baseline {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&witness), baseline);
    }
}
