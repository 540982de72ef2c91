//! Request routing with priority resolution.
//!
//! A [`Router`] owns an ordered table of [`Route`]s. Each route binds a set
//! of methods and a [`PathMatcher`] to an async action, and carries an
//! integer priority (default `0`) and an optional authorization requirement.
//!
//! [`Router::resolve`] considers every route whose method set and matcher
//! both accept the request, and returns the one with the highest priority.
//! Among equal priorities the most recently registered route wins. When
//! nothing matches the dispatcher falls through to static file serving.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, Parameters};
use crate::error::ActionResult;
use crate::http::{Method, MethodSet};
use crate::security::Authorize;

pub mod matcher;

pub use matcher::{PathMatcher, Pattern};

/// Type-erased, heap-allocated async action that processes a [`Context`].
///
/// You rarely build one by hand; [`Route::new`] and the method-specific
/// helpers on [`Router`] box closures for you.
pub type Handler = Arc<
    dyn Fn(Context) -> Pin<Box<dyn Future<Output = ActionResult> + Send>> + Send + Sync + 'static,
>;

/// One entry of the route table.
///
/// # Examples
///
/// ```
/// use wwwroot::http::{Method, Response, StatusCode};
/// use wwwroot::router::{PathMatcher, Route};
/// use wwwroot::security::Authorize;
///
/// let route = Route::new(
///     [Method::Get, Method::Post],
///     PathMatcher::regex(r"(?i)upload\.action").unwrap(),
///     |_ctx| async { Ok(Response::content("ok!", StatusCode::Ok)) },
/// )
/// .priority(10)
/// .authorize(Authorize::Required);
///
/// assert_eq!(route.priority_value(), 10);
/// ```
#[derive(Clone)]
pub struct Route {
    priority: i32,
    methods: MethodSet,
    matcher: PathMatcher,
    authorize: Authorize,
    action: Handler,
}

impl Route {
    /// Creates a route with priority `0` and no authorization requirement.
    pub fn new<H, F>(methods: impl Into<MethodSet>, matcher: impl Into<PathMatcher>, action: H) -> Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = ActionResult> + Send + 'static,
    {
        let action: Handler = Arc::new(move |ctx| Box::pin(action(ctx)));
        Self {
            priority: 0,
            methods: methods.into(),
            matcher: matcher.into(),
            authorize: Authorize::None,
            action,
        }
    }

    /// Sets the priority. Higher values win.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the authorization requirement.
    #[must_use]
    pub fn authorize(mut self, authorize: Authorize) -> Self {
        self.authorize = authorize;
        self
    }

    pub fn priority_value(&self) -> i32 {
        self.priority
    }

    pub fn methods(&self) -> &MethodSet {
        &self.methods
    }

    pub fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    pub fn requirement(&self) -> &Authorize {
        &self.authorize
    }

    pub fn action(&self) -> &Handler {
        &self.action
    }

    // Returns `Some(params)` when both the method and the path match.
    fn matches(&self, method: &Method, path: &str) -> Option<Parameters> {
        if self.methods.contains(method) {
            self.matcher.matches(path)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("priority", &self.priority)
            .field("methods", &self.methods)
            .field("matcher", &self.matcher)
            .field("authorize", &self.authorize)
            .finish_non_exhaustive()
    }
}

/// The route selected for a request, with the parameters its matcher captured.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: Parameters,
}

/// The route table.
///
/// Owned by the dispatcher and read-only once the server is running.
///
/// # Examples
///
/// ```
/// use wwwroot::http::{Method, Response, StatusCode};
/// use wwwroot::router::{Route, Router};
///
/// let mut router = Router::new();
/// router.get("/ping", |_ctx| async { Ok(Response::new(StatusCode::Ok)) });
/// router.register(
///     Route::new(Method::Get, "/ping", |_ctx| async { Ok(Response::new(StatusCode::NoContent)) })
///         .priority(5),
/// );
///
/// let found = router.resolve(&Method::Get, "/ping").unwrap();
/// assert_eq!(found.route.priority_value(), 5);
/// assert!(router.resolve(&Method::Post, "/ping").is_none());
/// ```
#[derive(Debug, Default, Clone)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Appends `route` to the table. Duplicates are kept.
    pub fn register(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Registers a `GET` action at `path`, see [`Pattern::parse`].
    pub fn get<H, F>(&mut self, path: &str, action: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = ActionResult> + Send + 'static,
    {
        self.register(Route::new(Method::Get, path, action));
    }

    /// Registers a `POST` action at `path`.
    pub fn post<H, F>(&mut self, path: &str, action: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = ActionResult> + Send + 'static,
    {
        self.register(Route::new(Method::Post, path, action));
    }

    /// Registers a `PUT` action at `path`.
    pub fn put<H, F>(&mut self, path: &str, action: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = ActionResult> + Send + 'static,
    {
        self.register(Route::new(Method::Put, path, action));
    }

    /// Registers a `DELETE` action at `path`.
    pub fn delete<H, F>(&mut self, path: &str, action: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = ActionResult> + Send + 'static,
    {
        self.register(Route::new(Method::Delete, path, action));
    }

    /// Registers an `OPTIONS` action at `path`.
    pub fn options<H, F>(&mut self, path: &str, action: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = ActionResult> + Send + 'static,
    {
        self.register(Route::new(Method::Options, path, action));
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Selects the route that should handle `method` + `path`.
    ///
    /// Highest priority wins; on a tie the route registered last wins.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let mut best: Option<RouteMatch<'_>> = None;

        for route in &self.routes {
            let Some(params) = route.matches(method, path) else {
                continue;
            };
            // `>=` lets a later registration take over an equal priority.
            let better = best
                .as_ref()
                .is_none_or(|current| route.priority >= current.route.priority);
            if better {
                best = Some(RouteMatch { route, params });
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Response, StatusCode};

    fn tagged(priority: i32, tag: &'static str) -> Route {
        Route::new(Method::Get, "/same", move |_ctx| async move {
            Ok(Response::new(StatusCode::Ok).body(tag))
        })
        .priority(priority)
    }

    // Registration index of the route selected for `GET /same`.
    fn winner_index(router: &Router) -> usize {
        let found = router.resolve(&Method::Get, "/same").unwrap();
        router
            .routes
            .iter()
            .position(|r| std::ptr::eq(r, found.route))
            .unwrap()
    }

    // ── Priority ──────────────────────────────────────────────────────────

    #[test]
    fn higher_priority_wins_in_either_order() {
        let mut router = Router::new();
        router.register(tagged(5, "low"));
        router.register(tagged(10, "high"));
        assert_eq!(router.resolve(&Method::Get, "/same").unwrap().route.priority_value(), 10);

        let mut router = Router::new();
        router.register(tagged(10, "high"));
        router.register(tagged(5, "low"));
        assert_eq!(router.resolve(&Method::Get, "/same").unwrap().route.priority_value(), 10);
    }

    #[test]
    fn equal_priority_prefers_last_registered() {
        let mut router = Router::new();
        router.register(tagged(5, "first"));
        router.register(tagged(5, "second"));
        router.register(tagged(1, "lower"));

        for _ in 0..10 {
            assert_eq!(winner_index(&router), 1);
        }
    }

    #[test]
    fn negative_priority_still_matches() {
        let mut router = Router::new();
        router.register(tagged(-3, "only"));
        assert_eq!(router.resolve(&Method::Get, "/same").unwrap().route.priority_value(), -3);
    }

    // ── Matching ──────────────────────────────────────────────────────────

    #[test]
    fn method_set_filters_routes() {
        let mut router = Router::new();
        router.register(Route::new(
            [Method::Get, Method::Post],
            "/form",
            |_ctx| async { Ok(Response::new(StatusCode::Ok)) },
        ));

        assert!(router.resolve(&Method::Get, "/form").is_some());
        assert!(router.resolve(&Method::Post, "/form").is_some());
        assert!(router.resolve(&Method::Delete, "/form").is_none());
    }

    #[test]
    fn params_come_from_the_selected_route() {
        let mut router = Router::new();
        router.get("/users/:id", |_ctx| async { Ok(Response::new(StatusCode::Ok)) });

        let found = router.resolve(&Method::Get, "/users/42").unwrap();
        assert_eq!(found.params.get("id"), Some("42"));
        assert!(router.resolve(&Method::Get, "/users").is_none());
    }

    #[test]
    fn no_match_returns_none() {
        let mut router = Router::new();
        assert!(router.is_empty());
        router.post("/a", |_ctx| async { Ok(Response::new(StatusCode::Ok)) });
        router.put("/a", |_ctx| async { Ok(Response::new(StatusCode::Ok)) });
        router.delete("/a", |_ctx| async { Ok(Response::new(StatusCode::Ok)) });
        router.options("/a", |_ctx| async { Ok(Response::new(StatusCode::Ok)) });
        assert_eq!(router.len(), 4);
        assert!(router.resolve(&Method::Get, "/a").is_none());
        assert!(router.resolve(&Method::Post, "/b").is_none());
    }
}
