//! Middleware pipeline.
//!
//! Middleware runs in registration order before routing. Each layer receives
//! the [`Context`] and a [`Next`] cursor, and may:
//!
//! - **pass through** by calling `next.run(ctx).await`,
//! - **short-circuit** by returning a [`Response`] without calling `next`,
//! - **decorate** the response returned by `next`.
//!
//! Once the chain is exhausted, [`Next::run`] hands the request to the
//! dispatcher's route/static endpoint.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;
use tracing::info;

use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::http::Response;

/// A type-erased, reference-counted middleware function.
///
/// ```
/// use std::sync::Arc;
/// use wwwroot::context::Context;
/// use wwwroot::middleware::{MiddlewareHandler, Next};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a layer can forward a
/// request at most once.
pub struct Next {
    dispatcher: Arc<Dispatcher>,
    // Index of the middleware the next `run` invokes.
    index: usize,
}

impl Next {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            index: 0,
        }
    }

    /// Invokes the next middleware, or the endpoint once none remain.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.dispatcher.middleware_at(self.index) {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => self.dispatcher.endpoint(ctx).await,
        }
    }
}

/// The core middleware trait.
///
/// Implementations are shared across connection tasks, so they must be
/// `Send + Sync` and return a `Send` future.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs one line per request once the response is ready:
///
/// ```text
/// GET /docs/ - 200 (1.2ms)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLog;

impl Middleware for AccessLog {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let target = match ctx.request().query_string() {
                Some(query) => format!("{}?{}", ctx.request().target(), query),
                None => ctx.request().target().to_owned(),
            };
            let peer = ctx
                .request()
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "-".to_owned());

            let response = next.run(ctx).await;

            info!(
                peer = %peer,
                "{} {} - {} ({:?})",
                method,
                target,
                response.status().as_u16(),
                start.elapsed()
            );

            response
        })
    }
}
