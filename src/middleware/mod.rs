//! Middleware pipeline — composable before/after logic around the router.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining chain; [`Next::run`] advances it, and
//!   once the chain is exhausted the request reaches the [`Router`].
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`] — an ordered middleware stack terminated by a router; this is
//!   what the [`Server`](crate::Server) calls for every request.
//! - [`LoggerMiddleware`] — one `tracing` line per request.
//! - [`CompressionMiddleware`] — gzip response bodies for clients that ask.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Request, Response, Router, context::Context};

mod compression;

pub use compression::CompressionMiddleware;

/// A type-erased, reference-counted middleware function.
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
/// `Next` is consumed by [`run`](Self::run), so each middleware can forward a
/// request at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Arc<Router>,
    // Which middleware the next `run` invokes.
    index: usize,
}

impl Next {
    fn new(middlewares: Arc<[MiddlewareHandler]>, endpoint: Arc<Router>) -> Self {
        Self {
            middlewares,
            endpoint,
            index: 0,
        }
    }

    /// Invokes the next middleware, or routes the request once none remain.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => self.endpoint.route(ctx.into_request()).await,
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may pass the request through (`next.run(ctx).await`),
/// short-circuit with their own [`Response`], or decorate the downstream
/// response before returning it. They are shared across Tokio tasks, so they
/// must be `Send + Sync` and return a `Send` future.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack in front of a [`Router`].
///
/// Middleware runs in the order it was added; the first one added sees the
/// request first and the response last.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use record_store::Router;
/// use record_store::middleware::{LoggerMiddleware, Pipeline};
///
/// let pipeline = Pipeline::new(Router::new()).with(Arc::new(LoggerMiddleware));
/// ```
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Arc<[MiddlewareHandler]>,
    router: Arc<Router>,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        Self {
            middlewares: Arc::from(Vec::new()),
            router: Arc::new(router),
        }
    }

    /// Appends a middleware to the end of the stack.
    #[must_use]
    pub fn with<M>(self, middleware: Arc<M>) -> Self
    where
        M: Middleware + 'static,
    {
        let mut middlewares = self.middlewares.to_vec();
        middlewares.push(from_middleware(middleware));
        Self {
            middlewares: Arc::from(middlewares),
            router: self.router,
        }
    }

    /// Runs `request` through every middleware and then the router.
    pub async fn handle(&self, request: Request) -> Response {
        let next = Next::new(Arc::clone(&self.middlewares), Arc::clone(&self.router));
        next.run(Context::new(request)).await
    }
}

/// Logs each request's method, path, status, and duration once the
/// downstream response is ready. Never short-circuits.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            tracing::info!(
                %method,
                %path,
                status = response.status().as_u16(),
                elapsed = ?start.elapsed(),
                "request handled"
            );

            response
        })
    }
}
