//! Request routing — map HTTP methods and URL patterns to handler functions.
//!
//! Two pattern styles are supported:
//!
//! | Pattern        | Example match  | Captured params |
//! |----------------|----------------|-----------------|
//! | `/records`     | `/records`     | *(none)*        |
//! | `/record/:id`  | `/record/42`   | `id → "42"`     |
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so
//! `/records/` and `/records` are equivalent. Routes are matched in
//! registration order; the first route whose method and pattern both match
//! wins.

use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;

use crate::context::{Context, PathParams};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler stored by the router.
///
/// Build one through [`Router::get`] or [`Router::post`]; any
/// `Fn(Context) -> impl Future<Output = Response>` qualifies.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Blanket-implemented for every `Fn(Context) -> F` where `F` is a `Send`
/// future yielding a [`Response`], so the two-parameter bound is not repeated
/// at each registration call.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled form of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    /// Compiles a pattern: anything containing a `:name` segment is
    /// parameterized, everything else matches literally.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if pattern.split('/').any(|s| s.starts_with(':')) {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_owned()),
                    None => Segment::Static(s.to_owned()),
                })
                .collect();
            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_owned())
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_owned());
                        }
                    }
                }
                Some(params)
            }
        }
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if &self.method == method {
            self.pattern.matches(path)
        } else {
            None
        }
    }
}

/// Dispatches requests to registered handlers.
///
/// Unmatched requests receive `404` with a JSON `{"error":"Not Found"}` body,
/// keeping every error the service emits in the same envelope.
///
/// # Examples
///
/// ```rust,no_run
/// use record_store::context::Context;
/// use record_store::{Response, Router, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/record/:id", |ctx: Context| async move {
///     let id = ctx.param("id").unwrap_or_default().to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `GET` handler for `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    /// Registers a `POST` handler for `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches `request` to the first matching route.
    pub async fn route(&self, request: Request) -> Response {
        let matched = self.routes.iter().find_map(|route| {
            route
                .matches(request.method(), request.path())
                .map(|params| (route, params))
        });

        match matched {
            Some((route, params)) => {
                let ctx = Context::with_params(request, params);
                (route.handler)(ctx).await
            }
            None => Response::json(StatusCode::NotFound, &json!({ "error": "Not Found" })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    #[test]
    fn pattern_parse_root_is_exact() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
    }

    #[test]
    fn pattern_parse_trailing_slash_stripped() {
        assert!(matches!(Pattern::parse("/records/"), Pattern::Exact(s) if s == "/records"));
    }

    #[test]
    fn pattern_parse_parameterized() {
        match Pattern::parse("/record/:id") {
            Pattern::Parameterized { segments } => {
                assert_eq!(segments.len(), 2);
                assert!(matches!(&segments[0], Segment::Static(s) if s == "record"));
                assert!(matches!(&segments[1], Segment::Parameter(s) if s == "id"));
            }
            other => panic!("expected Parameterized, got {other:?}"),
        }
    }

    #[test]
    fn exact_match_normalizes_trailing_slash() {
        let pat = Pattern::parse("/records");
        assert!(pat.matches("/records").is_some());
        assert!(pat.matches("/records/").is_some());
        assert!(pat.matches("/record").is_none());
    }

    #[test]
    fn root_only_matches_root() {
        let pat = Pattern::parse("/");
        assert!(pat.matches("/").is_some());
        assert!(pat.matches("/records").is_none());
    }

    #[test]
    fn param_extracts_value() {
        let params = Pattern::parse("/record/:id").matches("/record/42").unwrap();
        assert_eq!(params.get("id"), Some("42"));
    }

    #[test]
    fn param_keeps_non_numeric_values() {
        let params = Pattern::parse("/record/:id").matches("/record/abc").unwrap();
        assert_eq!(params.get("id"), Some("abc"));
    }

    #[test]
    fn param_requires_same_segment_count() {
        let pat = Pattern::parse("/record/:id");
        assert!(pat.matches("/record").is_none());
        assert!(pat.matches("/record/1/extra").is_none());
        assert!(pat.matches("/records/1").is_none());
    }

    #[test]
    fn router_counts_routes() {
        let mut router = Router::new();
        assert!(router.is_empty());
        router.get("/a", |_ctx| async { Response::new(StatusCode::Ok) });
        router.post("/b", |_ctx| async { Response::new(StatusCode::Ok) });
        assert_eq!(router.len(), 2);
    }

    #[tokio::test]
    async fn unmatched_route_is_json_404() {
        let router = Router::new();
        let res = router.route(make_request("GET", "/nowhere")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(res.body_ref(), br#"{"error":"Not Found"}"#);
    }

    #[tokio::test]
    async fn method_must_match() {
        let mut router = Router::new();
        router.get("/records", |_ctx| async { Response::new(StatusCode::Ok) });
        let res = router.route(make_request("POST", "/records")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        let res = router.route(make_request("DELETE", "/records")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/path", |_ctx| async { Response::new(StatusCode::Ok) });
        router.get("/path", |_ctx| async { Response::new(StatusCode::NoContent) });
        let res = router.route(make_request("GET", "/path")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn handler_receives_params() {
        let mut router = Router::new();
        router.get("/record/:id", |ctx: Context| async move {
            let id = ctx.param("id").unwrap_or_default().to_owned();
            Response::new(StatusCode::Ok).body(id)
        });
        let res = router.route(make_request("GET", "/record/17")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_ref(), b"17");
    }
}
