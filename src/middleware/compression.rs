//! gzip response compression.

use std::io::Write;
use std::pin::Pin;

use flate2::Compression;
use flate2::write::GzEncoder;

use super::{Middleware, Next};
use crate::http::Headers;
use crate::{Response, context::Context};

/// Compresses response bodies with gzip when the client's `Accept-Encoding`
/// allows it.
///
/// Empty bodies and responses that already carry a `Content-Encoding` are left
/// alone. Compressed responses get `Content-Encoding: gzip` and
/// `Vary: Accept-Encoding`.
///
/// # Examples
///
/// ```rust
/// use record_store::middleware::CompressionMiddleware;
///
/// let gzip = CompressionMiddleware::new(6);
/// assert_eq!(gzip.level(), 6);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CompressionMiddleware {
    level: Compression,
}

impl Default for CompressionMiddleware {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl CompressionMiddleware {
    /// `level` is clamped to gzip's 0–9 range.
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    pub fn level(&self) -> u32 {
        self.level.level()
    }
}

impl Middleware for CompressionMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let level = self.level;

        Box::pin(async move {
            let wants_gzip = accepts_gzip(ctx.request().headers());
            let mut response = next.run(ctx).await;

            if !wants_gzip
                || response.body_ref().is_empty()
                || response.headers().contains("content-encoding")
            {
                return response;
            }

            match gzip(response.body_ref(), level) {
                Ok(compressed) => {
                    response.replace_body(compressed);
                    let headers = response.headers_mut();
                    headers.set("Content-Encoding", "gzip");
                    headers.set("Vary", "Accept-Encoding");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "gzip failed, sending identity body");
                }
            }
            response
        })
    }
}

fn gzip(body: &[u8], level: Compression) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), level);
    encoder.write_all(body)?;
    encoder.finish()
}

/// Whether any `Accept-Encoding` entry names gzip (or `*`) with a non-zero
/// q-value.
fn accepts_gzip(headers: &Headers) -> bool {
    headers
        .get_all("accept-encoding")
        .flat_map(|value| value.split(','))
        .any(|item| {
            let mut parts = item.split(';');
            let coding = parts.next().unwrap_or_default().trim();
            let named = coding.eq_ignore_ascii_case("gzip")
                || coding.eq_ignore_ascii_case("x-gzip")
                || coding == "*";
            if !named {
                return false;
            }
            let q = parts
                .find_map(|param| param.trim().strip_prefix("q="))
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            q > 0.0
        })
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::Arc;

    use flate2::read::GzDecoder;

    use super::*;
    use crate::middleware::Pipeline;
    use crate::{Request, Router, StatusCode};

    fn headers(accept: &str) -> Headers {
        let mut h = Headers::new();
        h.insert("Accept-Encoding", accept);
        h
    }

    #[test]
    fn accept_encoding_negotiation() {
        assert!(accepts_gzip(&headers("gzip")));
        assert!(accepts_gzip(&headers("br, GZIP;q=0.5")));
        assert!(accepts_gzip(&headers("*")));
        assert!(!accepts_gzip(&headers("gzip;q=0")));
        assert!(!accepts_gzip(&headers("br, deflate")));
        assert!(!accepts_gzip(&Headers::new()));
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(CompressionMiddleware::new(42).level(), 9);
        assert_eq!(CompressionMiddleware::default().level(), 6);
    }

    fn pipeline() -> Pipeline {
        let mut router = Router::new();
        router.get("/", |_ctx| async {
            Response::json(StatusCode::Ok, &serde_json::json!({"message": "ok"}))
        });
        router.get("/empty", |_ctx| async { Response::new(StatusCode::NoContent) });
        Pipeline::new(router).with(Arc::new(CompressionMiddleware::default()))
    }

    fn request(path: &str, accept: Option<&str>) -> Request {
        let mut raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n");
        if let Some(accept) = accept {
            raw.push_str(&format!("Accept-Encoding: {accept}\r\n"));
        }
        raw.push_str("\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[tokio::test]
    async fn compresses_when_asked() {
        let response = pipeline().handle(request("/", Some("gzip, deflate"))).await;
        assert_eq!(response.headers().get("content-encoding"), Some("gzip"));
        assert_eq!(response.headers().get("vary"), Some("Accept-Encoding"));

        let mut decoded = String::new();
        GzDecoder::new(response.body_ref())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, r#"{"message":"ok"}"#);
    }

    #[tokio::test]
    async fn identity_without_accept_encoding() {
        let response = pipeline().handle(request("/", None)).await;
        assert!(!response.headers().contains("content-encoding"));
        assert_eq!(response.body_ref(), br#"{"message":"ok"}"#);
    }

    #[tokio::test]
    async fn empty_body_is_not_encoded() {
        let response = pipeline().handle(request("/empty", Some("gzip"))).await;
        assert!(!response.headers().contains("content-encoding"));
        assert!(response.body_ref().is_empty());
    }
}
