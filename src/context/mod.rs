//! Per-request context handed to middleware and route handlers.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::Request;

/// Path parameters captured by the matched route pattern (`:id` → `"42"`).
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }
}

/// A request plus whatever routing learned about it.
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    /// Wraps a request that has not been routed yet.
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Named path parameter, if the route captured one.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Decodes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }

    /// Gives the request back, dropping any captured parameters.
    pub fn into_request(self) -> Request {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Payload {
        data: String,
    }

    fn request(raw: &[u8]) -> Request {
        Request::parse(raw).unwrap().0
    }

    #[test]
    fn decodes_json_body() {
        let ctx = Context::new(request(
            b"POST /record HTTP/1.1\r\nContent-Length: 12\r\n\r\n{\"data\":\"a\"}",
        ));
        let payload: Payload = ctx.json().unwrap();
        assert_eq!(payload.data, "a");
    }

    #[test]
    fn empty_body_is_a_decode_error() {
        let ctx = Context::new(request(b"POST /record HTTP/1.1\r\n\r\n"));
        assert!(ctx.json::<Payload>().unwrap_err().is_eof());
    }

    #[test]
    fn params_are_looked_up_by_name() {
        let mut params = PathParams::new();
        params.insert("id".to_owned(), "9".to_owned());
        let ctx = Context::with_params(request(b"GET /record/9 HTTP/1.1\r\n\r\n"), params);
        assert_eq!(ctx.param("id"), Some("9"));
        assert_eq!(ctx.param("missing"), None);
        assert_eq!(ctx.into_request().path(), "/record/9");
    }
}
