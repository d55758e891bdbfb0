//! HTTP/1.1 request parsing using the [`httparse`] crate.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("unsupported Transfer-Encoding: {value}")]
    UnsupportedTransferEncoding { value: String },

    #[error("malformed chunked body")]
    InvalidChunk,
}

/// How the end of a request body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// Exactly this many bytes follow the head (`Content-Length`, or 0).
    Length(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

/// A parsed HTTP/1.1 request.
///
/// # Examples
///
/// ```
/// use record_store::http::request::Request;
///
/// let raw = b"POST /record HTTP/1.1\r\nHost: localhost\r\nContent-Length: 13\r\n\r\n{\"data\":\"x\"}\n";
/// let (request, consumed) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "POST");
/// assert_eq!(request.path(), "/record");
/// assert_eq!(request.body().len(), 13);
/// assert_eq!(consumed, raw.len());
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    framing: BodyFraming,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses one complete request, body included, from the front of `buf`.
    ///
    /// Returns the request and the number of bytes it occupied; anything
    /// after that belongs to the next pipelined request. Chunked bodies are
    /// decoded.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the head or the body has not fully arrived.
    /// - [`RequestError::Parse`]: the head is malformed.
    /// - [`RequestError::InvalidContentLength`]: `Content-Length` is not a number.
    /// - [`RequestError::UnsupportedTransferEncoding`]: a coding other than `chunked`.
    /// - [`RequestError::InvalidChunk`]: the chunked framing is broken.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let (mut request, body_offset) = Self::parse_head(buf)?;
        let rest = &buf[body_offset..];

        let (body, used) = match request.framing {
            BodyFraming::Length(len) if rest.len() >= len => {
                (Bytes::copy_from_slice(&rest[..len]), len)
            }
            BodyFraming::Length(_) => return Err(RequestError::Incomplete),
            BodyFraming::Chunked => decode_chunked(rest)?.ok_or(RequestError::Incomplete)?,
        };

        request.body = body;
        Ok((request, body_offset + used))
    }

    /// Parses only the request head, leaving the body empty.
    ///
    /// Returns the request and the offset where its body starts. The server
    /// uses this to look at a request whose body is still in flight.
    pub fn parse_head(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        // The query string is not used by any route.
        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let path = raw_path
            .split_once('?')
            .map_or(raw_path, |(path, _)| path)
            .to_owned();

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let framing = body_framing(&header_map)?;

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                framing,
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should stay open after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 only when the client asks.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) if conn.eq_ignore_ascii_case("close") => false,
            Some(conn) if conn.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version == 1,
        }
    }

    /// Returns the declared `Content-Length`, if present and well-formed.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    pub fn framing(&self) -> BodyFraming {
        self.framing
    }

    /// `true` when an HTTP/1.1 client waits for `100 Continue` before
    /// sending its body.
    pub fn expects_continue(&self) -> bool {
        self.version == 1
            && self
                .headers
                .get("expect")
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("100-continue"))
    }
}

/// `Transfer-Encoding` wins over `Content-Length`. `identity` codings are
/// ignored; anything besides a lone `chunked` cannot be decoded.
fn body_framing(headers: &Headers) -> Result<BodyFraming, RequestError> {
    if let Some(te) = headers.get("transfer-encoding") {
        let codings: Vec<&str> = te
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("identity"))
            .collect();
        match codings.as_slice() {
            [] => {}
            [only] if only.eq_ignore_ascii_case("chunked") => return Ok(BodyFraming::Chunked),
            _ => {
                return Err(RequestError::UnsupportedTransferEncoding {
                    value: te.to_owned(),
                });
            }
        }
    }

    match headers.get("content-length") {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map(BodyFraming::Length)
            .map_err(|_| RequestError::InvalidContentLength {
                value: raw.to_owned(),
            }),
        None => Ok(BodyFraming::Length(0)),
    }
}

/// Decodes a chunked body from the front of `buf`.
///
/// Returns `None` until the terminating chunk and trailer section have
/// arrived, then the body and the number of bytes it occupied. Trailer
/// fields are discarded.
fn decode_chunked(buf: &[u8]) -> Result<Option<(Bytes, usize)>, RequestError> {
    let mut body = BytesMut::new();
    let mut pos = 0;

    loop {
        let (data_start, size) = match httparse::parse_chunk_size(&buf[pos..]) {
            Ok(httparse::Status::Complete((offset, size))) => (pos + offset, size),
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(_) => return Err(RequestError::InvalidChunk),
        };

        if size == 0 {
            let trailers = &buf[data_start..];
            if trailers.starts_with(b"\r\n") {
                return Ok(Some((body.freeze(), data_start + 2)));
            }
            return Ok(trailers
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .map(|end| (body.freeze(), data_start + end + 4)));
        }

        let data_end = usize::try_from(size)
            .ok()
            .and_then(|size| data_start.checked_add(size))
            .ok_or(RequestError::InvalidChunk)?;
        if buf.len() < data_end.saturating_add(2) {
            return Ok(None);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(RequestError::InvalidChunk);
        }

        body.extend_from_slice(&buf[data_start..data_end]);
        pos = data_end + 2;
    }
}
