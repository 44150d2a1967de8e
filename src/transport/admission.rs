//! HTTP request checks applied before a body is decoded.
//!
//! ```text
//! GET, empty body, no query   ─▶ liveness probe, bare 200
//! PUT | DELETE | PATCH        ─▶ 405 method not allowed
//! body over the limit         ─▶ 413 content length too large (N>MAX)
//! OPTIONS                     ─▶ bare 200
//! ```

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{Method, Request, StatusCode};
use thiserror::Error;

/// Default request body limit, 5 MiB.
pub const MAX_REQUEST_CONTENT_LENGTH: usize = 5 * 1024 * 1024;

/// Why a request was refused before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("content length too large ({0}>{1})")]
    TooLarge(u64, usize),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Rejection::TooLarge(..) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// Declared or actual body length, whichever is larger.
pub fn content_length(request: &Request<Bytes>) -> u64 {
    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    declared.max(request.body().len() as u64)
}

/// Refuse write-style verbs and oversized bodies.
pub fn validate_request(request: &Request<Bytes>, max_body_bytes: usize) -> Result<(), Rejection> {
    let method = request.method();
    if method == Method::PUT || method == Method::DELETE || method == Method::PATCH {
        return Err(Rejection::MethodNotAllowed);
    }
    let length = content_length(request);
    if length > max_body_bytes as u64 {
        return Err(Rejection::TooLarge(length, max_body_bytes));
    }
    Ok(())
}

/// `GET` with no body and no query string.
pub fn is_liveness_probe(request: &Request<Bytes>) -> bool {
    request.method() == Method::GET
        && content_length(request) == 0
        && request.uri().query().map_or(true, str::is_empty)
}

/// `OPTIONS` requests are answered with a bare 200.
#[inline]
pub fn is_preflight(request: &Request<Bytes>) -> bool {
    request.method() == Method::OPTIONS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, uri: &str, body: &'static [u8]) -> Request<Bytes> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::from_static(body))
            .unwrap()
    }

    #[test]
    fn test_write_verbs_rejected() {
        for method in [Method::PUT, Method::DELETE, Method::PATCH] {
            let err = validate_request(&request(method, "/", b""), MAX_REQUEST_CONTENT_LENGTH).unwrap_err();
            assert_eq!(err, Rejection::MethodNotAllowed);
            assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
        }
        assert!(validate_request(&request(Method::POST, "/", b"{}"), MAX_REQUEST_CONTENT_LENGTH).is_ok());
        assert!(validate_request(&request(Method::OPTIONS, "/", b""), MAX_REQUEST_CONTENT_LENGTH).is_ok());
    }

    #[test]
    fn test_body_limit() {
        let err = validate_request(&request(Method::POST, "/", b"0123456789"), 4).unwrap_err();
        assert_eq!(err.to_string(), "content length too large (10>4)");
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let declared = Request::builder()
            .method(Method::POST)
            .header(CONTENT_LENGTH, "99")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(validate_request(&declared, 50).unwrap_err(), Rejection::TooLarge(99, 50));
    }

    #[test]
    fn test_liveness_probe() {
        assert!(is_liveness_probe(&request(Method::GET, "/", b"")));
        assert!(is_liveness_probe(&request(Method::GET, "/health?", b"")));
        assert!(!is_liveness_probe(&request(Method::GET, "/?q=1", b"")));
        assert!(!is_liveness_probe(&request(Method::GET, "/", b"{}")));
        assert!(!is_liveness_probe(&request(Method::POST, "/", b"")));
    }
}
