//! Transport module - HTTP request admission.
//!
//! The engine consumes `http::Request<Bytes>` and produces
//! `http::Response<Bytes>`; whichever server owns the socket converts to
//! and from those types. This module holds the checks run before a body
//! is decoded.

mod admission;

pub use admission::{
    content_length, is_liveness_probe, is_preflight, validate_request, Rejection,
    MAX_REQUEST_CONTENT_LENGTH,
};
