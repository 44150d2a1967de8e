//! Protocol module - envelope shape and fault model.
//!
//! - [`Envelope`] is the JSON-RPC message exchanged over HTTP
//! - [`Fault`] is the wire error record and the in-engine error value

mod envelope;
mod fault;

pub use envelope::{Envelope, PLACEHOLDER_ID};
pub use fault::{Fault, FaultCode, ForbiddenError, TokenError};

/// Protocol version tag written on every response.
pub const VERSION: &str = "2.0";

/// Separator between namespace and method name.
pub const METHOD_SEPARATOR: char = '.';
