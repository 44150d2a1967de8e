//! Fault model: wire error codes and the error value that carries them.
//!
//! A [`Fault`] is both the `error` record of a response envelope and an
//! ordinary Rust error. Anything else a handler fails with is folded into a
//! fault by [`Fault::from_error`]:
//!
//! | Source | Code |
//! |---|---|
//! | `Fault` (anywhere in the source chain) | its own code |
//! | [`TokenError`] | `Authorization` (401) |
//! | [`ForbiddenError`] | `Forbidden` (403) |
//! | anything else | `Server` (-32000) |
//!
//! The message of the outermost error is kept as text.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Fixed enumeration of fault codes. The numeric values are part of the
/// wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum FaultCode {
    /// Body is not well-formed JSON.
    Parse,
    /// Envelope is structurally invalid (bad or missing id).
    InvalidRequest,
    /// Unknown namespace or method.
    NoMethod,
    /// Argument count or shape mismatch.
    BadParams,
    /// Panic or unexpected failure inside the engine.
    Internal,
    /// Generic application-level failure.
    Server,
    /// Caller is not authenticated.
    Authorization,
    /// Caller is not allowed to perform the call.
    Forbidden,
}

impl FaultCode {
    /// Wire value of this code.
    pub const fn as_i32(self) -> i32 {
        match self {
            FaultCode::Parse => -32700,
            FaultCode::InvalidRequest => -32600,
            FaultCode::NoMethod => -32601,
            FaultCode::BadParams => -32602,
            FaultCode::Internal => -32603,
            FaultCode::Server => -32000,
            FaultCode::Authorization => 401,
            FaultCode::Forbidden => 403,
        }
    }
}

impl From<FaultCode> for i32 {
    fn from(code: FaultCode) -> Self {
        code.as_i32()
    }
}

impl TryFrom<i32> for FaultCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -32700 => Ok(FaultCode::Parse),
            -32600 => Ok(FaultCode::InvalidRequest),
            -32601 => Ok(FaultCode::NoMethod),
            -32602 => Ok(FaultCode::BadParams),
            -32603 => Ok(FaultCode::Internal),
            -32000 => Ok(FaultCode::Server),
            401 => Ok(FaultCode::Authorization),
            403 => Ok(FaultCode::Forbidden),
            other => Err(format!("unknown fault code {}", other)),
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Structured error with a fixed wire code, message, and optional data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct Fault {
    /// Wire code.
    pub code: FaultCode,
    /// Human readable message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Optional auxiliary payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Fault {
    /// Create a fault with the given code and message.
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach auxiliary data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Parse, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FaultCode::InvalidRequest, message)
    }

    pub fn no_method(message: impl Into<String>) -> Self {
        Self::new(FaultCode::NoMethod, message)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new(FaultCode::BadParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Internal, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Server, message)
    }

    /// Fold an arbitrary error into a fault.
    ///
    /// Walks the source chain looking for a [`Fault`], [`TokenError`] or
    /// [`ForbiddenError`]; the outermost error's text becomes the message.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let message = err.to_string();
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(fault) = e.downcast_ref::<Fault>() {
                return Fault {
                    code: fault.code,
                    message,
                    data: fault.data.clone(),
                };
            }
            if e.is::<TokenError>() {
                return Fault::new(FaultCode::Authorization, message);
            }
            if e.is::<ForbiddenError>() {
                return Fault::new(FaultCode::Forbidden, message);
            }
            current = e.source();
        }
        Fault::server(message)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Fault {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Fault::from_error(err.as_ref())
    }
}

impl From<std::io::Error> for Fault {
    fn from(err: std::io::Error) -> Self {
        Fault::from_error(&err)
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Fault::internal(err.to_string())
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Fault::server(message)
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Fault::server(message)
    }
}

/// Authentication failure raised by hooks or handlers; maps to 401.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TokenError(pub String);

/// Authorization failure raised by hooks or handlers; maps to 403.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ForbiddenError(pub String);

impl From<TokenError> for Fault {
    fn from(err: TokenError) -> Self {
        Fault::new(FaultCode::Authorization, err.0)
    }
}

impl From<ForbiddenError> for Fault {
    fn from(err: ForbiddenError) -> Self {
        Fault::new(FaultCode::Forbidden, err.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Error)]
    #[error("lookup failed: {inner}")]
    struct Wrapped {
        #[source]
        inner: Fault,
    }

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct Opaque;

    #[test]
    fn test_wire_values() {
        assert_eq!(FaultCode::Parse.as_i32(), -32700);
        assert_eq!(FaultCode::InvalidRequest.as_i32(), -32600);
        assert_eq!(FaultCode::NoMethod.as_i32(), -32601);
        assert_eq!(FaultCode::BadParams.as_i32(), -32602);
        assert_eq!(FaultCode::Internal.as_i32(), -32603);
        assert_eq!(FaultCode::Server.as_i32(), -32000);
        assert_eq!(FaultCode::Authorization.as_i32(), 401);
        assert_eq!(FaultCode::Forbidden.as_i32(), 403);
    }

    #[test]
    fn test_fault_serializes_to_wire_record() {
        let fault = Fault::bad_params("too many arguments").with_data(json!({"want": 1}));
        let encoded = serde_json::to_value(&fault).unwrap();
        assert_eq!(
            encoded,
            json!({"code": -32602, "message": "too many arguments", "data": {"want": 1}})
        );

        let bare = serde_json::to_value(Fault::new(FaultCode::Forbidden, "")).unwrap();
        assert_eq!(bare, json!({"code": 403}));
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        let result: std::result::Result<Fault, _> =
            serde_json::from_value(json!({"code": 12, "message": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_error_finds_fault_in_chain() {
        let err = Wrapped {
            inner: Fault::no_method("no method"),
        };
        let fault = Fault::from_error(&err);
        assert_eq!(fault.code, FaultCode::NoMethod);
        assert_eq!(fault.message, "lookup failed: no method");
    }

    #[test]
    fn test_from_error_maps_access_errors() {
        let fault = Fault::from_error(&TokenError("token expired".into()));
        assert_eq!(fault.code, FaultCode::Authorization);
        assert_eq!(fault.message, "token expired");

        let fault: Fault = ForbiddenError("admins only".into()).into();
        assert_eq!(fault.code, FaultCode::Forbidden);
    }

    #[test]
    fn test_from_error_folds_unknown_into_server() {
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(Opaque);
        let fault = Fault::from(boxed);
        assert_eq!(fault.code, FaultCode::Server);
        assert_eq!(fault.message, "disk on fire");
    }
}
