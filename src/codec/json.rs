//! JSON codec using `serde_json`.
//!
//! Besides plain encode/decode this module owns the positional argument
//! rules: `params` may be absent, `null` or an array no longer than the
//! method's arity. Anything else is a `BadParams` fault.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::Fault;

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Convert a serializable value to a JSON tree.
    #[inline]
    pub fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
        Ok(serde_json::to_value(value)?)
    }

    /// Split `params` into positional arguments, checked against `arity`.
    ///
    /// Missing trailing arguments are not filled in here; the bound method
    /// supplies their zero value.
    pub fn positional(params: Option<Value>, arity: usize) -> std::result::Result<Vec<Value>, Fault> {
        match params {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(args)) => {
                if args.len() > arity {
                    return Err(Fault::bad_params(format!(
                        "too many arguments, want at most {}",
                        arity
                    )));
                }
                Ok(args)
            }
            Some(_) => Err(Fault::bad_params("non-array args")),
        }
    }

    /// Decode argument `index`, or produce its zero value when absent.
    pub fn argument<T: DeserializeOwned + Default>(
        args: &[Value],
        index: usize,
    ) -> std::result::Result<T, Fault> {
        match args.get(index) {
            None => Ok(T::default()),
            Some(raw) => T::deserialize(raw)
                .map_err(|e| Fault::bad_params(format!("invalid argument {}: {}", index, e))),
        }
    }
}
