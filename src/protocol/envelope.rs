//! JSON-RPC envelope: the single shape shared by requests and responses.
//!
//! ```text
//! {"id": 7, "jsonrpc": "2.0", "method": "calc.add", "params": [ ... ]}
//! {"id": 7, "jsonrpc": "2.0", "result": ...}
//! {"id": 7, "jsonrpc": "2.0", "error": {"code": -32601, "message": "no method"}}
//! ```
//!
//! Every field except `id` is omitted when empty. Request ids must be
//! scalars; responses always carry an id (see [`Envelope::normalize`]).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::fault::Fault;
use super::{METHOD_SEPARATOR, VERSION};

/// Id written on a response whose request carried none.
pub const PLACEHOLDER_ID: u64 = 1;

/// A request, notification, successful response or error response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opaque call token. `Some(Value::Null)` is an explicit `null` id.
    #[serde(default, deserialize_with = "deserialize_present")]
    pub id: Option<Value>,
    /// Protocol tag.
    #[serde(rename = "jsonrpc", default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// `namespace.method`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Positional arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Return value, success only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Fault record, failure only.
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_fault",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<Fault>,
}

/// Keeps an explicit `null` distinguishable from a missing field.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A fault record with an unknown code is dropped instead of failing the decode.
fn deserialize_lenient_fault<'de, D>(deserializer: D) -> Result<Option<Fault>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| Fault::deserialize(value).ok()))
}

impl Envelope {
    /// Decode a request body.
    ///
    /// Fails with `Parse` on malformed JSON, `InvalidRequest` on a missing or
    /// structured id and `NoMethod` when the method is not `namespace.method`.
    pub fn decode(bytes: &[u8]) -> Result<Self, Fault> {
        let envelope = Self::parse(bytes)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// JSON decoding only, no id or method checks.
    pub fn parse(bytes: &[u8]) -> Result<Self, Fault> {
        serde_json::from_slice(bytes).map_err(|e| Fault::parse(format!("parse error: {}", e)))
    }

    /// Request checks: scalar id, then `namespace.method` shape.
    pub fn validate(&self) -> Result<(), Fault> {
        if !self.has_valid_id() {
            return Err(Fault::invalid_request("id is invalid"));
        }
        self.split_method().map(|_| ())
    }

    /// Serialize as-is.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Normalize and serialize as a response.
    pub fn encode_response(&mut self) -> serde_json::Result<Vec<u8>> {
        self.normalize().encode()
    }

    /// True when the id is present and is not an object or array.
    pub fn has_valid_id(&self) -> bool {
        matches!(&self.id, Some(id) if !id.is_object() && !id.is_array())
    }

    /// Split `method` on the first separator into `(namespace, method)`.
    pub fn split_method(&self) -> Result<(&str, &str), Fault> {
        match self.method.split_once(METHOD_SEPARATOR) {
            Some((namespace, method)) if !namespace.is_empty() && !method.is_empty() => {
                Ok((namespace, method))
            }
            _ => Err(Fault::no_method("wrong method")),
        }
    }

    /// Record a failure. Clears any result.
    pub fn set_fault(&mut self, fault: Fault) -> &mut Self {
        self.result = None;
        self.error = Some(fault);
        self
    }

    /// Record a successful return value. Clears any fault.
    pub fn set_result(&mut self, value: Value) -> &mut Self {
        self.error = None;
        self.result = Some(value);
        self
    }

    /// Turn this envelope into a response in place.
    ///
    /// Defaults a missing id to [`PLACEHOLDER_ID`], stamps the version,
    /// drops the call shape and guarantees exactly one of `result`/`error`.
    pub fn normalize(&mut self) -> &mut Self {
        if self.id.is_none() {
            self.id = Some(Value::from(PLACEHOLDER_ID));
        }
        self.version.clear();
        self.version.push_str(VERSION);
        self.method.clear();
        self.params = None;
        if self.error.is_some() {
            self.result = None;
        } else if self.result.is_none() {
            self.result = Some(Value::Null);
        }
        self
    }

    /// Reset every field, keeping string capacity.
    pub fn clear(&mut self) {
        self.id = None;
        self.version.clear();
        self.method.clear();
        self.params = None;
        self.result = None;
        self.error = None;
    }

    /// Standalone success response.
    pub fn result_of(value: Value) -> Self {
        let mut envelope = Envelope::default();
        envelope.set_result(value).normalize();
        envelope
    }

    /// Standalone error response.
    pub fn fault_of(fault: impl Into<Fault>) -> Self {
        let mut envelope = Envelope::default();
        envelope.set_fault(fault.into()).normalize();
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FaultCode;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_unknown_error_code_does_not_fail_request() {
        let env = Envelope::decode(
            br#"{"id":1,"method":"calc.add","result":{"x":1},"error":{"code":12345,"message":"x"}}"#,
        )
        .unwrap();
        assert_eq!(env.method, "calc.add");
        assert!(env.error.is_none());
        assert_eq!(env.result, Some(json!({"x": 1})));

        let known = Envelope::parse(br#"{"id":1,"error":{"code":-32601,"message":"gone"}}"#).unwrap();
        assert_eq!(known.error.unwrap().code, FaultCode::NoMethod);
    }

    #[test]
    fn test_decode_request() {
        let env = Envelope::decode(br#"{"id":"a1","jsonrpc":"2.0","method":"calc.add","params":[1,2]}"#)
            .unwrap();
        assert_eq!(env.id, Some(json!("a1")));
        assert_eq!(env.method, "calc.add");
        assert_eq!(env.params, Some(json!([1, 2])));
        assert_eq!(env.split_method().unwrap(), ("calc", "add"));
    }

    #[test]
    fn test_decode_malformed_body_is_parse_fault() {
        let err = Envelope::decode(b"{not json").unwrap_err();
        assert_eq!(err.code, FaultCode::Parse);
    }

    #[test]
    fn test_decode_structured_id_is_invalid_request() {
        for body in [
            &br#"{"id":{},"method":"a.b"}"#[..],
            &br#"{"id":[1],"method":"a.b"}"#[..],
            &br#"{"method":"a.b"}"#[..],
        ] {
            let err = Envelope::decode(body).unwrap_err();
            assert_eq!(err.code, FaultCode::InvalidRequest);
        }
    }

    #[test]
    fn test_decode_null_id_is_accepted() {
        let env = Envelope::decode(br#"{"id":null,"method":"a.b"}"#).unwrap();
        assert_eq!(env.id, Some(Value::Null));
    }

    #[test]
    fn test_method_must_have_two_segments() {
        for method in ["noseparator", ".b", "a.", ""] {
            let body = json!({"id": 1, "method": method}).to_string();
            let err = Envelope::decode(body.as_bytes()).unwrap_err();
            assert_eq!(err.code, FaultCode::NoMethod, "method {:?}", method);
        }

        // Only the first separator splits.
        let env = Envelope::decode(br#"{"id":1,"method":"a.b.c"}"#).unwrap();
        assert_eq!(env.split_method().unwrap(), ("a", "b.c"));
    }

    #[test]
    fn test_normalize_drops_call_shape() {
        let mut env = Envelope::decode(br#"{"method":"a.b","id":5,"params":[1]}"#).unwrap();
        env.set_result(json!("ok"));
        let bytes = env.encode_response().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"id": 5, "jsonrpc": "2.0", "result": "ok"}));
    }

    #[test]
    fn test_normalize_defaults_missing_id() {
        let env = Envelope::fault_of(Fault::server("boom"));
        assert_eq!(env.id, Some(json!(PLACEHOLDER_ID)));
        assert!(env.result.is_none());
        assert_eq!(env.error.as_ref().unwrap().code, FaultCode::Server);
    }

    #[test]
    fn test_normalize_never_leaves_both_empty() {
        let mut env = Envelope::default();
        env.normalize();
        assert_eq!(env.result, Some(Value::Null));
        let text = String::from_utf8(env.encode().unwrap()).unwrap();
        assert_eq!(text, r#"{"id":1,"jsonrpc":"2.0","result":null}"#);
    }

    #[test]
    fn test_result_roundtrip() {
        let mut response = Envelope {
            id: Some(json!("1")),
            ..Default::default()
        };
        response.set_result(json!({"x": 1}));
        let bytes = response.encode_response().unwrap();
        let decoded: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert!(decoded.error.is_none());
        assert_eq!(decoded.result, Some(json!({"x": 1})));
        assert_eq!(decoded.id, Some(json!("1")));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut env = Envelope::decode(br#"{"id":9,"jsonrpc":"2.0","method":"a.b","params":[]}"#).unwrap();
        env.set_fault(Fault::internal("x"));
        env.clear();
        assert_eq!(env, Envelope::default());
    }

    proptest! {
        #[test]
        fn scalar_ids_are_valid(n in any::<i64>(), s in ".*", b in any::<bool>()) {
            for id in [json!(n), json!(s.clone()), json!(b)] {
                let body = json!({"id": id, "method": "a.b"}).to_string();
                prop_assert!(Envelope::decode(body.as_bytes()).is_ok());
            }
        }

        #[test]
        fn structured_ids_are_invalid(values in proptest::collection::vec(any::<i32>(), 0..4)) {
            let body = json!({"id": values, "method": "a.b"}).to_string();
            let err = Envelope::decode(body.as_bytes()).unwrap_err();
            prop_assert_eq!(err.code, FaultCode::InvalidRequest);
        }
    }
}
