//! Codec module - body serialization and obfuscation.
//!
//! - [`JsonCodec`] - JSON via `serde_json`, plus positional argument rules
//! - [`PayloadCipher`] - optional AES-CBC wrapping of request/response bodies
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! the envelope format being fixed.
//!
//! # Example
//!
//! ```
//! use jrpc_engine::codec::{CipherEncoding, JsonCodec, PayloadCipher};
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let cipher = PayloadCipher::new("0123456789abcdef", CipherEncoding::Hex).unwrap();
//! let sealed = cipher.seal(&encoded).unwrap();
//! assert_eq!(cipher.open(&sealed).unwrap(), encoded);
//! ```

mod cipher;
mod json;

pub use cipher::{CipherEncoding, PayloadCipher, IV_SIZE, MIN_KEY_LEN};
pub use json::JsonCodec;
