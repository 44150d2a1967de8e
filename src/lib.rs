//! # jrpc-engine
//!
//! Synchronous JSON-RPC 2.0 dispatch engine over `http` request and
//! response values.
//!
//! Services bind typed methods under a namespace; calls name them as
//! `namespace.method`. Each call runs on the caller's thread from body
//! decoding to response encoding, so any HTTP server that can hand over an
//! `http::Request<Bytes>` can host the engine.
//!
//! ## Architecture
//!
//! - **Protocol**: [`protocol::Envelope`] wire type and [`protocol::Fault`] codes
//! - **Handler**: services, registry, middleware pipeline, pooled contexts
//! - **Transport**: HTTP method and size admission
//! - **Server**: [`Server`] facade tying the pieces together
//!
//! ## Example
//!
//! ```
//! use bytes::Bytes;
//! use jrpc_engine::handler::{MethodTable, Service};
//! use jrpc_engine::protocol::Fault;
//! use jrpc_engine::Server;
//!
//! struct Greeter;
//!
//! impl Service for Greeter {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.method("hello", |_, name: String| Ok::<_, Fault>(format!("hello {}", name)));
//!     }
//! }
//!
//! let server = Server::builder().service(Greeter).build().unwrap();
//! let response = server.handle(
//!     http::Request::post("/")
//!         .body(Bytes::from_static(br#"{"id":"a","method":"greeter.hello","params":["bob"]}"#))
//!         .unwrap(),
//! );
//! assert_eq!(
//!     response.body().as_ref(),
//!     br#"{"id":"a","jsonrpc":"2.0","result":"hello bob"}"#
//! );
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod server;

pub use error::EngineError;
pub use handler::{MethodTable, RequestContext, Service};
pub use protocol::{Envelope, Fault, FaultCode};
pub use server::{Server, ServerBuilder, ServerOptions, REQUEST_ID_HEADER};
