//! Calculator service - request/response walkthrough.
//!
//! This example demonstrates:
//! - Binding typed methods on a service
//! - A receiver-scope hook and a named middleware
//! - Driving the server with `http` request values
//!
//! Any HTTP server can host the engine by converting its requests into
//! `http::Request<Bytes>` and calling `Server::handle` on a blocking thread.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use jrpc_engine::handler::{CallOutcome, MethodTable, Middleware, RequestContext, Service, TIME_USED_KEY};
use jrpc_engine::protocol::Fault;
use jrpc_engine::Server;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Default)]
struct Operands {
    a: f64,
    b: f64,
}

#[derive(Default)]
struct Calculator {
    calls: AtomicU64,
}

impl Service for Calculator {
    fn after_call(
        &self,
        ctx: &mut RequestContext,
        method: &str,
        _args: &[Value],
        outcome: &CallOutcome,
    ) -> Result<(), Fault> {
        let used = ctx.store().get_i64(TIME_USED_KEY).unwrap_or_default();
        println!("  {} took {}ns (failed: {})", method, used, outcome.is_failure());
        Ok(())
    }

    fn methods(table: &mut MethodTable<Self>) {
        table
            .method("add", |calc: &Calculator, ops: Operands| {
                calc.calls.fetch_add(1, Ordering::Relaxed);
                Ok::<_, Fault>(ops.a + ops.b)
            })
            .method("divide", |calc: &Calculator, ops: Operands| {
                calc.calls.fetch_add(1, Ordering::Relaxed);
                if ops.b == 0.0 {
                    return Err(Fault::server("division by zero"));
                }
                Ok(ops.a / ops.b)
            })
            .method("calls", |calc: &Calculator, ()| {
                Ok::<_, Fault>(calc.calls.load(Ordering::Relaxed))
            });
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::builder()
        .service(Calculator::default())
        .middleware(Middleware::new("log", |ctx: &mut RequestContext| {
            println!("-> {}", ctx.method());
            ctx.next()
        }))
        .build()?;

    let bodies = [
        r#"{"id":1,"jsonrpc":"2.0","method":"calculator.add","params":[{"a":2,"b":3}]}"#,
        r#"{"id":2,"jsonrpc":"2.0","method":"Calculator.Divide","params":[{"a":1,"b":0}]}"#,
        r#"{"id":3,"jsonrpc":"2.0","method":"calculator.calls"}"#,
        r#"{"id":4,"jsonrpc":"2.0","method":"calculator.sqrt","params":[]}"#,
    ];

    for body in bodies {
        let request = http::Request::post("/rpc").body(Bytes::from_static(body.as_bytes()))?;
        let response = server.handle(request);
        println!("<- {} {}", response.status(), String::from_utf8_lossy(response.body()));
    }

    server.stop();
    Ok(())
}
