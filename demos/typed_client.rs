//! Typed client over HTTP.
//!
//! Needs an HTTP JSON-RPC endpoint at the URL given as the first argument: one that hands each
//! POSTed body to `Endpoint::handle_request` for a service with `hello`, `slowAdd` and
//! `subtract` methods. The `simple_server` demo speaks newline-delimited JSON over a Unix
//! socket, not HTTP, so it cannot serve this client.

use std::{env, error::Error};

use jrpc::{HttpTransport, OneShotClient};
use serde::Serialize;

#[derive(Serialize)]
struct Subtract {
    minuend: f64,
    subtrahend: f64,
}

jrpc::client_interface! {
    struct MyServiceClient {
        fn hello(name: String) -> String;
        fn slow_add(a: f64, b: f64) -> f64 as "slowAdd";
        fn subtract(args: Subtract) -> f64;
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn Error>> {
    let url = env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:3000".to_string());
    let client = MyServiceClient::new(OneShotClient::new(HttpTransport::new(&url)?));

    println!("{}", client.hello("RPC".into()).await?);
    println!("1 + 2 = {}", client.slow_add(1.0, 2.0).await?);
    let difference = client
        .subtract(Subtract {
            minuend: 42.0,
            subtrahend: 23.0,
        })
        .await?;
    println!("42 - 23 = {}", difference);
    Ok(())
}
