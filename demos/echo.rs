//! Echo server and client in one process.

use jrpc::{DuplexClient, Params, Result, Server, ServiceBuilder, Value};

struct Echo;

#[tokio::main]
async fn main() -> Result<()> {
    let endpoint = ServiceBuilder::new(Echo)
        .method("echo", |_, params: Vec<Value>| async move {
            Ok(Value::from(format!("echo -> {}", Value::Array(params))))
        })
        .build()?;

    let server = Server::new().serve(endpoint).tcp("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    tokio::spawn(server.run());

    let client = DuplexClient::connect_tcp(addr.to_string());
    let result = client
        .send_request("echo", Params::from(vec![Value::from("Hello there!")]))
        .await?;
    println!("{}", result);
    Ok(())
}
