use jrpc::{DuplexClient, Params, Value};
use std::error::Error;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn Error>> {
    let client = DuplexClient::connect_unix("/tmp/jrpc_example_socket");
    let result = client
        .send_request("hello", Params::from(vec![Value::from("RPC")]))
        .await?;
    println!("Received response: {}", result);

    if let Err(e) = client.send_request("throws", Params::None).await {
        println!("Received error: {}", e);
    }
    Ok(())
}
