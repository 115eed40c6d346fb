//! Simple Unix socket server example.

use std::{error::Error, fs, path::Path, result, time::Duration};

use jrpc::{ApplicationError, Server, ServiceBuilder};
use serde::Deserialize;

#[derive(Deserialize)]
struct Subtract {
    minuend: f64,
    subtrahend: f64,
}

struct MyService;

impl MyService {
    fn hello(&self, name: &str) -> String {
        format!("Hello {}", name)
    }
}

#[tokio::main]
async fn main() -> result::Result<(), Box<dyn Error>> {
    let socket_path = "/tmp/jrpc_example_socket";
    // Remove the socket file if it already exists
    if Path::new(socket_path).exists() {
        fs::remove_file(socket_path)?;
    }

    let endpoint = ServiceBuilder::new(MyService)
        .typed_method("hello", |svc, (name,): (String,)| async move {
            println!("Received hello request for {}", name);
            Ok(svc.hello(&name))
        })
        .method("throws", |_, _| async {
            Err(ApplicationError::new(1, "This is an error")
                .with_data("something went wrong")
                .into())
        })
        .typed_method("slowAdd", |_, (a, b): (f64, f64)| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(a + b)
        })
        .typed_method("subtract", |_, (args,): (Subtract,)| async move {
            Ok(args.minuend - args.subtrahend)
        })
        .validate_as::<(Subtract,)>("subtract")
        .build()?;

    let server = Server::new().serve(endpoint).unix(socket_path).await?;
    println!("Server listening on {}", socket_path);
    server.run().await?;
    Ok(())
}
