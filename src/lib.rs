//! JSON-RPC 2.0 implementation in Rust.
//!
//! Exposes the methods of an ordinary Rust value over JSON-RPC, and calls remote methods from
//! typed clients. Implements single requests, notifications and batches, with the standard error
//! codes for malformed input.
//!
//! To implement a server:
//! 1. Register the callable methods with a `ServiceBuilder` and `build()` an `Endpoint`
//! 2. Hand raw messages to `Endpoint::handle_request` from any transport, or
//! 3. Create a `Server`, `serve(endpoint)`, and call `tcp(addr)` or `unix(path)`, then `run()`
//!
//! To implement a client:
//! 1. Use `OneShotClient` with an `HttpTransport` (or a `LocalTransport` for in-process calls)
//! 2. Or connect a `DuplexClient` to a persistent stream with `DuplexClient::connect_tcp(addr)`
//! 3. Optionally wrap either in a typed interface generated by `client_interface!`
//!
//! Uses `tokio` for async I/O and `serde_json` for serialization.

mod client;
mod codec;
mod connection;
mod engine;
mod error;
mod id;
mod message;
mod service;
mod transport;

pub use client::*;
pub use codec::*;
pub use connection::*;
pub use engine::{handle_batch, handle_request, handle_single};
pub use error::*;
pub use id::*;
pub use message::*;
pub use service::*;
pub use transport::*;

pub use serde_json::Value;
