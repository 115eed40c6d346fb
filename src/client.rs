//! Calling remote JSON-RPC methods.
//!
//! [`Caller`] is the one entry point every client implements: send a method name and params,
//! get the result back. [`OneShotClient`] implements it over transports where every call is an
//! independent request/reply exchange, such as HTTP. The duplex client lives in the connection
//! module. [`client_interface!`](crate::client_interface) turns a list of method signatures into
//! a typed wrapper over any `Caller`.
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::{error::*, id::generate_id, message::*, service::Endpoint};

/// Anything that can call remote methods.
///
/// Use the `#[async_trait]` attribute from the `async_trait` crate when implementing this trait.
#[async_trait]
pub trait Caller: Send + Sync {
    /// Calls a method and waits for its result.
    async fn call(&self, method: &str, params: Params) -> Result<Value>;

    /// Sends a notification. No result is ever returned.
    async fn notify(&self, method: &str, params: Params) -> Result<()>;
}

/// The outcome of a single exchange on a one-shot transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Exchange {
    /// The peer acknowledged the message without a body.
    NoContent,
    /// The peer answered with a body.
    Body(String),
}

/// A transport where each message gets its own request/reply exchange.
#[async_trait]
pub trait OneShotTransport: Send + Sync {
    async fn exchange(&self, body: String) -> Result<Exchange>;
}

/// Client for one-shot transports. No state is shared between calls.
#[derive(Debug, Clone)]
pub struct OneShotClient<T> {
    transport: T,
}

impl<T: OneShotTransport> OneShotClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a request with a fresh id and interprets the reply. A transport-level "no content"
    /// reply is a successful call with a `null` result.
    pub async fn send_request(&self, method: &str, params: Params) -> Result<Value> {
        let id = generate_id();
        let body = Request::new(id.as_str(), method, params).to_json()?;
        trace!("sending request: {}", body);
        match self.transport.exchange(body).await? {
            Exchange::NoContent => Ok(Value::Null),
            Exchange::Body(text) => {
                trace!("received reply: {}", text);
                let value: Value = serde_json::from_str(&text)?;
                let response = Response::from_value(&value)?;
                if response.id.as_str() != Some(id.as_str()) {
                    debug!("Reply id {} does not match request id {}", response.id, id);
                }
                response.into_result()
            }
        }
    }

    /// Sends a notification. Whatever comes back is ignored.
    pub async fn send_notification(&self, method: &str, params: Params) -> Result<()> {
        let body = Request::notification(method, params).to_json()?;
        trace!("sending notification: {}", body);
        self.transport.exchange(body).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: OneShotTransport> Caller for OneShotClient<T> {
    async fn call(&self, method: &str, params: Params) -> Result<Value> {
        self.send_request(method, params).await
    }

    async fn notify(&self, method: &str, params: Params) -> Result<()> {
        self.send_notification(method, params).await
    }
}

/// One-shot transport over HTTP: every message is POSTed to the same URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: reqwest::Url,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport for `url`. The URL is checked here, not on first use.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_client(url, reqwest::Client::new())
    }

    /// Creates a transport that sends through an existing HTTP client.
    pub fn with_client(url: &str, client: reqwest::Client) -> Result<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| RpcError::Config(format!("invalid URL '{}': {}", url, e)))?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

#[async_trait]
impl OneShotTransport for HttpTransport {
    async fn exchange(&self, body: String) -> Result<Exchange> {
        let response = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        if response.status().as_u16() == NO_CONTENT_STATUS {
            return Ok(Exchange::NoContent);
        }
        Ok(Exchange::Body(response.text().await?))
    }
}

/// One-shot transport that hands every message straight to an in-process endpoint.
#[derive(Debug, Clone)]
pub struct LocalTransport<S> {
    endpoint: Endpoint<S>,
}

impl<S> LocalTransport<S> {
    pub fn new(endpoint: Endpoint<S>) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl<S> OneShotTransport for LocalTransport<S>
where
    S: Send + Sync + 'static,
{
    async fn exchange(&self, body: String) -> Result<Exchange> {
        match self.endpoint.handle_request(&body).await {
            Some(reply) => Ok(Exchange::Body(reply.to_json()?)),
            None => Ok(Exchange::NoContent),
        }
    }
}

/// Serializes one call argument. Used by [`client_interface!`](crate::client_interface).
pub fn encode_arg<T: Serialize + ?Sized>(arg: &T) -> Result<Value> {
    Ok(serde_json::to_value(arg)?)
}

/// Deserializes a call result. Used by [`client_interface!`](crate::client_interface).
pub fn decode_result<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Generates a typed client over any [`Caller`].
///
/// Each declared method becomes an async method that sends its arguments positionally and
/// deserializes the result. The wire name defaults to the Rust name; `as "name"` overrides it.
///
/// ```ignore
/// jrpc::client_interface! {
///     pub struct MyServiceClient {
///         fn hello(name: String) -> String;
///         fn slow_add(a: i64, b: i64) -> i64 as "slowAdd";
///     }
/// }
///
/// let client = MyServiceClient::new(OneShotClient::new(HttpTransport::new(url)?));
/// let greeting = client.hello("RPC".into()).await?;
/// ```
#[macro_export]
macro_rules! client_interface {
    (@wire $method:ident $wire:literal) => {
        $wire
    };
    (@wire $method:ident) => {
        stringify!($method)
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident($($arg:ident: $arg_ty:ty),* $(,)?) -> $ret:ty $(as $wire:literal)?;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis struct $name<C> {
            caller: C,
        }

        impl<C: $crate::Caller> $name<C> {
            pub fn new(caller: C) -> Self {
                Self { caller }
            }

            pub fn caller(&self) -> &C {
                &self.caller
            }

            pub fn into_inner(self) -> C {
                self.caller
            }

            $(
                $(#[$method_meta])*
                pub async fn $method(&self, $($arg: $arg_ty),*) -> $crate::Result<$ret> {
                    let params = $crate::Params::Positional(vec![$($crate::encode_arg(&$arg)?),*]);
                    let method = $crate::client_interface!(@wire $method $($wire)?);
                    let value = $crate::Caller::call(&self.caller, method, params).await?;
                    $crate::decode_result(value)
                }
            )*
        }
    };
}
