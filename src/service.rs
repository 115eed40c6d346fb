//! Service registration.
//!
//! A service is any value whose methods should be reachable over JSON-RPC. It becomes servable
//! only through a [`ServiceBuilder`], which records which methods may be called, how to call
//! them, and which validators guard their parameters. The result is an [`Endpoint`]: the
//! service instance paired with an immutable [`ServiceDescriptor`].
use std::{collections::HashMap, future::Future, sync::Arc};

use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{engine, error::*, message::*};

/// The one method name that can never be exposed.
pub const RESERVED_METHOD: &str = "constructor";

/// A registered method: takes the service and the positional arguments of the call.
type Handler<S> =
    Arc<dyn Fn(Arc<S>, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A single parameter check.
type Check = Arc<dyn Fn(&Params) -> bool + Send + Sync>;

/// Parameter validation for one method. All attached checks must accept the params.
#[derive(Clone, Default)]
pub struct Validator {
    checks: Vec<Check>,
}

impl Validator {
    pub fn accepts(&self, params: &Params) -> bool {
        self.checks.iter().all(|check| check(params))
    }

    /// Number of checks combined in this validator.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("checks", &self.checks.len())
            .finish()
    }
}

/// Which methods of a service are callable, and how their parameters are validated.
pub struct ServiceDescriptor<S> {
    methods: HashMap<String, Handler<S>>,
    validators: HashMap<String, Validator>,
}

impl<S> ServiceDescriptor<S> {
    /// Returns true if `name` refers to a registered, callable method.
    pub fn is_method_callable(&self, name: &str) -> bool {
        !name.is_empty() && name != RESERVED_METHOD && self.methods.contains_key(name)
    }

    /// Returns the validator for a method, if any checks were attached to it.
    pub fn validator_for(&self, name: &str) -> Option<&Validator> {
        self.validators.get(name)
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn handler(&self, name: &str) -> Option<&Handler<S>> {
        if self.is_method_callable(name) {
            self.methods.get(name)
        } else {
            None
        }
    }
}

impl<S> std::fmt::Debug for ServiceDescriptor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("methods", &self.method_names())
            .field("validators", &self.validators)
            .finish()
    }
}

/// Decodes positional arguments into a typed value. An empty argument list also decodes into
/// unit-like types such as `()`.
fn decode_args<A: DeserializeOwned>(args: Vec<Value>) -> Result<A> {
    let empty = args.is_empty();
    match serde_json::from_value(Value::Array(args)) {
        Ok(decoded) => Ok(decoded),
        Err(e) if empty => {
            serde_json::from_value(Value::Null).map_err(|_| RpcError::InvalidParams(e.to_string()))
        }
        Err(e) => Err(RpcError::InvalidParams(e.to_string())),
    }
}

/// Builds an [`Endpoint`] by explicitly registering the callable methods of a service.
///
/// ```ignore
/// let endpoint = ServiceBuilder::new(MyService)
///     .typed_method("hello", |svc, (name,): (String,)| async move { Ok(svc.hello(&name)) })
///     .build()?;
/// ```
pub struct ServiceBuilder<S> {
    service: S,
    methods: HashMap<String, Handler<S>>,
    validators: HashMap<String, Validator>,
    errors: Vec<String>,
}

impl<S> ServiceBuilder<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(service: S) -> Self {
        Self {
            service,
            methods: HashMap::new(),
            validators: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Registers a method that receives its arguments as raw JSON values.
    pub fn method<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<S>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if name.is_empty() || name == RESERVED_METHOD {
            self.errors
                .push(format!("'{}' cannot be registered as a method", name));
            return self;
        }
        let handler: Handler<S> = Arc::new(
            move |service: Arc<S>, args: Vec<Value>| -> BoxFuture<'static, Result<Value>> {
                Box::pin(f(service, args))
            },
        );
        if self.methods.insert(name.to_string(), handler).is_some() {
            self.errors
                .push(format!("method '{}' registered more than once", name));
        }
        self
    }

    /// Registers a method whose positional arguments are deserialized into `A`, usually a
    /// tuple, and whose output is serialized back to JSON. Arguments that do not deserialize are
    /// reported to the caller as invalid params.
    pub fn typed_method<A, R, F, Fut>(self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.method(name, move |service, args| {
            let call = decode_args::<A>(args).map(|args| f(service, args));
            async move {
                let output = call?.await?;
                Ok::<_, RpcError>(serde_json::to_value(output)?)
            }
        })
    }

    /// Attaches a parameter check to a method. Checks attached to the same method combine with
    /// logical AND.
    pub fn validator<F>(mut self, name: &str, check: F) -> Self
    where
        F: Fn(&Params) -> bool + Send + Sync + 'static,
    {
        self.validators
            .entry(name.to_string())
            .or_default()
            .checks
            .push(Arc::new(check));
        self
    }

    /// Attaches a check that accepts the params only if their positional arguments deserialize
    /// into `T`.
    pub fn validate_as<T>(self, name: &str) -> Self
    where
        T: DeserializeOwned + 'static,
    {
        self.validator(name, |params: &Params| {
            decode_args::<T>(params.clone().into_args()).is_ok()
        })
    }

    /// Finishes registration.
    pub fn build(self) -> Result<Endpoint<S>> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(RpcError::Config(error));
        }
        if self.methods.is_empty() {
            return Err(RpcError::Config("service exposes no methods".into()));
        }
        if let Some(orphan) = self
            .validators
            .keys()
            .find(|name| !self.methods.contains_key(*name))
        {
            return Err(RpcError::Config(format!(
                "validator attached to unknown method '{}'",
                orphan
            )));
        }
        Ok(Endpoint {
            service: Arc::new(self.service),
            descriptor: Arc::new(ServiceDescriptor {
                methods: self.methods,
                validators: self.validators,
            }),
        })
    }
}

/// A registered service: the service instance together with its descriptor. Cloning is cheap.
pub struct Endpoint<S> {
    service: Arc<S>,
    descriptor: Arc<ServiceDescriptor<S>>,
}

impl<S> Clone for Endpoint<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            descriptor: Arc::clone(&self.descriptor),
        }
    }
}

impl<S> std::fmt::Debug for Endpoint<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<S> Endpoint<S>
where
    S: Send + Sync + 'static,
{
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn descriptor(&self) -> &ServiceDescriptor<S> {
        &self.descriptor
    }

    /// Handles one raw JSON-RPC message. See [`engine::handle_request`].
    pub async fn handle_request(&self, raw: &str) -> Option<Reply> {
        engine::handle_request(self, raw).await
    }

    /// Calls a registered method directly. Returns `None` if the method is not callable.
    pub(crate) fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Option<BoxFuture<'static, Result<Value>>> {
        self.descriptor
            .handler(method)
            .map(|handler| handler(Arc::clone(&self.service), args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Greeter;

    #[derive(Deserialize)]
    struct Subtract {
        minuend: f64,
        subtrahend: f64,
    }

    fn greeter() -> ServiceBuilder<Greeter> {
        ServiceBuilder::new(Greeter)
            .typed_method("hello", |_, (name,): (String,)| async move {
                Ok(format!("Hello {}", name))
            })
            .typed_method("subtract", |_, (args,): (Subtract,)| async move {
                Ok(args.minuend - args.subtrahend)
            })
    }

    #[test]
    fn test_callable_set() {
        let endpoint = greeter().build().unwrap();
        let descriptor = endpoint.descriptor();
        assert!(descriptor.is_method_callable("hello"));
        assert!(!descriptor.is_method_callable("goodbye"));
        assert!(!descriptor.is_method_callable(""));
        assert!(!descriptor.is_method_callable(RESERVED_METHOD));
        assert_eq!(descriptor.method_names(), vec!["hello", "subtract"]);
        assert!(descriptor.validator_for("hello").is_none());
    }

    #[test]
    fn test_validators_combine_with_and() {
        let endpoint = greeter()
            .validate_as::<(Subtract,)>("subtract")
            .validator("subtract", |params| matches!(params, Params::Positional(_)))
            .build()
            .unwrap();
        let validator = endpoint.descriptor().validator_for("subtract").unwrap();
        assert_eq!(validator.len(), 2);

        let good = Params::from(vec![json!({"minuend": 3, "subtrahend": 1})]);
        assert!(validator.accepts(&good));

        // Deserializes, but is not positional
        let named = Params::from_value(Some(&json!({"minuend": 3, "subtrahend": 1}))).unwrap();
        assert!(!validator.accepts(&named));

        let wrong = Params::from(vec![json!({"minuend": "three"})]);
        assert!(!validator.accepts(&wrong));
    }

    #[test]
    fn test_configuration_errors() {
        let reserved = greeter()
            .method(RESERVED_METHOD, |_, _| async { Ok(Value::Null) })
            .build();
        assert!(matches!(reserved, Err(RpcError::Config(_))));

        let empty_name = greeter().method("", |_, _| async { Ok(Value::Null) }).build();
        assert!(matches!(empty_name, Err(RpcError::Config(_))));

        let duplicate = greeter()
            .method("hello", |_, _| async { Ok(Value::Null) })
            .build();
        assert!(matches!(duplicate, Err(RpcError::Config(_))));

        let orphan = greeter().validator("missing", |_| true).build();
        assert!(matches!(orphan, Err(RpcError::Config(_))));

        let nothing = ServiceBuilder::new(Greeter).build();
        assert!(matches!(nothing, Err(RpcError::Config(_))));
    }

    #[tokio::test]
    async fn test_typed_invocation() {
        let endpoint = greeter()
            .typed_method("ping", |_, (): ()| async { Ok("pong") })
            .build()
            .unwrap();

        let hello = endpoint.invoke("hello", vec![json!("RPC")]).unwrap().await;
        assert_eq!(hello.unwrap(), json!("Hello RPC"));

        let ping = endpoint.invoke("ping", vec![]).unwrap().await;
        assert_eq!(ping.unwrap(), json!("pong"));

        let bad = endpoint.invoke("hello", vec![json!(1)]).unwrap().await;
        assert!(matches!(bad, Err(RpcError::InvalidParams(_))));

        let too_many = endpoint
            .invoke("hello", vec![json!("a"), json!("b")])
            .unwrap()
            .await;
        assert!(matches!(too_many, Err(RpcError::InvalidParams(_))));

        assert!(endpoint.invoke("nope", vec![]).is_none());
    }
}
