//! Defines the JSON-RPC 2.0 message types and their conversion to and from JSON values.
//!
//! Includes request ids, parameters, requests, responses and the reply an endpoint hands back
//! to its transport.
use serde_json::{Map, Number, Value};

use crate::error::*;

/// The protocol marker every message carries in its `jsonrpc` member.
pub const VERSION: &str = "2.0";

/// HTTP status a transport should use when an endpoint produced no reply.
pub const NO_CONTENT_STATUS: u16 = 204;

/// A request identifier: a string, an integer-valued number, or `null`.
#[derive(PartialEq, Clone, Debug)]
pub enum Id {
    Null,
    Number(Number),
    String(String),
}

impl Id {
    /// Interprets a JSON value as a request id. Returns `None` for values that are not valid
    /// ids: booleans, arrays, objects and fractional numbers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Id::Null),
            Value::String(s) => Some(Id::String(s.clone())),
            Value::Number(n) if is_integral(n) => Some(Id::Number(n.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Id::Null => Value::Null,
            Id::Number(n) => Value::Number(n.clone()),
            Id::String(s) => Value::String(s.clone()),
        }
    }

    /// Returns the id as a string slice if it is a string id.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Id::String(s) => Some(s),
            _ => None,
        }
    }
}

fn is_integral(n: &Number) -> bool {
    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
}

macro_rules! id_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Id {
                fn from(id: $ty) -> Self {
                    Id::Number(id.into())
                }
            }
        )*
    };
}

id_from_integer!(i32, i64, u32, u64);

impl From<&str> for Id {
    fn from(id: &str) -> Self {
        Id::String(id.to_string())
    }
}

impl From<String> for Id {
    fn from(id: String) -> Self {
        Id::String(id)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Null => write!(f, "null"),
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// Parameters of a call: nothing, an ordered list, or a keyed mapping.
#[derive(PartialEq, Clone, Debug, Default)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Params {
    /// Interprets the `params` member of a request. Returns `None` when the member is present
    /// but is neither an array nor an object.
    pub fn from_value(value: Option<&Value>) -> Option<Self> {
        match value {
            None => Some(Params::None),
            Some(Value::Array(items)) => Some(Params::Positional(items.clone())),
            Some(Value::Object(map)) => Some(Params::Named(map.clone())),
            Some(_) => None,
        }
    }

    /// The `params` member to send, or `None` to omit it.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Params::None => None,
            Params::Positional(items) => Some(Value::Array(items.clone())),
            Params::Named(map) => Some(Value::Object(map.clone())),
        }
    }

    /// Expands the parameters into positional arguments. A keyed mapping becomes a single
    /// argument.
    pub fn into_args(self) -> Vec<Value> {
        match self {
            Params::None => Vec::new(),
            Params::Positional(items) => items,
            Params::Named(map) => vec![Value::Object(map)],
        }
    }
}

impl From<Vec<Value>> for Params {
    fn from(items: Vec<Value>) -> Self {
        Params::Positional(items)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params::Named(map)
    }
}

/// An outgoing RPC request. A request without an id is a notification.
#[derive(PartialEq, Clone, Debug)]
pub struct Request {
    pub id: Option<Id>,
    pub method: String,
    pub params: Params,
}

impl Request {
    pub fn new(id: impl Into<Id>, method: impl Into<String>, params: Params) -> Self {
        Self {
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Params) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".into(), Value::String(VERSION.into()));
        map.insert("method".into(), Value::String(self.method.clone()));
        if let Some(params) = self.params.to_value() {
            map.insert("params".into(), params);
        }
        if let Some(id) = &self.id {
            map.insert("id".into(), id.to_value());
        }
        Value::Object(map)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value())?)
    }
}

/// The outcome carried by a response.
#[derive(PartialEq, Clone, Debug)]
pub enum ResponsePayload {
    Success(Value),
    Error(ApplicationError),
}

/// An RPC response: an id echoing the request and either a result or an error.
#[derive(PartialEq, Clone, Debug)]
pub struct Response {
    pub id: Id,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            id,
            payload: ResponsePayload::Success(result),
        }
    }

    pub fn error(id: Id, error: ApplicationError) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// Returns the error object if this is an error response.
    pub fn error_object(&self) -> Option<&ApplicationError> {
        match &self.payload {
            ResponsePayload::Error(err) => Some(err),
            ResponsePayload::Success(_) => None,
        }
    }

    /// Converts the response into the result a caller sees.
    pub fn into_result(self) -> Result<Value> {
        match self.payload {
            ResponsePayload::Success(value) => Ok(value),
            ResponsePayload::Error(err) => Err(RpcError::Application(err)),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".into(), Value::String(VERSION.into()));
        match &self.payload {
            ResponsePayload::Success(result) => {
                map.insert("result".into(), result.clone());
            }
            ResponsePayload::Error(err) => {
                map.insert("error".into(), err.to_value());
            }
        }
        map.insert("id".into(), self.id.to_value());
        Value::Object(map)
    }

    /// Creates a response from a JSON value. A missing `result` member is read as `null`, and a
    /// missing or invalid id as `Id::Null`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| RpcError::Protocol("Response is not an object".into()))?;
        let id = obj.get("id").and_then(Id::from_value).unwrap_or(Id::Null);
        let payload = match obj.get("error") {
            Some(err) => ResponsePayload::Error(ApplicationError::from_value(err)?),
            None => ResponsePayload::Success(obj.get("result").cloned().unwrap_or(Value::Null)),
        };
        Ok(Self { id, payload })
    }
}

/// What an endpoint hands back to its transport for one inbound message.
#[derive(PartialEq, Clone, Debug)]
pub enum Reply {
    Single(Response),
    Batch(Vec<Response>),
}

impl Reply {
    pub fn to_value(&self) -> Value {
        match self {
            Reply::Single(response) => response.to_value(),
            Reply::Batch(responses) => {
                Value::Array(responses.iter().map(Response::to_value).collect())
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value())?)
    }

    /// The HTTP status an HTTP transport should send with this reply: 500 for an internal
    /// error, 400 for any other single error, 200 otherwise.
    pub fn status_code(&self) -> u16 {
        match self {
            Reply::Single(response) => match response.error_object() {
                None => 200,
                Some(err) if err.code == ErrorCode::InternalError.code() => 500,
                Some(_) => 400,
            },
            Reply::Batch(_) => 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    lazy_static::lazy_static! {
        static ref TEST_RESPONSES: Vec<Response> = vec![
            Response::success(Id::from(1), json!("Hello RPC")),
            Response::success(Id::from("abc"), json!({"nested": [1, 2, 3]})),
            Response::error(
                Id::from(2),
                ApplicationError::new(1, "This is an error").with_data("something went wrong"),
            ),
            Response::error(Id::Null, ApplicationError::reserved(ErrorCode::ParseError)),
        ];
    }

    #[test]
    fn test_response_idempotence() {
        for response in TEST_RESPONSES.iter() {
            let text = serde_json::to_string(&response.to_value()).unwrap();
            let reparsed: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(reparsed, response.to_value());
            assert_eq!(&Response::from_value(&reparsed).unwrap(), response);
        }
    }

    #[test]
    fn test_wire_member_order() {
        let response = Response::success(Id::from(1), json!("Hello RPC"));
        assert_eq!(
            serde_json::to_string(&response.to_value()).unwrap(),
            r#"{"jsonrpc":"2.0","result":"Hello RPC","id":1}"#
        );

        let request = Request::new(7, "hello", Params::from(vec![json!("RPC")]));
        assert_eq!(
            request.to_json().unwrap(),
            r#"{"jsonrpc":"2.0","method":"hello","params":["RPC"],"id":7}"#
        );

        let notification = Request::notification("ping", Params::None);
        assert!(notification.is_notification());
        assert_eq!(
            notification.to_json().unwrap(),
            r#"{"jsonrpc":"2.0","method":"ping"}"#
        );
    }

    #[test]
    fn test_id_validity() {
        assert_eq!(Id::from_value(&json!(null)), Some(Id::Null));
        assert_eq!(Id::from_value(&json!(3)), Some(Id::from(3)));
        assert_eq!(Id::from_value(&json!("x")), Some(Id::from("x")));
        assert!(Id::from_value(&json!(3.0)).is_some());
        assert_eq!(Id::from_value(&json!(3.5)), None);
        assert_eq!(Id::from_value(&json!(true)), None);
        assert_eq!(Id::from_value(&json!([1])), None);
        assert_eq!(Id::from_value(&json!({"id": 1})), None);
    }

    #[test]
    fn test_params_shapes() {
        assert_eq!(Params::from_value(None), Some(Params::None));
        assert_eq!(Params::from_value(Some(&json!(42))), None);
        assert_eq!(Params::from_value(Some(&json!("x"))), None);
        assert_eq!(Params::from_value(Some(&json!(null))), None);

        let positional = Params::from_value(Some(&json!([1, 2]))).unwrap();
        assert_eq!(positional.into_args(), vec![json!(1), json!(2)]);

        let named = Params::from_value(Some(&json!({"minuend": 1}))).unwrap();
        assert_eq!(named.into_args(), vec![json!({"minuend": 1})]);
    }

    #[test]
    fn test_reply_status() {
        let ok = Reply::Single(Response::success(Id::from(1), json!(1)));
        assert_eq!(ok.status_code(), 200);

        let internal = Reply::Single(Response::error(
            Id::from(1),
            ApplicationError::reserved(ErrorCode::InternalError),
        ));
        assert_eq!(internal.status_code(), 500);

        let app = Reply::Single(Response::error(Id::from(1), ApplicationError::new(1, "no")));
        assert_eq!(app.status_code(), 400);

        let batch = Reply::Batch(vec![Response::error(
            Id::from(1),
            ApplicationError::reserved(ErrorCode::InternalError),
        )]);
        assert_eq!(batch.status_code(), 200);
        assert_eq!(batch.to_value(), json!([{
            "jsonrpc": "2.0",
            "error": {"code": -32603, "message": "Internal error"},
            "id": 1
        }]));
    }

    #[test]
    fn test_invalid_responses() {
        assert!(Response::from_value(&json!([])).is_err());
        assert!(Response::from_value(&json!("nope")).is_err());
        assert!(Response::from_value(&json!({"error": "flat", "id": 1})).is_err());

        let no_result = Response::from_value(&json!({"jsonrpc": "2.0", "id": "a"})).unwrap();
        assert_eq!(no_result.into_result().unwrap(), Value::Null);
    }
}
