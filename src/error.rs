use serde_json::{Map, Value};
use std::io;
use thiserror::Error;

/// Errors that can occur during RPC operations.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Error occurred during I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error occurred during JSON serialization or deserialization.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error reading a newline-delimited frame from a stream.
    #[error("Framing error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// Error related to the RPC protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server or client was set up incorrectly. These are fatal and surface before any
    /// request is handled.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A method rejected the shape of its arguments.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Structured error raised by a service method, or received from a remote peer.
    #[error("{0}")]
    Application(ApplicationError),

    /// Could not establish a connection.
    #[error("Connection failed: {source}")]
    Connect {
        #[source]
        source: io::Error,
    },

    /// The call was abandoned because the connection closed before a reply arrived.
    #[error("Call cancelled: connection closed")]
    Cancelled,

    /// Error from the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// The error codes reserved by JSON-RPC 2.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Start of the implementation-defined server error band.
    ServerError,
}

impl ErrorCode {
    /// The numeric code sent on the wire.
    pub const fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerError => -32000,
        }
    }

    /// The standard short message for this code.
    pub const fn message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ServerError => "Server error",
        }
    }

    /// Maps a wire code back to a reserved code, if it is one.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            -32000 => Some(ErrorCode::ServerError),
            _ => None,
        }
    }
}

/// A structured error with a code, a message and optional data.
///
/// Service methods return this (wrapped in [`RpcError::Application`]) to control exactly what
/// the caller sees. It is also the JSON-RPC error object carried in error responses, and what a
/// client receives when the remote side answers with an error. On the wire it is serialized as
/// `{"code": ..., "message": ..., "data": ...}`, with `data` omitted when absent.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ApplicationError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl ApplicationError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches data to the error.
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// An error using one of the reserved codes and its standard message.
    pub fn reserved(code: ErrorCode) -> Self {
        Self::new(code.code(), code.message())
    }

    /// Converts the error to its JSON-RPC error object.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("code".into(), Value::from(self.code));
        map.insert("message".into(), Value::String(self.message.clone()));
        if let Some(data) = &self.data {
            map.insert("data".into(), data.clone());
        }
        Value::Object(map)
    }

    /// Creates an error from a JSON-RPC error object.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| RpcError::Protocol("Error member is not an object".into()))?;
        let code = obj
            .get("code")
            .and_then(Value::as_i64)
            .ok_or_else(|| RpcError::Protocol("Invalid error code".into()))?;
        let message = obj
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            code,
            message,
            data: obj.get("data").cloned(),
        })
    }
}

impl std::fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Application error {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({})", data)?;
        }
        Ok(())
    }
}

impl From<ApplicationError> for RpcError {
    fn from(error: ApplicationError) -> Self {
        RpcError::Application(error)
    }
}

impl From<ApplicationError> for Value {
    fn from(error: ApplicationError) -> Self {
        error.to_value()
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reserved_codes() {
        for code in [
            ErrorCode::ParseError,
            ErrorCode::InvalidRequest,
            ErrorCode::MethodNotFound,
            ErrorCode::InvalidParams,
            ErrorCode::InternalError,
            ErrorCode::ServerError,
        ] {
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ErrorCode::from_code(1), None);
        assert_eq!(ErrorCode::InternalError.code(), -32603);
    }

    #[test]
    fn test_application_error_object() {
        let err = ApplicationError::new(1, "This is an error").with_data("something went wrong");
        assert_eq!(
            err.to_value(),
            json!({"code": 1, "message": "This is an error", "data": "something went wrong"})
        );
        assert_eq!(ApplicationError::from_value(&err.to_value()).unwrap(), err);

        // Data is omitted entirely when absent
        let bare = ApplicationError::reserved(ErrorCode::MethodNotFound);
        assert_eq!(
            bare.to_value(),
            json!({"code": -32601, "message": "Method not found"})
        );

        assert!(ApplicationError::from_value(&json!("oops")).is_err());
        assert!(ApplicationError::from_value(&json!({"message": "no code"})).is_err());
    }
}
