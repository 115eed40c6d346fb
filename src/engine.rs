//! The protocol dispatch engine.
//!
//! Takes raw JSON-RPC text, validates it, resolves and invokes the target method on an
//! [`Endpoint`], and shapes the reply. Transports call [`handle_request`] once per inbound
//! message and send back whatever it returns.
use futures::future::join_all;
use serde_json::Value;
use tracing::{trace, warn};

use crate::{error::*, message::*, service::Endpoint};

const INVALID_REQUEST_DATA: &str = "The JSON sent is not a valid Request object.";
const INVALID_PARAMS_DATA: &str = "Invalid method parameter(s).";

/// The validated envelope of a single request. `id` is `None` for notifications.
struct Envelope<'a> {
    id: Option<Id>,
    method: &'a str,
    params: Option<&'a Value>,
}

impl<'a> Envelope<'a> {
    /// Checks the protocol marker, method and id shape. On failure, returns the id to echo in
    /// the error response.
    fn parse(request: &'a Value) -> std::result::Result<Self, Id> {
        let obj = request.as_object().ok_or(Id::Null)?;
        let id = match obj.get("id") {
            None => None,
            Some(raw) => Some(Id::from_value(raw).ok_or(Id::Null)?),
        };
        let echo = || id.clone().unwrap_or(Id::Null);
        if obj.get("jsonrpc").and_then(Value::as_str) != Some(VERSION) {
            return Err(echo());
        }
        let method = match obj.get("method").and_then(Value::as_str) {
            Some(method) if !method.is_empty() => method,
            _ => return Err(echo()),
        };
        Ok(Self {
            id,
            method,
            params: obj.get("params"),
        })
    }
}

fn error_response(id: Id, code: ErrorCode, data: impl Into<Value>) -> Response {
    Response::error(id, ApplicationError::reserved(code).with_data(data))
}

/// The reply to a message that could not be parsed at all.
pub(crate) fn parse_error(detail: impl Into<Value>) -> Reply {
    Reply::Single(error_response(Id::Null, ErrorCode::ParseError, detail))
}

/// Handles one raw JSON-RPC message, single or batch.
///
/// Returns `None` when nothing must be sent back, which only happens for a single
/// notification. Batches always produce a [`Reply::Batch`], possibly empty when every element
/// was a notification.
pub async fn handle_request<S>(endpoint: &Endpoint<S>, raw: &str) -> Option<Reply>
where
    S: Send + Sync + 'static,
{
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("Unparseable request: {}", e);
            return Some(parse_error(e.to_string()));
        }
    };
    match parsed {
        Value::Array(requests) => Some(handle_batch(endpoint, requests).await),
        request => handle_single(endpoint, request).await.map(Reply::Single),
    }
}

/// Handles a batch. Elements run concurrently; responses keep the order of their requests and
/// notifications leave no entry.
pub async fn handle_batch<S>(endpoint: &Endpoint<S>, requests: Vec<Value>) -> Reply
where
    S: Send + Sync + 'static,
{
    if requests.is_empty() {
        return Reply::Single(error_response(
            Id::Null,
            ErrorCode::InvalidRequest,
            INVALID_REQUEST_DATA,
        ));
    }
    trace!("handling batch of {} requests", requests.len());
    let responses = join_all(
        requests
            .into_iter()
            .map(|request| handle_single(endpoint, request)),
    )
    .await;
    Reply::Batch(responses.into_iter().flatten().collect())
}

/// Handles a single request value. Returns `None` for notifications, whatever their outcome.
pub async fn handle_single<S>(endpoint: &Endpoint<S>, request: Value) -> Option<Response>
where
    S: Send + Sync + 'static,
{
    let Envelope { id, method, params } = match Envelope::parse(&request) {
        Ok(envelope) => envelope,
        Err(id) => {
            warn!("Invalid request envelope, id={}", id);
            return Some(error_response(
                id,
                ErrorCode::InvalidRequest,
                INVALID_REQUEST_DATA,
            ));
        }
    };
    trace!("handling request: method={}, id={:?}", method, id);

    let descriptor = endpoint.descriptor();
    if !descriptor.is_method_callable(method) {
        return respond(
            id,
            method,
            Err(error_response(
                Id::Null,
                ErrorCode::MethodNotFound,
                format!(
                    "The method \"{}\" does not exist / is not available.",
                    method
                ),
            )),
        );
    }

    let params = Params::from_value(params).filter(|params| {
        descriptor
            .validator_for(method)
            .map_or(true, |validator| validator.accepts(params))
    });
    let Some(params) = params else {
        return respond(
            id,
            method,
            Err(error_response(
                Id::Null,
                ErrorCode::InvalidParams,
                INVALID_PARAMS_DATA,
            )),
        );
    };

    let outcome = match endpoint.invoke(method, params.into_args()) {
        Some(call) => call.await,
        None => Err(RpcError::Protocol(format!("method '{}' vanished", method))),
    };
    let shaped = match outcome {
        Ok(result) => Ok(result),
        Err(RpcError::Application(err)) => {
            warn!("Service error: {}", err);
            Err(Response::error(Id::Null, err))
        }
        Err(RpcError::InvalidParams(detail)) => {
            warn!("Invalid params for {}: {}", method, detail);
            Err(error_response(Id::Null, ErrorCode::InvalidParams, detail))
        }
        Err(e) => {
            warn!("RPC error: {}", e);
            Err(error_response(
                Id::Null,
                ErrorCode::InternalError,
                e.to_string(),
            ))
        }
    };
    respond(id, method, shaped)
}

/// Attaches the request id to an outcome, or drops the outcome if the request was a
/// notification.
fn respond(
    id: Option<Id>,
    method: &str,
    outcome: std::result::Result<Value, Response>,
) -> Option<Response> {
    match (id, outcome) {
        (Some(id), Ok(result)) => Some(Response::success(id, result)),
        (Some(id), Err(error)) => Some(Response { id, ..error }),
        (None, Ok(_)) => None,
        (None, Err(error)) => {
            if let Some(err) = error.error_object() {
                warn!("Notification {} failed: {}", method, err);
            }
            None
        }
    }
}
