//! Client side of a persistent duplex connection.
//!
//! A [`DuplexClient`] owns one stream to a JSON-RPC peer. Calls are matched to their replies by
//! request id through a shared table of [`PendingCalls`], so any number of calls can be in flight
//! at once and replies may arrive in any order.
use std::{
    collections::HashMap,
    future::Future,
    io,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    io::{split, AsyncRead, AsyncWrite},
    net::{TcpStream, UnixStream},
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};
use tracing::{debug, error, trace, warn};

use crate::{
    client::Caller,
    codec::{Frame, FrameCodec},
    error::*,
    id::generate_id,
    message::*,
};

/// Capacity of the channels between callers and connection tasks.
pub const CHANNEL_CAPACITY: usize = 100;

/// Default upper bound on the length of one inbound line, in bytes.
pub const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

/// Calls awaiting their reply, keyed by request id.
///
/// Every entry is removed exactly once: when its reply arrives, when the caller gives up, or
/// when the connection closes. Once closed, the table accepts no new entries.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<String, oneshot::Sender<Result<Value>>>,
    closed: bool,
}

impl PendingCalls {
    /// Reserves an id and returns the channel its outcome will be delivered on.
    pub fn register(&mut self, id: &str) -> Result<oneshot::Receiver<Result<Value>>> {
        if self.closed {
            return Err(RpcError::Cancelled);
        }
        if self.calls.contains_key(id) {
            return Err(RpcError::Protocol(format!("duplicate request id {}", id)));
        }
        let (sender, receiver) = oneshot::channel();
        self.calls.insert(id.to_string(), sender);
        Ok(receiver)
    }

    /// Delivers the outcome for `id` and removes the entry. Returns false if no call was waiting
    /// on that id.
    pub fn resolve(&mut self, id: &str, outcome: Result<Value>) -> bool {
        match self.calls.remove(id) {
            Some(sender) => {
                // Receiver may be dropped if the caller gave up waiting; ignore send errors.
                drop(sender.send(outcome));
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.calls.contains_key(id)
    }

    /// Drops the entry for `id` without delivering anything.
    pub fn remove(&mut self, id: &str) -> bool {
        self.calls.remove(id).is_some()
    }

    /// Closes the table and rejects every waiting call. Returns the number of calls rejected.
    pub fn cancel_all(&mut self) -> usize {
        self.closed = true;
        let cancelled = self.calls.len();
        for (_, sender) in self.calls.drain() {
            drop(sender.send(Err(RpcError::Cancelled)));
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn lock(pending: &Mutex<PendingCalls>) -> MutexGuard<'_, PendingCalls> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a pending entry when the call that owns it finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingCalls>,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

/// Where the underlying stream is in its life.
#[derive(Debug, Clone)]
enum ConnectionState {
    Connecting,
    Open,
    Failed(io::ErrorKind, String),
    Closed,
}

/// RPC client over a persistent stream.
///
/// Construction never waits for the connection: calls made before the stream is open are
/// registered immediately and sent once it is. Must be created within a tokio runtime.
#[derive(Debug)]
pub struct DuplexClient {
    /// Calls awaiting replies, shared with the connection task.
    pending: Arc<Mutex<PendingCalls>>,
    /// Serialized messages for the connection task to write.
    outbound: mpsc::Sender<String>,
    /// Connection state published by the connection task.
    state: watch::Receiver<ConnectionState>,
    /// Stops the connection task.
    shutdown: CancellationToken,
    /// Handle to the background connection task.
    handle: Option<JoinHandle<()>>,
}

impl DuplexClient {
    /// Connects to a TCP address in the background.
    pub fn connect_tcp(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        Self::spawn(async move {
            let stream = TcpStream::connect(&addr).await?;
            trace!("TCP connection established to: {}", addr);
            Ok(stream)
        })
    }

    /// Connects to a Unix domain socket in the background.
    pub fn connect_unix<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::spawn(async move {
            let stream = UnixStream::connect(&path).await?;
            trace!("Unix connection established to: {:?}", path);
            Ok(stream)
        })
    }

    /// Uses an already connected stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::spawn(async move { Ok(stream) })
    }

    fn spawn<F, S>(connect: F) -> Self
    where
        F: Future<Output = io::Result<S>> + Send + 'static,
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let pending = Arc::new(Mutex::new(PendingCalls::default()));
        let (outbound, outbound_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (state_sender, state) = watch::channel(ConnectionState::Connecting);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_connection(
            connect,
            Arc::clone(&pending),
            outbound_receiver,
            state_sender,
            shutdown.clone(),
        ));
        Self {
            pending,
            outbound,
            state,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Sends a request and waits for its reply.
    pub async fn send_request(&self, method: &str, params: Params) -> Result<Value> {
        let id = generate_id();
        let receiver = lock(&self.pending).register(&id)?;
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };
        self.send(Request::new(id, method, params)).await?;
        receiver.await.map_err(|_| RpcError::Cancelled)?
    }

    /// Sends a notification. Completes once the message is queued for writing.
    pub async fn send_notification(&self, method: &str, params: Params) -> Result<()> {
        self.send(Request::notification(method, params)).await
    }

    /// Waits for the connection to open, then queues a message for writing.
    async fn send(&self, request: Request) -> Result<()> {
        self.ready().await?;
        let text = request.to_json()?;
        trace!("sending message: {}", text);
        self.outbound
            .send(text)
            .await
            .map_err(|_| RpcError::Cancelled)
    }

    /// Waits until the connection is open, or reports why it never will be.
    pub async fn ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        let current = state
            .wait_for(|state| !matches!(state, ConnectionState::Connecting))
            .await
            .map_err(|_| RpcError::Cancelled)?
            .clone();
        match current {
            ConnectionState::Open => Ok(()),
            ConnectionState::Failed(kind, message) => Err(RpcError::Connect {
                source: io::Error::new(kind, message),
            }),
            ConnectionState::Connecting | ConnectionState::Closed => Err(RpcError::Cancelled),
        }
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Closes the connection. Every call still waiting fails with [`RpcError::Cancelled`] and
    /// no further replies are dispatched. Calling this more than once has no further effect.
    pub fn close(&self) {
        let cancelled = lock(&self.pending).cancel_all();
        if cancelled > 0 {
            debug!("Cancelled {} pending calls on close", cancelled);
        }
        self.shutdown.cancel();
    }

    /// Waits for the connection task to finish.
    pub async fn join(mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| RpcError::Protocol(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for DuplexClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Caller for DuplexClient {
    async fn call(&self, method: &str, params: Params) -> Result<Value> {
        self.send_request(method, params).await
    }

    async fn notify(&self, method: &str, params: Params) -> Result<()> {
        self.send_notification(method, params).await
    }
}

/// Connection task: establishes the stream, then moves messages in both directions until the
/// stream ends or the client shuts it down.
async fn run_connection<F, S>(
    connect: F,
    pending: Arc<Mutex<PendingCalls>>,
    mut outbound: mpsc::Receiver<String>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
) where
    F: Future<Output = io::Result<S>> + Send + 'static,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let stream = tokio::select! {
        _ = shutdown.cancelled() => {
            state.send_replace(ConnectionState::Closed);
            lock(&pending).cancel_all();
            return;
        }
        result = connect => match result {
            Ok(stream) => stream,
            Err(e) => {
                error!("Connection failed: {}", e);
                state.send_replace(ConnectionState::Failed(e.kind(), e.to_string()));
                lock(&pending).cancel_all();
                return;
            }
        }
    };
    state.send_replace(ConnectionState::Open);

    let (read_half, write_half) = split(stream);
    let mut frames = FramedRead::new(read_half, FrameCodec::new());
    let mut writer = FramedWrite::new(write_half, FrameCodec::new());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                trace!("Connection closed by client");
                break;
            }
            frame = frames.next() => match frame {
                Some(Ok(Frame::Message(line))) => dispatch(&pending, &line),
                Some(Ok(Frame::Malformed(reason))) => {
                    warn!("Dropping unreadable message: {}", reason);
                }
                Some(Err(e)) => {
                    warn!("Error reading from connection: {}", e);
                    break;
                }
                None => {
                    trace!("Connection closed by peer");
                    break;
                }
            },
            Some(text) = outbound.recv() => {
                if let Err(e) = writer.send(text).await {
                    error!("Error writing to connection: {}", e);
                    break;
                }
            }
        }
    }

    state.send_replace(ConnectionState::Closed);
    let cancelled = lock(&pending).cancel_all();
    if cancelled > 0 {
        debug!("Cancelled {} pending calls", cancelled);
    }
    if let Err(e) = SinkExt::<String>::close(&mut writer).await {
        trace!("Error shutting down writer: {}", e);
    }
}

/// Routes one inbound line to the calls waiting on it. Anything that is not a reply to a
/// pending call is dropped.
fn dispatch(pending: &Mutex<PendingCalls>, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    trace!("received message: {}", line);
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Array(messages)) => {
            for message in &messages {
                dispatch_message(pending, message);
            }
        }
        Ok(message) => dispatch_message(pending, &message),
        Err(e) => warn!("Dropping unparseable message: {}", e),
    }
}

fn dispatch_message(pending: &Mutex<PendingCalls>, message: &Value) {
    if message.get("method").is_some() {
        debug!("Dropping inbound request; this client does not serve methods");
        return;
    }
    let Some(id) = message.get("id").and_then(Value::as_str) else {
        debug!("Dropping message without a usable id: {}", message);
        return;
    };
    let mut pending = lock(pending);
    if !pending.contains(id) {
        debug!("Dropping reply for unknown id {}", id);
        return;
    }
    let outcome = Response::from_value(message).and_then(Response::into_result);
    pending.resolve(id, outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_calls_lifecycle() {
        let mut pending = PendingCalls::default();
        let mut first = pending.register("a").unwrap();
        let mut second = pending.register("b").unwrap();
        assert!(pending.register("a").is_err());
        assert_eq!(pending.len(), 2);

        assert!(pending.resolve("b", Ok(json!(2))));
        assert!(!pending.resolve("b", Ok(json!(3))));
        assert_eq!(second.try_recv().unwrap().unwrap(), json!(2));
        assert_eq!(pending.len(), 1);

        assert_eq!(pending.cancel_all(), 1);
        assert!(pending.is_empty());
        assert!(pending.is_closed());
        assert!(matches!(first.try_recv().unwrap(), Err(RpcError::Cancelled)));
        assert!(matches!(pending.register("c"), Err(RpcError::Cancelled)));
    }

    #[test]
    fn test_dispatch_routes_and_drops() {
        let pending = Mutex::new(PendingCalls::default());
        let mut ok = lock(&pending).register("ok").unwrap();
        let mut failed = lock(&pending).register("failed").unwrap();
        let mut batched = lock(&pending).register("batched").unwrap();

        // None of these are actionable; all are dropped without touching the table
        dispatch(&pending, "not json");
        dispatch(&pending, "");
        dispatch(&pending, r#"{"jsonrpc":"2.0","result":1,"id":"unknown"}"#);
        dispatch(&pending, r#"{"jsonrpc":"2.0","error":{"code":1,"message":"x"},"id":null}"#);
        dispatch(&pending, r#"{"jsonrpc":"2.0","error":{"code":1,"message":"x"}}"#);
        dispatch(&pending, r#"{"jsonrpc":"2.0","method":"ok","id":"ok"}"#);
        assert_eq!(lock(&pending).len(), 3);

        dispatch(&pending, r#"{"jsonrpc":"2.0","result":"yes","id":"ok"}"#);
        dispatch(
            &pending,
            r#"{"jsonrpc":"2.0","error":{"code":1,"message":"This is an error","data":"d"},"id":"failed"}"#,
        );
        dispatch(&pending, r#"[{"jsonrpc":"2.0","result":[1],"id":"batched"}]"#);
        assert!(lock(&pending).is_empty());

        assert_eq!(ok.try_recv().unwrap().unwrap(), json!("yes"));
        assert_eq!(batched.try_recv().unwrap().unwrap(), json!([1]));
        match failed.try_recv().unwrap() {
            Err(RpcError::Application(err)) => {
                assert_eq!(err.code, 1);
                assert_eq!(err.message, "This is an error");
                assert_eq!(err.data, Some(json!("d")));
            }
            other => panic!("expected an application error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_error_rejects_matching_call() {
        let pending = Mutex::new(PendingCalls::default());
        let mut call = lock(&pending).register("x").unwrap();
        dispatch(&pending, r#"{"jsonrpc":"2.0","error":"flat","id":"x"}"#);
        assert!(matches!(call.try_recv().unwrap(), Err(RpcError::Protocol(_))));
        assert!(lock(&pending).is_empty());
    }
}
