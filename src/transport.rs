//! Serving an endpoint over stream sockets.
//!
//! Messages are newline-delimited JSON in both directions. Each inbound line is one JSON-RPC
//! message (single or batch) and is dispatched on its own task, so a slow method never holds up
//! the rest of the connection. Replies are written as they complete.

use std::{net::SocketAddr, path::Path};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{split, AsyncRead, AsyncWrite},
    net::{
        TcpListener as TokioTcpListener, TcpStream, UnixListener as TokioUnixListener, UnixStream,
    },
    sync::mpsc,
};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{trace, warn};

use crate::{
    codec::{Frame, FrameCodec},
    connection::{CHANNEL_CAPACITY, MAX_FRAME_LENGTH},
    engine,
    error::*,
    service::Endpoint,
};

/// TCP listener for accepting RPC connections.
struct TcpListener {
    inner: TokioTcpListener,
}

impl TcpListener {
    async fn bind(addr: &str) -> Result<Self> {
        trace!("Binding TCP listener to address: {}", addr);
        let listener = TokioTcpListener::bind(addr).await?;
        Ok(Self { inner: listener })
    }
}

/// Unix domain socket listener for accepting RPC connections.
struct UnixListener {
    inner: TokioUnixListener,
}

impl UnixListener {
    async fn bind<P: AsRef<Path>>(path: P) -> Result<Self> {
        trace!("Binding Unix listener to path: {}", path.as_ref().display());
        let listener = TokioUnixListener::bind(path)?;
        Ok(Self { inner: listener })
    }
}

/// Anything that hands out connected streams.
#[async_trait]
trait Accept {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    async fn accept(&self) -> Result<Self::Stream>;
}

#[async_trait]
impl Accept for TcpListener {
    type Stream = TcpStream;
    async fn accept(&self) -> Result<Self::Stream> {
        let (stream, addr) = self.inner.accept().await?;
        trace!("Accepted TCP connection from: {}", addr);
        Ok(stream)
    }
}

#[async_trait]
impl Accept for UnixListener {
    type Stream = UnixStream;
    async fn accept(&self) -> Result<Self::Stream> {
        let (stream, _) = self.inner.accept().await?;
        trace!("Accepted Unix connection");
        Ok(stream)
    }
}

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// JSON-RPC server for TCP or Unix domain sockets.
///
/// ```ignore
/// Server::new().serve(endpoint).tcp("127.0.0.1:3000").await?.run().await?;
/// ```
///
/// All connections share the same service instance.
pub struct Server<S> {
    endpoint: Option<Endpoint<S>>,
    listener: Option<Listener>,
    max_frame_length: usize,
}

impl<S> Default for Server<S> {
    fn default() -> Self {
        Self {
            endpoint: None,
            listener: None,
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}

impl<S> Server<S>
where
    S: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint whose methods this server exposes.
    pub fn serve(mut self, endpoint: Endpoint<S>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Sets the longest inbound message accepted, in bytes. Longer messages are answered with a
    /// parse error and skipped.
    pub fn max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    /// Returns the bound address of the server. Only valid for TCP listeners that have already
    /// been bound, otherwise returns an error.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.listener {
            Some(Listener::Tcp(tcp)) => Ok(tcp.inner.local_addr()?),
            Some(Listener::Unix(_)) => Err(RpcError::Config(
                "unix sockets don't have a SocketAddr".into(),
            )),
            None => Err(RpcError::Config("No listener configured".into())),
        }
    }

    /// Configures the server to listen on a TCP address.
    pub async fn tcp(mut self, addr: &str) -> Result<Self> {
        self.listener = Some(Listener::Tcp(TcpListener::bind(addr).await?));
        Ok(self)
    }

    /// Configures the server to listen on a Unix domain socket.
    pub async fn unix<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.listener = Some(Listener::Unix(UnixListener::bind(path).await?));
        Ok(self)
    }

    /// Accepts connections until accepting fails.
    pub async fn run(self) -> Result<()> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| RpcError::Config("No service registered".into()))?;
        let listener = self
            .listener
            .ok_or_else(|| RpcError::Config("No listener configured".into()))?;
        let max_frame_length = self.max_frame_length;
        match listener {
            Listener::Tcp(tcp) => accept_loop(&endpoint, &tcp, max_frame_length).await,
            Listener::Unix(unix) => accept_loop(&endpoint, &unix, max_frame_length).await,
        }
    }
}

async fn accept_loop<S, L>(
    endpoint: &Endpoint<S>,
    listener: &L,
    max_frame_length: usize,
) -> Result<()>
where
    S: Send + Sync + 'static,
    L: Accept,
{
    loop {
        let stream = listener.accept().await?;
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            match serve_stream_with(endpoint, stream, max_frame_length).await {
                Ok(()) => trace!("Connection finished"),
                Err(e) => warn!("Connection error: {}", e),
            }
        });
    }
}

/// Serves one connected stream until the peer closes it.
///
/// Replies to requests still in flight at end of input are written before this returns.
pub async fn serve_stream<S, IO>(endpoint: Endpoint<S>, stream: IO) -> Result<()>
where
    S: Send + Sync + 'static,
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    serve_stream_with(endpoint, stream, MAX_FRAME_LENGTH).await
}

/// Like [`serve_stream`], with an explicit limit on the length of one inbound message.
///
/// A line that is not UTF-8 or exceeds the limit is answered with a parse error, and the
/// connection carries on with the next line.
pub async fn serve_stream_with<S, IO>(
    endpoint: Endpoint<S>,
    stream: IO,
    max_frame_length: usize,
) -> Result<()>
where
    S: Send + Sync + 'static,
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = split(stream);
    let mut frames = FramedRead::new(read_half, FrameCodec::with_max_length(max_frame_length));
    let (replies, mut reply_receiver) = mpsc::channel::<String>(CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(write_half, FrameCodec::new());
        while let Some(text) = reply_receiver.recv().await {
            trace!("sending reply: {}", text);
            sink.send(text).await?;
        }
        SinkExt::<String>::close(&mut sink).await?;
        Ok::<_, RpcError>(())
    });

    let mut outcome: Result<()> = Ok(());
    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(Frame::Message(line)) => line,
            Ok(Frame::Malformed(reason)) => {
                warn!("Unreadable message: {}", reason);
                let text = engine::parse_error(reason).to_json()?;
                if replies.send(text).await.is_err() {
                    break;
                }
                continue;
            }
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        trace!("received message: {}", line);
        let endpoint = endpoint.clone();
        let replies = replies.clone();
        tokio::spawn(async move {
            let Some(reply) = endpoint.handle_request(&line).await else {
                return;
            };
            match reply.to_json() {
                Ok(text) => {
                    // The writer only stops early if the stream failed.
                    drop(replies.send(text).await);
                }
                Err(e) => warn!("Could not serialize reply: {}", e),
            }
        });
    }

    drop(replies);
    let written = writer
        .await
        .map_err(|e| RpcError::Protocol(e.to_string()))?;
    outcome.and(written)
}
