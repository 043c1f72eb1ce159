//! TCP transport endpoints.
//!
//! Every frame is one encoded envelope behind a length prefix. Three
//! patterns are provided:
//!
//! - [`RouterEndpoint`]: listening server. Each accepted connection gets a
//!   [`ClientIdentity`]; replies are routed back to the connection the
//!   request arrived on.
//! - [`RequestEndpoint`]: client connection with one outstanding request at
//!   a time.
//! - [`send_one_way`]: deliver a single envelope without waiting for an
//!   answer.
//!
//! Steady-state operations wait without a timeout.

use std::{collections::HashMap, fmt, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use simlink_proto::Envelope;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{RwLock, mpsc},
    task::{JoinHandle, JoinSet},
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::TransportError;

/// Largest accepted frame.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frames buffered between connection readers and [`RouterEndpoint::recv`].
const INBOUND_CAPACITY: usize = 256;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().max_frame_length(MAX_FRAME_SIZE).new_codec()
}

/// Identity of one connection accepted by a [`RouterEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity(u64);

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Frame received by a router.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Connection the frame arrived on
    pub client: ClientIdentity,
    /// Raw envelope bytes
    pub frame: Bytes,
}

type ClientMap = Arc<RwLock<HashMap<ClientIdentity, mpsc::UnboundedSender<Bytes>>>>;

/// Multiplexing server endpoint.
///
/// Frames from every connection are funnelled into one queue read by
/// [`RouterEndpoint::recv`]. Closing the endpoint (or dropping it) stops
/// accepting and tears down every connection.
pub struct RouterEndpoint {
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<Inbound>,
    clients: ClientMap,
    accept_task: JoinHandle<()>,
}

impl RouterEndpoint {
    /// Bind and start accepting connections.
    ///
    /// # Errors
    ///
    /// - `TransportError::Bind` if the address cannot be bound
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(addr).await.map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let (inbound, incoming) = mpsc::channel(INBOUND_CAPACITY);
        let clients = ClientMap::default();
        let accept_task = tokio::spawn(accept_loop(listener, inbound, Arc::clone(&clients)));

        tracing::debug!(%local_addr, "router endpoint bound");
        Ok(Self { local_addr, incoming, clients, accept_task })
    }

    /// Address the endpoint listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next frame from any client.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` once the endpoint has been closed and the
    ///   queue is drained
    pub async fn recv(&mut self) -> Result<Inbound, TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }

    /// Send an envelope back to the client a request came from.
    ///
    /// # Errors
    ///
    /// - `TransportError::Protocol` if the envelope cannot be encoded
    /// - `TransportError::UnknownClient` if the connection has gone away
    pub async fn reply(&self, client: ClientIdentity, envelope: &Envelope) -> Result<(), TransportError> {
        let frame = envelope.to_bytes()?;
        let clients = self.clients.read().await;
        let sender = clients.get(&client).ok_or(TransportError::UnknownClient(client))?;
        sender.send(frame).map_err(|_| TransportError::UnknownClient(client))
    }

    /// Stop accepting and drop every connection.
    pub fn close(&mut self) {
        self.accept_task.abort();
        self.incoming.close();
    }
}

impl Drop for RouterEndpoint {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, inbound: mpsc::Sender<Inbound>, clients: ClientMap) {
    let mut connections = JoinSet::new();
    let mut next_client = 0u64;

    loop {
        tokio::select! {
            () = inbound.closed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    next_client += 1;
                    let client = ClientIdentity(next_client);
                    tracing::debug!(%client, %peer, "connection accepted");
                    connections.spawn(serve_connection(
                        stream,
                        client,
                        inbound.clone(),
                        Arc::clone(&clients),
                    ));
                },
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {},
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    client: ClientIdentity,
    inbound: mpsc::Sender<Inbound>,
    clients: ClientMap,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%client, error = %e, "set_nodelay failed");
    }

    let (mut sink, mut frames) = Framed::new(stream, codec()).split();
    let (outbound, mut replies) = mpsc::unbounded_channel::<Bytes>();
    clients.write().await.insert(client, outbound);

    let writer = async {
        while let Some(frame) = replies.recv().await {
            if let Err(e) = sink.send(frame).await {
                tracing::warn!(%client, error = %e, "write failed");
                break;
            }
        }
    };

    let reader = async {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(bytes) => {
                    if inbound.send(Inbound { client, frame: bytes.freeze() }).await.is_err() {
                        break;
                    }
                },
                Err(e) => {
                    tracing::warn!(%client, error = %e, "read failed");
                    break;
                },
            }
        }
    };

    tokio::select! {
        () = writer => {},
        () = reader => {},
    }

    clients.write().await.remove(&client);
    tracing::debug!(%client, "connection closed");
}

/// Client endpoint: one request, one reply.
pub struct RequestEndpoint {
    peer: SocketAddr,
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl RequestEndpoint {
    /// Connect to a router.
    ///
    /// # Errors
    ///
    /// - `TransportError::Connect` if the connection fails; see
    ///   [`TransportError::is_connection_refused`]
    pub async fn connect(peer: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(peer)
            .await
            .map_err(|source| TransportError::Connect { addr: peer, source })?;
        stream.set_nodelay(true)?;
        Ok(Self { peer, framed: Framed::new(stream, codec()) })
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send a request and wait for the reply frame.
    ///
    /// # Errors
    ///
    /// - `TransportError::PeerClosed` if the peer hangs up first
    /// - `TransportError::Io` on read or write failure
    pub async fn request(&mut self, envelope: &Envelope) -> Result<Bytes, TransportError> {
        self.send(envelope).await?;
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(frame.freeze()),
            Some(Err(e)) => Err(e.into()),
            None => Err(TransportError::PeerClosed),
        }
    }

    /// Send without waiting for a reply.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let frame = envelope.to_bytes()?;
        self.framed.send(frame).await?;
        Ok(())
    }

    /// Flush and shut down the connection.
    pub async fn close(mut self) -> Result<(), TransportError> {
        SinkExt::<Bytes>::close(&mut self.framed).await?;
        Ok(())
    }
}

/// Deliver one envelope on a fresh connection and hang up.
///
/// # Errors
///
/// - `TransportError::Connect` if the peer is unreachable
/// - `TransportError::Io` if the write fails
pub async fn send_one_way(peer: SocketAddr, envelope: &Envelope) -> Result<(), TransportError> {
    let mut endpoint = RequestEndpoint::connect(peer).await?;
    endpoint.send(envelope).await?;
    endpoint.close().await
}
