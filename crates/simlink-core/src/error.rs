//! Error types for transport endpoints and the lifecycle machine.

use std::{io, net::SocketAddr};

use simlink_proto::{MessageType, ProtocolError};
use thiserror::Error;

use crate::transport::ClientIdentity;

/// Errors raised by transport endpoints.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// Outbound connection failed
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Peer address
        addr: SocketAddr,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// Read or write failed on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The local endpoint was closed
    #[error("endpoint closed")]
    Closed,

    /// The peer closed the connection before replying
    #[error("peer closed the connection")]
    PeerClosed,

    /// Reply addressed to a client that is no longer connected
    #[error("unknown client {0}")]
    UnknownClient(ClientIdentity),

    /// Envelope could not be encoded for sending
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Returns true when the peer actively refused the connection, e.g.
    /// because it has not bound its port yet.
    pub fn is_connection_refused(&self) -> bool {
        matches!(
            self,
            Self::Connect { source, .. } if source.kind() == io::ErrorKind::ConnectionRefused
        )
    }
}

/// Cause of a lifecycle `Error` transition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    /// Reply could not be decoded or failed validation
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reply answered a different request than the outstanding one
    #[error("reply correlates to message {actual}, expected {expected}")]
    Correlation {
        /// Id of the outstanding request
        expected: u64,
        /// `replyToId` of the reply
        actual: u64,
    },

    /// Reply of the wrong catalog type
    #[error("unexpected {actual} reply, expected {expected}")]
    UnexpectedReply {
        /// Tag(s) the machine was waiting for
        expected: &'static str,
        /// Type that arrived
        actual: MessageType,
    },

    /// Peer reported a failure
    #[error("remote error: {0}")]
    Remote(String),

    /// Exchange failed at the transport
    #[error("transport failure: {0}")]
    Transport(String),
}

impl LifecycleError {
    /// Returns true for failures reported by, or attributable to, the peer.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Correlation { .. } | Self::UnexpectedReply { .. })
    }
}
