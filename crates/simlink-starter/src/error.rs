//! Starter error types.

use std::{io, path::PathBuf};

use simlink_core::TransportError;
use simlink_proto::ProtocolError;
use thiserror::Error;

/// Errors raised while starting or killing federates.
///
/// Failures tied to one request are converted to the textual error slot of
/// its reply; none of them stop the receive loop.
#[derive(Error, Debug)]
pub enum StarterError {
    /// Every port in the configured range is taken
    #[error("no free port in range {start}..={end}")]
    NoFreePort {
        /// First port of the range
        start: u16,
        /// Last port of the range
        end: u16,
    },

    /// Software code is not in the alias table
    #[error("unknown software code: {0}")]
    UnknownSoftware(String),

    /// Instance id is already registered
    #[error("instance {0} is already registered")]
    DuplicateInstance(String),

    /// Instance id is not registered
    #[error("process unknown: {0}")]
    UnknownInstance(String),

    /// Working directory or redirection could not be prepared
    #[error("cannot prepare {path}: {source}")]
    Prepare {
        /// Offending path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// The process could not be spawned, exited early, or never became ready
    #[error("launch failure: {0}")]
    LaunchFailure(String),

    /// Configuration is unusable
    #[error("configuration error: {0}")]
    Config(String),

    /// Endpoint failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Envelope could not be built
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
