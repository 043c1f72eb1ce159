//! Simlink core.
//!
//! Federation building blocks shared by the manager, the starter and the
//! federates.
//!
//! # Architecture
//!
//! The [`lifecycle`] machine is Sans-IO: it consumes reply frames and returns
//! [`LifecycleAction`]s. Runtimes in the binary crates execute those actions
//! over the [`transport`] endpoints, using an [`Environment`] for time and
//! randomness.
//!
//! # Components
//!
//! - [`FederateLifecycle`]: per-federate orchestration state machine
//! - [`RouterEndpoint`] / [`RequestEndpoint`]: TCP endpoints carrying one
//!   envelope per length-delimited frame
//! - [`Environment`] / [`SystemEnv`]: time and randomness

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod lifecycle;
pub mod log;
mod system_env;
pub mod transport;

pub use env::Environment;
pub use error::{LifecycleError, TransportError};
pub use lifecycle::{
    DEFAULT_POLL_INTERVAL, FederateLifecycle, FederateOutcome, FederateSpec, LifecycleAction,
    LifecycleConfig, LifecycleState, Peer,
};
pub use log::LogLevel;
pub use system_env::SystemEnv;
pub use transport::{
    ClientIdentity, Inbound, MAX_FRAME_SIZE, RequestEndpoint, RouterEndpoint, send_one_way,
};
