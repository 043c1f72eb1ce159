//! Simlink federate starter.
//!
//! Launches federate processes on request, hands each a free port, and
//! reclaims them (process, redirected output, working directory) on kill.
//!
//! # Components
//!
//! - [`Starter`]: request handling and process supervision
//! - [`serve`]: receive loop over a [`simlink_core::RouterEndpoint`]
//! - [`LaunchPlan`]: command line and file layout of one federate
//! - [`find_free_port`]: ascending bind-probe port allocation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod error;
pub mod launcher;
pub mod ports;
pub mod registry;
mod server;
mod starter;

pub use config::{
    DEFAULT_KILL_GRACE, DEFAULT_STARTUP_TIMEOUT, LaunchMode, StarterConfig, parse_software,
};
pub use error::StarterError;
pub use launcher::{LaunchPlan, PORT_PLACEHOLDER};
pub use ports::find_free_port;
pub use registry::{FederateInstance, ProcessState, Registry};
pub use server::serve;
pub use starter::Starter;
