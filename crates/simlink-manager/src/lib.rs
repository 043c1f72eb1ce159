//! Simlink federation manager.
//!
//! Runs one [`simlink_core::FederateLifecycle`] per federate over real
//! endpoints: start through the starter, configure and run the model,
//! collect statistics, kill.
//!
//! # Components
//!
//! - [`run_lifecycle`]: executes one machine's actions
//! - [`run_federation`]: runs every federate concurrently and collects
//!   outcomes by ordinal
//! - [`FederateTemplate`]: builds federate specs from command-line values

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod federation;
pub mod plan;
pub mod runtime;

pub use error::ManagerError;
pub use federation::{FederationConfig, FederationReport, random_run_id, run_federation};
pub use plan::{DEFAULT_ARGS_AFTER, FederateTemplate, ID_PLACEHOLDER, parse_param};
pub use runtime::{Connections, run_lifecycle};
