//! Simlink model controller.
//!
//! Federate-side half of the protocol. A [`ModelController`] wraps any
//! [`SimulationModel`] and answers run control, parameter, start, status,
//! statistic, reset and heartbeat requests; [`serve`] runs it over a
//! [`simlink_core::RouterEndpoint`].
//!
//! [`Mm1Model`] is a seeded M/M/1 queue used as the demo federate
//! (`simlink-mm1` binary).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod controller;
pub mod mm1;
pub mod model;
mod server;

pub use controller::{ControllerAction, ModelController};
pub use mm1::{Mm1Model, QueueStatistics};
pub use model::{ModelError, SimulationModel};
pub use server::{Shutdown, serve};
