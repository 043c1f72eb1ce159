//! Interface between the controller and a simulation.

use simlink_proto::{RunControl, Value};
use thiserror::Error;

/// Failures reported by a simulation model.
///
/// The controller turns each into the text of a NAK, status error or
/// statistic error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Parameter name not recognized
    #[error("unknown parameter {0}")]
    UnknownParameter(String),

    /// Parameter value has the wrong type or is out of range
    #[error("invalid value for {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// What is wrong with the value
        reason: String,
    },

    /// Run configuration the model cannot honor
    #[error("invalid run control: {0}")]
    InvalidRunControl(String),

    /// Statistic name not recognized
    #[error("unknown statistic {0}")]
    UnknownStatistic(String),

    /// Simulation failed while running
    #[error("simulation failed: {0}")]
    Failed(String),
}

/// A simulation driven by the model controller.
///
/// Calls arrive in protocol order: parameters, then one `run`, then
/// statistic queries. `reset` returns the model to its freshly started
/// condition.
pub trait SimulationModel: Send {
    /// Apply one parameter.
    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<(), ModelError>;

    /// Run every replication to completion in simulated time.
    fn run(&mut self, control: &RunControl) -> Result<(), ModelError>;

    /// Value of a statistic after a run.
    fn statistic(&self, name: &str) -> Result<Value, ModelError>;

    /// Discard parameters and results.
    fn reset(&mut self);
}
