//! Manager error types.

use thiserror::Error;

/// Errors raised while preparing or running a federation.
///
/// Per-federate failures are not errors here: they end up in that
/// federate's [`simlink_core::FederateOutcome`].
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Command-line or configuration value is unusable
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A federate task ended without reporting an outcome
    #[error("federate {ordinal} task failed: {reason}")]
    Task {
        /// Federate ordinal
        ordinal: usize,
        /// Join failure
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let task = ManagerError::Task { ordinal: 3, reason: "no outcome recorded".to_string() };

        insta::assert_snapshot!(task.to_string(), @"federate 3 task failed: no outcome recorded");
        insta::assert_snapshot!(
            ManagerError::Config("no federates configured".to_string()).to_string(),
            @"invalid configuration: no federates configured"
        );
    }
}
