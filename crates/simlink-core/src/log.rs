//! Log actions emitted by the state machines.

/// Severity of a log action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

impl LogLevel {
    /// Forward a message to `tracing` at this level.
    pub fn emit(self, message: &str) {
        match self {
            Self::Debug => tracing::debug!("{message}"),
            Self::Info => tracing::info!("{message}"),
            Self::Warn => tracing::warn!("{message}"),
            Self::Error => tracing::error!("{message}"),
        }
    }
}
