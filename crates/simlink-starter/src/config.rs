//! Starter configuration.

use std::{
    collections::HashMap,
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

use simlink_core::DEFAULT_POLL_INTERVAL;
use simlink_proto::Identifier;

use crate::error::StarterError;

/// Wait between the terminate notice and the forced kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(1);

/// Longest wait for a model controller to report ready.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How a launched process is considered started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchMode {
    /// Poll the process with status requests until it reports "started"
    #[default]
    ModelController,
    /// Report success right after dispatching the launch
    Bare,
}

/// Process supervisor configuration.
#[derive(Debug, Clone)]
pub struct StarterConfig {
    /// Router endpoint address
    pub bind: SocketAddr,
    /// First port handed to federates
    pub start_port: u16,
    /// Last port handed to federates (inclusive)
    pub end_port: u16,
    /// Software alias to executable path
    pub software: HashMap<String, PathBuf>,
    /// Readiness policy
    pub mode: LaunchMode,
    /// Identity replies are sent from
    pub starter_id: Identifier,
    /// Wait between readiness polls
    pub poll_interval: Duration,
    /// Wait between the terminate notice and the forced kill
    pub kill_grace: Duration,
    /// Longest wait for readiness
    pub startup_timeout: Duration,
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5555)),
            start_port: 5000,
            end_port: 5100,
            software: HashMap::new(),
            mode: LaunchMode::default(),
            starter_id: Identifier::from("FS"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            kill_grace: DEFAULT_KILL_GRACE,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl StarterConfig {
    /// Reject unusable settings.
    ///
    /// # Errors
    ///
    /// - `StarterError::Config` for an empty port range
    pub fn validate(&self) -> Result<(), StarterError> {
        if self.start_port > self.end_port {
            return Err(StarterError::Config(format!(
                "port range {}..={} is empty",
                self.start_port, self.end_port
            )));
        }
        Ok(())
    }

    /// Register a software alias.
    #[must_use]
    pub fn with_software(mut self, alias: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.software.insert(alias.into(), path.into());
        self
    }
}

/// Parse an `alias=path` pair.
pub fn parse_software(s: &str) -> Result<(String, PathBuf), String> {
    let (alias, path) = s.split_once('=').ok_or_else(|| format!("expected alias=path, got {s:?}"))?;
    if alias.is_empty() || path.is_empty() {
        return Err(format!("expected alias=path, got {s:?}"));
    }
    Ok((alias.to_string(), PathBuf::from(path)))
}
