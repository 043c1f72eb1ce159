//! Running several federates concurrently.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use simlink_core::{
    Environment, FederateLifecycle, FederateOutcome, FederateSpec, LifecycleConfig,
};
use simlink_proto::Identifier;
use tokio::{sync::Mutex, task::JoinSet};

use crate::{error::ManagerError, runtime::run_lifecycle};

/// Everything needed to run one federation.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Starter router address
    pub starter: SocketAddr,
    /// Identities and poll interval shared by every machine
    pub lifecycle: LifecycleConfig,
    /// One entry per federate, in ordinal order
    pub federates: Vec<FederateSpec>,
}

/// Outcome of every federate, keyed by ordinal.
#[derive(Debug, Clone, Default)]
pub struct FederationReport {
    /// Final state, statistics and error per federate
    pub outcomes: BTreeMap<usize, FederateOutcome>,
}

impl FederationReport {
    /// True when every federate terminated cleanly.
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(FederateOutcome::is_success)
    }

    /// Outcomes that ended in error.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &FederateOutcome)> {
        self.outcomes.iter().filter(|(_, o)| !o.is_success()).map(|(n, o)| (*n, o))
    }
}

/// Fresh run identifier.
pub fn random_run_id(env: &impl Environment) -> Identifier {
    Identifier::from(format!("run-{:016x}", env.random_u64()))
}

/// Run every federate to completion, one task per federate.
///
/// # Errors
///
/// - `ManagerError::Config` if no federate is configured
/// - `ManagerError::Task` if a federate task ends without an outcome
pub async fn run_federation<E: Environment>(
    config: FederationConfig,
    env: E,
) -> Result<FederationReport, ManagerError> {
    if config.federates.is_empty() {
        return Err(ManagerError::Config("no federates configured".to_string()));
    }
    tracing::info!(
        run_id = %config.lifecycle.run_id,
        federates = config.federates.len(),
        "Starting federation"
    );

    let expected = config.federates.len();
    let results: Arc<Mutex<BTreeMap<usize, FederateOutcome>>> = Arc::default();
    let mut tasks = JoinSet::new();
    for (ordinal, spec) in config.federates.into_iter().enumerate() {
        let machine = FederateLifecycle::new(config.lifecycle.clone(), spec);
        let results = Arc::clone(&results);
        let env = env.clone();
        let starter = config.starter;

        tasks.spawn(async move {
            let outcome = run_lifecycle(machine, starter, &env).await;
            tracing::info!(
                ordinal,
                instance_id = %outcome.instance_id,
                state = %outcome.state,
                "Federate finished"
            );
            results.lock().await.insert(ordinal, outcome);
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Federate task failed: {}", e);
        }
    }

    let outcomes = std::mem::take(&mut *results.lock().await);
    if let Some(ordinal) = (0..expected).find(|n| !outcomes.contains_key(n)) {
        return Err(ManagerError::Task { ordinal, reason: "no outcome recorded".to_string() });
    }
    Ok(FederationReport { outcomes })
}
