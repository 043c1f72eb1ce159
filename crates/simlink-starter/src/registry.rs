//! Registered federate instances.

use std::collections::{HashMap, HashSet};

use simlink_proto::{Identifier, StartFederate};
use tokio::{process::Child, task::JoinHandle};

use crate::{error::StarterError, launcher::LaunchPlan};

/// Process state of a registered instance.
#[derive(Debug)]
pub enum ProcessState {
    /// Registered; the launch task has not recorded a result yet
    Launching,
    /// Spawned and not yet reaped
    Running(Child),
    /// Taken by a kill in progress
    Terminating,
    /// Spawn failed, or the process exited on its own
    Gone(String),
}

impl ProcessState {
    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Launching => "LAUNCHING",
            Self::Running(_) => "RUNNING",
            Self::Terminating => "TERMINATING",
            Self::Gone(_) => "GONE",
        }
    }
}

/// One started federate.
#[derive(Debug)]
pub struct FederateInstance {
    /// Run the instance was started for
    pub run_id: Identifier,
    /// Original start request
    pub request: StartFederate,
    /// Allocated port
    pub port: u16,
    /// Resolved launch
    pub plan: LaunchPlan,
    /// Process state
    pub process: ProcessState,
    /// Background launch task, taken by whoever waits for it
    pub launch: Option<JoinHandle<()>>,
}

impl FederateInstance {
    /// Registered instance whose launch has not been dispatched yet.
    pub fn new(run_id: Identifier, request: StartFederate, port: u16, plan: LaunchPlan) -> Self {
        Self { run_id, request, port, plan, process: ProcessState::Launching, launch: None }
    }
}

/// Instances keyed by instance id.
#[derive(Debug, Default)]
pub struct Registry {
    instances: HashMap<String, FederateInstance>,
}

impl Registry {
    /// Add an instance.
    ///
    /// # Errors
    ///
    /// - `StarterError::DuplicateInstance` if the id is already registered
    pub fn register(&mut self, instance: FederateInstance) -> Result<(), StarterError> {
        let id = instance.request.instance_id.clone();
        if self.instances.contains_key(&id) {
            return Err(StarterError::DuplicateInstance(id));
        }
        self.instances.insert(id, instance);
        Ok(())
    }

    /// Whether `instance_id` is registered.
    pub fn contains(&self, instance_id: &str) -> bool {
        self.instances.contains_key(instance_id)
    }

    /// Mutable access to one instance.
    pub fn get_mut(&mut self, instance_id: &str) -> Option<&mut FederateInstance> {
        self.instances.get_mut(instance_id)
    }

    /// Drop an instance.
    pub fn remove(&mut self, instance_id: &str) -> Option<FederateInstance> {
        self.instances.remove(instance_id)
    }

    /// Ports held by registered instances.
    pub fn ports(&self) -> HashSet<u16> {
        self.instances.values().map(|i| i.port).collect()
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Record the launch outcome unless a kill already took the instance.
    ///
    /// Returns the child back when it can no longer be recorded so the
    /// caller can reclaim it.
    pub fn record_launch(&mut self, instance_id: &str, result: Result<Child, String>) -> Option<Child> {
        match (self.instances.get_mut(instance_id), result) {
            (Some(instance), Ok(child)) if matches!(instance.process, ProcessState::Launching) => {
                instance.process = ProcessState::Running(child);
                None
            },
            (Some(instance), Err(reason)) if matches!(instance.process, ProcessState::Launching) => {
                instance.process = ProcessState::Gone(reason);
                None
            },
            (_, Ok(child)) => Some(child),
            (_, Err(_)) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn instance(id: &str, port: u16) -> FederateInstance {
        let request = StartFederate::new(id, "mm1");
        let software = HashMap::from([("mm1".to_string(), PathBuf::from("/bin/true"))]);
        let plan = LaunchPlan::new(&request, &software, port).unwrap();
        FederateInstance::new(Identifier::from("run"), request, port, plan)
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut registry = Registry::default();
        registry.register(instance("MM1.0", 5000)).unwrap();

        let result = registry.register(instance("MM1.0", 5001));

        assert!(matches!(result, Err(StarterError::DuplicateInstance(id)) if id == "MM1.0"));
        assert_eq!(registry.ports(), HashSet::from([5000]));
    }

    #[test]
    fn launch_failure_recorded_as_gone() {
        let mut registry = Registry::default();
        registry.register(instance("MM1.0", 5000)).unwrap();

        registry.record_launch("MM1.0", Err("spawn failed".to_string()));

        let state = &registry.get_mut("MM1.0").unwrap().process;
        assert!(matches!(state, ProcessState::Gone(reason) if reason == "spawn failed"));
    }

    #[test]
    fn ids_sorted() {
        let mut registry = Registry::default();
        registry.register(instance("b", 5001)).unwrap();
        registry.register(instance("a", 5000)).unwrap();

        assert_eq!(registry.ids(), vec!["a", "b"]);
    }
}
