//! Request handling for the federate starter.
//!
//! The starter answers three requests: start a federate (FM.1), kill one
//! (FM.8) and kill all of them (FM.9). Each start allocates a port, registers
//! the instance and only then hands the spawn to a background task, so a kill
//! arriving right after a start always finds the registration.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use simlink_core::{Environment, RequestEndpoint, send_one_way};
use simlink_proto::{
    AckNak, AllFederatesKilled, Envelope, FederateKilled, FederateStarted, Identifier, Message,
    MessageBody, ProtocolError, Route, SimulationStatus, StartFederate, TerminateFederate,
};
use tokio::{process::Child, sync::Mutex};

use crate::{
    config::{LaunchMode, StarterConfig},
    error::StarterError,
    launcher::LaunchPlan,
    ports::find_free_port,
    registry::{FederateInstance, ProcessState, Registry},
};

/// Outcome of reclaiming one instance.
#[derive(Debug)]
struct Reclaimed {
    gone: bool,
    errors: Vec<String>,
}

/// Process supervisor.
///
/// Driven by one receive loop; `&mut self` serializes requests. The registry
/// is shared with the background launch tasks.
pub struct Starter<E: Environment> {
    config: StarterConfig,
    env: E,
    registry: Arc<Mutex<Registry>>,
    next_message_id: u64,
}

impl<E: Environment> Starter<E> {
    /// Create a starter with an empty registry.
    pub fn new(config: StarterConfig, env: E) -> Self {
        Self { config, env, registry: Arc::new(Mutex::new(Registry::default())), next_message_id: 1 }
    }

    /// Active configuration.
    pub fn config(&self) -> &StarterConfig {
        &self.config
    }

    /// Registered instance ids, sorted.
    pub async fn instances(&self) -> Vec<String> {
        self.registry.lock().await.ids()
    }

    /// Port allocated to `instance_id`, if registered.
    pub async fn port_of(&self, instance_id: &str) -> Option<u16> {
        self.registry.lock().await.get_mut(instance_id).map(|i| i.port)
    }

    /// Decode one frame and build the reply.
    ///
    /// Frames that fail envelope decoding cannot be answered and are dropped.
    /// Envelopes the catalog rejects are answered with a NAK carrying the
    /// error text.
    pub async fn dispatch(&mut self, frame: &[u8]) -> Option<Envelope> {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Dropping undecodable frame: {}", e);
                return None;
            },
        };
        tracing::debug!(
            message_type = envelope.message_type(),
            message_id = envelope.message_id(),
            sender = %envelope.sender_id(),
            "received"
        );

        let body = match Message::from_envelope(&envelope, &self.config.starter_id) {
            Ok(message) => self.handle(&message).await,
            Err(e) => {
                tracing::warn!(message_id = envelope.message_id(), "Rejected request: {}", e);
                MessageBody::AckNak(AckNak::nak(envelope.message_id(), e.to_string()))
            },
        };

        match self.envelope(envelope.run_id(), envelope.sender_id(), body) {
            Ok(reply) => {
                tracing::debug!(
                    message_type = reply.message_type(),
                    message_id = reply.message_id(),
                    receiver = %reply.receiver_id(),
                    "sending"
                );
                Some(reply)
            },
            Err(e) => {
                tracing::error!("Cannot build reply: {}", e);
                None
            },
        }
    }

    /// Answer one catalog request.
    pub async fn handle(&mut self, message: &Message) -> MessageBody {
        let id = message.message_id();
        let run_id = &message.route().run_id;
        match message.body() {
            MessageBody::StartFederate(request) => {
                MessageBody::FederateStarted(self.start_federate(run_id, id, request).await)
            },
            MessageBody::KillFederate(kill) => {
                MessageBody::FederateKilled(self.kill_federate(id, &kill.instance_id).await)
            },
            MessageBody::KillAllFederates => MessageBody::AllFederatesKilled(self.kill_all(id).await),
            MessageBody::Heartbeat => MessageBody::AckNak(AckNak::ok(id)),
            other => MessageBody::AckNak(AckNak::nak(
                id,
                format!("{} is not handled by the starter", other.message_type()),
            )),
        }
    }

    /// Launch a federate and report the outcome.
    ///
    /// Exactly one reply per request. The port is the allocated one, or 0
    /// when allocation itself failed.
    pub async fn start_federate(
        &mut self,
        run_id: &Identifier,
        reply_to: u64,
        request: &StartFederate,
    ) -> FederateStarted {
        let id = request.instance_id.as_str();
        let (port, registered) = self.register(run_id, request).await;

        let outcome = match registered {
            Ok(plan) => {
                self.dispatch_launch(id, plan).await;
                self.await_ready(run_id, id, port).await
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(instance_id = id, port, "Federate started");
                FederateStarted::started(reply_to, id, port)
            },
            Err(e) => {
                tracing::warn!(instance_id = id, port, "Federate start failed: {}", e);
                FederateStarted::error(reply_to, id, port, e.to_string())
            },
        }
    }

    /// Kill one federate.
    pub async fn kill_federate(&mut self, reply_to: u64, instance_id: &str) -> FederateKilled {
        let (status, error) = match self.reclaim(instance_id).await {
            Ok(reclaimed) => (reclaimed.gone, reclaimed.errors.join("; ")),
            Err(e) => {
                tracing::warn!(instance_id, "Kill failed: {}", e);
                (false, e.to_string())
            },
        };
        FederateKilled { reply_to, instance_id: instance_id.to_string(), status, error }
    }

    /// Kill every registered federate.
    pub async fn kill_all(&mut self, reply_to: u64) -> AllFederatesKilled {
        let ids = self.registry.lock().await.ids();
        tracing::info!("Killing {} federates", ids.len());

        let mut status = true;
        let mut errors = Vec::new();
        for id in ids {
            match self.reclaim(&id).await {
                Ok(reclaimed) => {
                    status &= reclaimed.gone;
                    errors.extend(reclaimed.errors.into_iter().map(|e| format!("{id}: {e}")));
                },
                Err(e) => {
                    status = false;
                    errors.push(format!("{id}: {e}"));
                },
            }
        }
        AllFederatesKilled { reply_to, status, error: errors.join("; ") }
    }

    /// Allocate a port and register the instance.
    async fn register(
        &self,
        run_id: &Identifier,
        request: &StartFederate,
    ) -> (u16, Result<LaunchPlan, StarterError>) {
        let mut registry = self.registry.lock().await;
        if registry.contains(&request.instance_id) {
            return (0, Err(StarterError::DuplicateInstance(request.instance_id.clone())));
        }

        let port = match find_free_port(self.config.start_port, self.config.end_port, &registry.ports())
        {
            Ok(port) => port,
            Err(e) => return (0, Err(e)),
        };

        let registered = LaunchPlan::new(request, &self.config.software, port).and_then(|plan| {
            let instance = FederateInstance::new(run_id.clone(), request.clone(), port, plan.clone());
            registry.register(instance).map(|()| plan)
        });
        (port, registered)
    }

    /// Hand the spawn to a background task that records the child.
    async fn dispatch_launch(&self, instance_id: &str, plan: LaunchPlan) {
        let registry = Arc::clone(&self.registry);
        let id = instance_id.to_string();

        let task = tokio::spawn(async move {
            let result = plan.spawn().await.map_err(|e| match e {
                StarterError::LaunchFailure(reason) => reason,
                other => other.to_string(),
            });
            match &result {
                Ok(child) => tracing::debug!(instance_id = %id, pid = child.id(), "spawned"),
                Err(e) => tracing::warn!(instance_id = %id, "Spawn failed: {}", e),
            }

            let orphan = registry.lock().await.record_launch(&id, result);
            if let Some(mut child) = orphan {
                tracing::warn!(instance_id = %id, "Instance gone before spawn finished, killing");
                if let Err(e) = child.kill().await {
                    tracing::error!(instance_id = %id, "Cannot kill orphaned process: {}", e);
                }
            }
        });

        if let Some(instance) = self.registry.lock().await.get_mut(instance_id) {
            instance.launch = Some(task);
        }
    }

    async fn await_ready(
        &mut self,
        run_id: &Identifier,
        instance_id: &str,
        port: u16,
    ) -> Result<(), StarterError> {
        match self.config.mode {
            LaunchMode::Bare => Ok(()),
            LaunchMode::ModelController => self.poll_ready(run_id, instance_id, port).await,
        }
    }

    /// Poll the federate's status until it reports "started".
    ///
    /// Refused connections and "running"/"ended" statuses are retried every
    /// poll interval. A recorded spawn failure, an early exit, an "error"
    /// status, an unexpected reply or the startup timeout ends the wait.
    async fn poll_ready(
        &mut self,
        run_id: &Identifier,
        instance_id: &str,
        port: u16,
    ) -> Result<(), StarterError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let timeout = self.config.startup_timeout;
        let started = self.env.now();
        let timed_out =
            || StarterError::LaunchFailure(format!("{instance_id} not ready after {timeout:?}"));
        let receiver = Identifier::from(instance_id);
        let mut connection: Option<RequestEndpoint> = None;

        loop {
            if let Some(reason) = self.launch_failure(instance_id).await {
                return Err(StarterError::LaunchFailure(reason));
            }
            let elapsed = self.env.now() - started;
            if elapsed >= timeout {
                return Err(timed_out());
            }

            let mut endpoint = match connection.take() {
                Some(endpoint) => endpoint,
                None => match RequestEndpoint::connect(addr).await {
                    Ok(endpoint) => endpoint,
                    Err(e) if e.is_connection_refused() => {
                        self.env.sleep(self.config.poll_interval).await;
                        continue;
                    },
                    Err(e) => return Err(e.into()),
                },
            };

            let request = self.envelope(run_id, &receiver, MessageBody::RequestStatus)?;
            let frame = tokio::select! {
                frame = endpoint.request(&request) => frame?,
                () = self.env.sleep(timeout.saturating_sub(elapsed)) => return Err(timed_out()),
            };

            match self.readiness(&request, &frame)? {
                SimulationStatus::Started => return Ok(()),
                other => tracing::debug!(instance_id, status = %other, "Federate not ready yet"),
            }
            connection = Some(endpoint);
            self.env.sleep(self.config.poll_interval).await;
        }
    }

    /// Status carried by a reply to a readiness poll.
    fn readiness(&self, request: &Envelope, frame: &[u8]) -> Result<SimulationStatus, StarterError> {
        let reply = Message::decode(frame, &self.config.starter_id)?;
        match reply.body() {
            MessageBody::Status(status) if status.reply_to == request.message_id() => {
                match status.status {
                    SimulationStatus::Error => Err(StarterError::LaunchFailure(format!(
                        "federate reported error: {}",
                        status.error
                    ))),
                    other => Ok(other),
                }
            },
            _ => Err(StarterError::LaunchFailure(format!(
                "unexpected {} in reply to status request {}",
                reply.message_type(),
                request.message_id()
            ))),
        }
    }

    /// Reason the instance can no longer become ready, if any.
    async fn launch_failure(&self, instance_id: &str) -> Option<String> {
        let mut registry = self.registry.lock().await;
        let Some(instance) = registry.get_mut(instance_id) else {
            return Some(format!("{instance_id} was unregistered during launch"));
        };
        match &mut instance.process {
            ProcessState::Gone(reason) => Some(reason.clone()),
            ProcessState::Running(child) => match child.try_wait() {
                Ok(None) => None,
                Ok(Some(status)) => {
                    let reason = format!("process exited with {status}");
                    instance.process = ProcessState::Gone(reason.clone());
                    Some(reason)
                },
                Err(e) => Some(e.to_string()),
            },
            ProcessState::Launching | ProcessState::Terminating => None,
        }
    }

    /// Terminate the process, delete requested files and unregister.
    async fn reclaim(&mut self, instance_id: &str) -> Result<Reclaimed, StarterError> {
        let launch = self
            .registry
            .lock()
            .await
            .get_mut(instance_id)
            .ok_or_else(|| StarterError::UnknownInstance(instance_id.to_string()))?
            .launch
            .take();
        if let Some(task) = launch {
            if let Err(e) = task.await {
                tracing::error!(instance_id, "Launch task failed: {}", e);
            }
        }

        let (child, port, run_id) = {
            let mut registry = self.registry.lock().await;
            let instance = registry
                .get_mut(instance_id)
                .ok_or_else(|| StarterError::UnknownInstance(instance_id.to_string()))?;
            let previous = std::mem::replace(&mut instance.process, ProcessState::Terminating);
            tracing::info!(instance_id, from = previous.name(), "Terminating federate");
            let child = match previous {
                ProcessState::Running(child) => Some(child),
                _ => None,
            };
            (child, instance.port, instance.run_id.clone())
        };

        let mut reclaimed = Reclaimed { gone: true, errors: Vec::new() };
        if let Some(child) = child {
            self.notify_terminate(&run_id, instance_id, port).await;
            if let Err(e) = self.stop(instance_id, child).await {
                reclaimed.gone = false;
                reclaimed.errors.push(e);
            }
        }

        if let Some(instance) = self.registry.lock().await.remove(instance_id) {
            remove_files(&instance).await;
        }
        tracing::info!(instance_id, gone = reclaimed.gone, "Federate unregistered");
        Ok(reclaimed)
    }

    /// Best-effort one-way FS.3 to the federate.
    async fn notify_terminate(&mut self, run_id: &Identifier, instance_id: &str, port: u16) {
        let body = MessageBody::TerminateFederate(TerminateFederate {
            instance_id: instance_id.to_string(),
        });
        let notice = match self.envelope(run_id, &Identifier::from(instance_id), body) {
            Ok(notice) => notice,
            Err(e) => {
                tracing::error!(instance_id, "Cannot build terminate notice: {}", e);
                return;
            },
        };

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        if let Err(e) = send_one_way(addr, &notice).await {
            tracing::debug!(instance_id, port, "Terminate notice not delivered: {}", e);
        }
    }

    /// Wait out the grace period, then force-kill.
    async fn stop(&self, instance_id: &str, mut child: Child) -> Result<(), String> {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            () = self.env.sleep(self.config.kill_grace) => None,
        };

        match exited {
            Some(Ok(status)) => {
                tracing::debug!(instance_id, %status, "exited");
                Ok(())
            },
            Some(Err(e)) => Err(format!("wait failed: {e}")),
            None => {
                tracing::warn!(instance_id, "Still alive after grace period, killing");
                child.kill().await.map_err(|e| format!("kill failed: {e}"))
            },
        }
    }

    /// Next outgoing envelope from this starter.
    fn envelope(
        &mut self,
        run_id: &Identifier,
        receiver: &Identifier,
        body: MessageBody,
    ) -> Result<Envelope, ProtocolError> {
        let message_id = self.next_message_id;
        self.next_message_id += 1;
        let route = Route {
            run_id: run_id.clone(),
            sender_id: self.config.starter_id.clone(),
            receiver_id: receiver.clone(),
            message_id,
        };
        Message::new(route, body)?.to_envelope()
    }
}

/// Delete redirected outputs and the working directory as requested.
async fn remove_files(instance: &FederateInstance) {
    let request = &instance.request;
    let plan = &instance.plan;
    let id = request.instance_id.as_str();

    let files = [(request.delete_stdout, plan.stdout()), (request.delete_stderr, plan.stderr())];
    for path in files.into_iter().filter_map(|(delete, path)| path.filter(|_| delete)) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(instance_id = id, path = %path.display(), "Cannot delete: {}", e);
        }
    }

    if request.delete_working_directory {
        if let Some(dir) = plan.working_dir() {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                tracing::warn!(instance_id = id, path = %dir.display(), "Cannot delete: {}", e);
            }
        }
    }
}
