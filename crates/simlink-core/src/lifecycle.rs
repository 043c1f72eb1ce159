//! Federate lifecycle state machine.
//!
//! Drives one federate through the ordered request sequence:
//!
//! ```text
//! NotStarted --FM.1--> Started --FM.2--> RunControlSet --FM.3*--> ParametersSet
//!     --FM.4--> SimulatorStarted --FM.5 (poll)--> SimulatorEnded
//!     --FM.6*--> StatisticsGathered --FM.8--> Terminated
//! ```
//!
//! Any failure moves the machine to `Error`, which also issues FM.8 and then
//! finishes. The machine is Sans-IO: it returns [`LifecycleAction`]s and the
//! caller performs the exchange, feeding each reply back through
//! [`FederateLifecycle::handle_reply`].
//!
//! # Invariants
//!
//! - At most one request is outstanding. Every reply must name it in
//!   `replyToId`; any other reply moves the machine to `Error` without
//!   advancing it.
//! - The first failure is the one reported in the outcome.
//! - A machine finishes exactly once.

use std::{collections::BTreeMap, fmt, time::Duration};

use simlink_proto::{
    AckNak, Envelope, FederateKilled, FederateStarted, Identifier, KillFederate, Message,
    MessageBody, MessageType, RequestStatistic, Route, RunControl, SetParameter, SimulationStatus,
    StartFederate, StartStatus, StatisticValue, StatusReply, Value,
};

use crate::{error::LifecycleError, log::LogLevel};

/// Default wait between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle state of one federate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Nothing sent yet
    NotStarted,
    /// Process running and ready
    Started,
    /// Run control accepted
    RunControlSet,
    /// Every parameter accepted
    ParametersSet,
    /// Simulation running
    SimulatorStarted,
    /// Simulation finished
    SimulatorEnded,
    /// Every requested statistic collected
    StatisticsGathered,
    /// Process killed after a clean run
    Terminated,
    /// A step failed
    Error,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Started => "STARTED",
            Self::RunControlSet => "RUN_CONTROL_SET",
            Self::ParametersSet => "PARAMETERS_SET",
            Self::SimulatorStarted => "SIMULATOR_STARTED",
            Self::SimulatorEnded => "SIMULATOR_ENDED",
            Self::StatisticsGathered => "STATISTICS_GATHERED",
            Self::Terminated => "TERMINATED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Identities and timing shared by every machine of a run.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Federation run id stamped on every envelope
    pub run_id: Identifier,
    /// Identity of the manager; replies must be addressed to it
    pub manager_id: Identifier,
    /// Identity of the process supervisor
    pub starter_id: Identifier,
    /// Wait between status polls
    pub poll_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            run_id: Identifier::from("run"),
            manager_id: Identifier::from("FM"),
            starter_id: Identifier::from("FS"),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// What to run on one federate.
#[derive(Debug, Clone, PartialEq)]
pub struct FederateSpec {
    /// Launch request; its instance id names the federate
    pub start: StartFederate,
    /// Run configuration
    pub run_control: RunControl,
    /// Parameters, set in order
    pub parameters: Vec<SetParameter>,
    /// Statistics to collect, in order
    pub statistics: Vec<String>,
}

impl FederateSpec {
    /// Federate instance id.
    pub fn instance_id(&self) -> &str {
        &self.start.instance_id
    }
}

/// Destination of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    /// The process supervisor
    Starter,
    /// The federate, on the port it was assigned at start
    Federate {
        /// Model port from FS.2
        port: u16,
    },
}

/// Final result of one machine.
#[derive(Debug, Clone, PartialEq)]
pub struct FederateOutcome {
    /// Federate instance id
    pub instance_id: String,
    /// `Terminated` or `Error`
    pub state: LifecycleState,
    /// Port the federate was assigned, if the start reply arrived
    pub model_port: Option<u16>,
    /// Collected statistics
    pub statistics: BTreeMap<String, Value>,
    /// Cause of the `Error` transition, or a failed kill
    pub error: Option<LifecycleError>,
}

impl FederateOutcome {
    /// Returns true when the federate ran to completion.
    pub fn is_success(&self) -> bool {
        self.state == LifecycleState::Terminated
    }
}

/// Actions for the caller to execute.
#[derive(Debug, Clone)]
pub enum LifecycleAction {
    /// Send the envelope and feed the reply to
    /// [`FederateLifecycle::handle_reply`]
    Request {
        /// Destination
        peer: Peer,
        /// Encoded request
        envelope: Envelope,
    },

    /// Wait, then call [`FederateLifecycle::handle_wake`]
    Sleep(Duration),

    /// Log a message
    Log {
        /// Severity
        level: LogLevel,
        /// Text
        message: String,
    },

    /// Machine finished; no further actions follow
    Finished(FederateOutcome),
}

/// Which reply the outstanding request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Start,
    RunControl,
    Parameter(usize),
    Simulation,
    Status,
    Statistic(usize),
    Kill,
}

impl Awaiting {
    fn expected(self) -> &'static str {
        match self {
            Self::Start => MessageType::FederateStarted.tag(),
            Self::RunControl | Self::Parameter(_) | Self::Simulation => MessageType::AckNak.tag(),
            Self::Status => MessageType::Status.tag(),
            Self::Statistic(_) => "MC.3/MC.4",
            Self::Kill => MessageType::FederateKilled.tag(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    message_id: u64,
    awaiting: Awaiting,
}

/// Lifecycle state machine for one federate.
#[derive(Debug)]
pub struct FederateLifecycle {
    config: LifecycleConfig,
    spec: FederateSpec,
    state: LifecycleState,
    next_message_id: u64,
    pending: Option<Pending>,
    model_port: Option<u16>,
    statistics: BTreeMap<String, Value>,
    error: Option<LifecycleError>,
    kill_sent: bool,
    finished: bool,
}

impl FederateLifecycle {
    /// Create a machine in `NotStarted`.
    pub fn new(config: LifecycleConfig, spec: FederateSpec) -> Self {
        Self {
            config,
            spec,
            state: LifecycleState::NotStarted,
            next_message_id: 1,
            pending: None,
            model_port: None,
            statistics: BTreeMap::new(),
            error: None,
            kill_sent: false,
            finished: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Federate instance id.
    pub fn instance_id(&self) -> &str {
        self.spec.instance_id()
    }

    /// Returns true once [`LifecycleAction::Finished`] has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Id of the outstanding request, if any.
    pub fn pending_message_id(&self) -> Option<u64> {
        self.pending.map(|p| p.message_id)
    }

    /// Snapshot of the result so far.
    pub fn outcome(&self) -> FederateOutcome {
        FederateOutcome {
            instance_id: self.spec.instance_id().to_string(),
            state: self.state,
            model_port: self.model_port,
            statistics: self.statistics.clone(),
            error: self.error.clone(),
        }
    }

    /// Issue the start request.
    pub fn start(&mut self) -> Vec<LifecycleAction> {
        if self.state != LifecycleState::NotStarted || self.pending.is_some() || self.finished {
            return vec![log(LogLevel::Warn, "start ignored: machine already running")];
        }
        let body = MessageBody::StartFederate(self.spec.start.clone());
        self.send(Peer::Starter, body, Awaiting::Start)
    }

    /// Process a reply frame for the outstanding request.
    pub fn handle_reply(&mut self, frame: &[u8]) -> Vec<LifecycleAction> {
        let Some(pending) = self.pending.take() else {
            return vec![log(LogLevel::Warn, "reply ignored: no request outstanding")];
        };

        let message = match Message::decode(frame, &self.config.manager_id) {
            Ok(message) => message,
            Err(e) => return self.fail(e.into()),
        };

        let received = log(
            LogLevel::Debug,
            format!("recv {} #{}", message.message_type(), message.message_id()),
        );

        let Some(reply_to) = message.reply_to() else {
            return self.fail(LifecycleError::UnexpectedReply {
                expected: pending.awaiting.expected(),
                actual: message.message_type(),
            });
        };
        if reply_to != pending.message_id {
            return self.fail(LifecycleError::Correlation {
                expected: pending.message_id,
                actual: reply_to,
            });
        }

        let actions = match (pending.awaiting, message.into_body()) {
            (Awaiting::Start, MessageBody::FederateStarted(reply)) => self.on_started(reply),
            (Awaiting::RunControl, MessageBody::AckNak(ack)) => self.on_ack(ack, |m| {
                let mut actions = m.transition(LifecycleState::RunControlSet);
                actions.extend(m.next_parameter(0));
                actions
            }),
            (Awaiting::Parameter(index), MessageBody::AckNak(ack)) => {
                self.on_ack(ack, |m| m.next_parameter(index + 1))
            },
            (Awaiting::Simulation, MessageBody::AckNak(ack)) => self.on_ack(ack, |m| {
                let mut actions = m.transition(LifecycleState::SimulatorStarted);
                actions.extend(m.request_status());
                actions
            }),
            (Awaiting::Status, MessageBody::Status(reply)) => self.on_status(reply),
            (Awaiting::Statistic(index), MessageBody::StatisticValue(reply)) => {
                self.on_statistic(index, reply)
            },
            (Awaiting::Statistic(_), MessageBody::StatisticError(reply)) => {
                self.fail(LifecycleError::Remote(format!(
                    "statistic {} unavailable: {}",
                    reply.variable_name, reply.error
                )))
            },
            (Awaiting::Kill, MessageBody::FederateKilled(reply)) => self.on_killed(reply),
            (awaiting, body) => self.fail(LifecycleError::UnexpectedReply {
                expected: awaiting.expected(),
                actual: body.message_type(),
            }),
        };

        let mut all = vec![received];
        all.extend(actions);
        all
    }

    /// Resume status polling after a [`LifecycleAction::Sleep`].
    pub fn handle_wake(&mut self) -> Vec<LifecycleAction> {
        if self.state != LifecycleState::SimulatorStarted || self.pending.is_some() || self.finished {
            return vec![log(LogLevel::Debug, "wake ignored")];
        }
        self.request_status()
    }

    /// The exchange for the outstanding request failed at the transport.
    pub fn handle_transport_failure(&mut self, error: impl fmt::Display) -> Vec<LifecycleAction> {
        self.pending = None;
        self.fail(LifecycleError::Transport(error.to_string()))
    }

    fn on_started(&mut self, reply: FederateStarted) -> Vec<LifecycleAction> {
        self.model_port = Some(reply.model_port);

        if reply.instance_id != self.spec.instance_id() {
            return self.fail(LifecycleError::Remote(format!(
                "start reply names {}, expected {}",
                reply.instance_id,
                self.spec.instance_id()
            )));
        }
        if reply.status != StartStatus::Started {
            return self.fail(LifecycleError::Remote(format!("start failed: {}", reply.message)));
        }

        let mut actions = self.transition(LifecycleState::Started);
        let body = MessageBody::SetRunControl(self.spec.run_control.clone());
        actions.extend(self.send(Peer::Federate { port: reply.model_port }, body, Awaiting::RunControl));
        actions
    }

    fn on_ack(
        &mut self,
        ack: AckNak,
        next: impl FnOnce(&mut Self) -> Vec<LifecycleAction>,
    ) -> Vec<LifecycleAction> {
        if ack.status {
            return next(self);
        }
        let message = if ack.message.is_empty() { "request refused".to_string() } else { ack.message };
        self.fail(LifecycleError::Remote(message))
    }

    fn next_parameter(&mut self, index: usize) -> Vec<LifecycleAction> {
        if let Some(parameter) = self.spec.parameters.get(index) {
            let body = MessageBody::SetParameter(parameter.clone());
            return self.send(self.federate(), body, Awaiting::Parameter(index));
        }

        let mut actions = self.transition(LifecycleState::ParametersSet);
        actions.extend(self.send(self.federate(), MessageBody::StartSimulation, Awaiting::Simulation));
        actions
    }

    fn request_status(&mut self) -> Vec<LifecycleAction> {
        self.send(self.federate(), MessageBody::RequestStatus, Awaiting::Status)
    }

    fn on_status(&mut self, reply: StatusReply) -> Vec<LifecycleAction> {
        match reply.status {
            SimulationStatus::Ended => {
                let mut actions = self.transition(LifecycleState::SimulatorEnded);
                actions.extend(self.next_statistic(0));
                actions
            },
            SimulationStatus::Started | SimulationStatus::Running => {
                vec![LifecycleAction::Sleep(self.config.poll_interval)]
            },
            SimulationStatus::Error => {
                let message = if reply.error.is_empty() {
                    "simulation reported error".to_string()
                } else {
                    reply.error
                };
                self.fail(LifecycleError::Remote(message))
            },
        }
    }

    fn next_statistic(&mut self, index: usize) -> Vec<LifecycleAction> {
        if let Some(name) = self.spec.statistics.get(index) {
            let body = MessageBody::RequestStatistic(RequestStatistic { variable_name: name.clone() });
            return self.send(self.federate(), body, Awaiting::Statistic(index));
        }

        let mut actions = self.transition(LifecycleState::StatisticsGathered);
        actions.extend(self.kill());
        actions
    }

    fn on_statistic(&mut self, index: usize, reply: StatisticValue) -> Vec<LifecycleAction> {
        let requested = self.spec.statistics.get(index).cloned().unwrap_or_default();
        if reply.variable_name != requested {
            return self.fail(LifecycleError::Remote(format!(
                "statistic reply names {}, expected {requested}",
                reply.variable_name
            )));
        }

        self.statistics.insert(reply.variable_name, reply.value);
        self.next_statistic(index + 1)
    }

    fn on_killed(&mut self, reply: FederateKilled) -> Vec<LifecycleAction> {
        let mut actions = Vec::new();
        if reply.status {
            if !reply.error.is_empty() {
                actions.push(log(LogLevel::Warn, format!("kill reported: {}", reply.error)));
            }
            if self.state == LifecycleState::StatisticsGathered {
                actions.extend(self.transition(LifecycleState::Terminated));
            }
        } else {
            let message = format!("kill failed: {}", reply.error);
            actions.push(log(LogLevel::Error, message.clone()));
            self.error.get_or_insert(LifecycleError::Remote(message));
            if self.state != LifecycleState::Error {
                actions.extend(self.transition(LifecycleState::Error));
            }
        }
        actions.extend(self.finish());
        actions
    }

    fn kill(&mut self) -> Vec<LifecycleAction> {
        if self.kill_sent {
            return self.finish();
        }
        self.kill_sent = true;
        let body = MessageBody::KillFederate(KillFederate {
            instance_id: self.spec.instance_id().to_string(),
        });
        self.send(Peer::Starter, body, Awaiting::Kill)
    }

    fn fail(&mut self, error: LifecycleError) -> Vec<LifecycleAction> {
        if self.finished {
            return vec![log(LogLevel::Debug, format!("{} already finished: {error}", self.instance_id()))];
        }
        let mut actions =
            vec![log(LogLevel::Error, format!("{} failed in {}: {error}", self.instance_id(), self.state))];
        self.error.get_or_insert(error);
        if self.state != LifecycleState::Error {
            actions.extend(self.transition(LifecycleState::Error));
        }
        actions.extend(self.kill());
        actions
    }

    fn finish(&mut self) -> Vec<LifecycleAction> {
        self.pending = None;
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let outcome = self.outcome();
        vec![
            log(LogLevel::Info, format!("{} finished in {}", self.instance_id(), self.state)),
            LifecycleAction::Finished(outcome),
        ]
    }

    fn transition(&mut self, to: LifecycleState) -> Vec<LifecycleAction> {
        let from = std::mem::replace(&mut self.state, to);
        vec![log(LogLevel::Info, format!("{}: {from} -> {to}", self.instance_id()))]
    }

    fn federate(&self) -> Peer {
        Peer::Federate { port: self.model_port.unwrap_or_default() }
    }

    fn send(&mut self, peer: Peer, body: MessageBody, awaiting: Awaiting) -> Vec<LifecycleAction> {
        let message_id = self.next_message_id;
        self.next_message_id += 1;

        let receiver_id = match peer {
            Peer::Starter => self.config.starter_id.clone(),
            Peer::Federate { .. } => Identifier::from(self.spec.instance_id()),
        };
        let route = Route {
            run_id: self.config.run_id.clone(),
            sender_id: self.config.manager_id.clone(),
            receiver_id,
            message_id,
        };

        match Message::new(route, body).and_then(|m| m.to_envelope()) {
            Ok(envelope) => {
                self.pending = Some(Pending { message_id, awaiting });
                vec![
                    log(LogLevel::Debug, format!("send {} #{message_id}", envelope.message_type())),
                    LifecycleAction::Request { peer, envelope },
                ]
            },
            Err(e) => self.fail(e.into()),
        }
    }
}

fn log(level: LogLevel, message: impl Into<String>) -> LifecycleAction {
    LifecycleAction::Log { level, message: message.into() }
}
