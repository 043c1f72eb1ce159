//! Federate-side protocol handling.
//!
//! [`ModelController`] answers the manager's model requests (FM.2 to FM.7,
//! HB.1) and the starter's status polls and terminate notice on behalf of a
//! [`SimulationModel`]. Like the lifecycle machine it is Sans-IO: every
//! frame yields a list of [`ControllerAction`]s for the runtime to perform.
//!
//! ```text
//! Started --FM.4--> Running --(pacing elapsed)--> Ended
//!    ^                  |
//!    +------FM.7--------+---- model failure --> Error
//! ```

use std::time::Duration;

use simlink_core::LogLevel;
use simlink_proto::{
    AckNak, Envelope, Identifier, Message, MessageBody, Route, RunControl, SimulationStatus,
    StatisticError, StatisticValue, StatusReply,
};

use crate::model::SimulationModel;

/// Work for the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerAction {
    /// Send this envelope back on the connection the request came from
    Reply(Envelope),
    /// Call [`ModelController::handle_elapsed`] after this much wall-clock
    /// time
    Schedule(Duration),
    /// Emit a log line
    Log {
        /// Severity
        level: LogLevel,
        /// Text
        message: String,
    },
    /// Stop serving and exit the process
    Exit,
}

/// Protocol front end of one federate.
pub struct ModelController<M> {
    instance_id: Identifier,
    model: M,
    status: SimulationStatus,
    error: String,
    run_control: Option<RunControl>,
    next_message_id: u64,
}

impl<M: SimulationModel> ModelController<M> {
    /// Controller answering as `instance_id`.
    pub fn new(instance_id: Identifier, model: M) -> Self {
        Self {
            instance_id,
            model,
            status: SimulationStatus::Started,
            error: String::new(),
            run_control: None,
            next_message_id: 1,
        }
    }

    /// Identity requests must be addressed to.
    pub fn instance_id(&self) -> &Identifier {
        &self.instance_id
    }

    /// Current simulation status.
    pub fn status(&self) -> SimulationStatus {
        self.status
    }

    /// The driven model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Process one inbound frame.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Vec<ControllerAction> {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => return vec![log(LogLevel::Warn, format!("dropping undecodable frame: {e}"))],
        };

        let mut actions = vec![log(
            LogLevel::Debug,
            format!(
                "received {} #{} from {}",
                envelope.message_type(),
                envelope.message_id(),
                envelope.sender_id()
            ),
        )];

        let message = match Message::from_envelope(&envelope, &self.instance_id) {
            Ok(message) => message,
            Err(e) => {
                actions.push(log(LogLevel::Warn, format!("rejected request: {e}")));
                let nak = MessageBody::AckNak(AckNak::nak(envelope.message_id(), e.to_string()));
                actions.extend(self.reply(envelope.run_id(), envelope.sender_id(), nak));
                return actions;
            },
        };

        actions.extend(self.handle(&message));
        actions
    }

    /// Pacing delay after FM.4 has elapsed.
    pub fn handle_elapsed(&mut self) -> Vec<ControllerAction> {
        if self.status != SimulationStatus::Running {
            return Vec::new();
        }
        self.status = SimulationStatus::Ended;
        vec![log(LogLevel::Info, format!("{}: simulation ended", self.instance_id))]
    }

    fn handle(&mut self, message: &Message) -> Vec<ControllerAction> {
        let id = message.message_id();
        let route = message.route();
        let mut actions = Vec::new();

        let body = match message.body() {
            MessageBody::SetRunControl(control) => {
                if self.status == SimulationStatus::Running {
                    MessageBody::AckNak(AckNak::nak(id, "simulation is running"))
                } else {
                    self.run_control = Some(control.clone());
                    MessageBody::AckNak(AckNak::ok(id))
                }
            },
            MessageBody::SetParameter(parameter) => {
                match self.model.set_parameter(&parameter.name, &parameter.value) {
                    Ok(()) => MessageBody::AckNak(AckNak::ok(id)),
                    Err(e) => MessageBody::AckNak(AckNak::nak(id, e.to_string())),
                }
            },
            MessageBody::StartSimulation => {
                let (ack, pacing) = self.start_simulation(id);
                if let Some(delay) = pacing {
                    actions.push(ControllerAction::Schedule(delay));
                }
                ack
            },
            MessageBody::RequestStatus => MessageBody::Status(StatusReply {
                reply_to: id,
                status: self.status,
                error: self.error.clone(),
            }),
            MessageBody::RequestStatistic(request) => self.statistic(id, &request.variable_name),
            MessageBody::Reset => {
                self.model.reset();
                self.status = SimulationStatus::Started;
                self.error.clear();
                self.run_control = None;
                actions.push(log(LogLevel::Info, format!("{}: reset", self.instance_id)));
                MessageBody::AckNak(AckNak::ok(id))
            },
            MessageBody::Heartbeat => MessageBody::AckNak(AckNak::ok(id)),
            MessageBody::TerminateFederate(terminate) => {
                if terminate.instance_id == self.instance_id.to_string() {
                    actions.push(log(LogLevel::Info, format!("{}: terminating", self.instance_id)));
                    actions.push(ControllerAction::Exit);
                } else {
                    actions.push(log(
                        LogLevel::Warn,
                        format!("ignoring terminate notice for {}", terminate.instance_id),
                    ));
                }
                return actions;
            },
            other => MessageBody::AckNak(AckNak::nak(
                id,
                format!("{} is not handled by a federate", other.message_type()),
            )),
        };

        actions.extend(self.reply(&route.run_id, &route.sender_id, body));
        actions
    }

    /// Run the model. Returns the acknowledgement and the wall-clock pacing
    /// before the run is reported as ended.
    fn start_simulation(&mut self, id: u64) -> (MessageBody, Option<Duration>) {
        let Some(control) = self.run_control.clone() else {
            return (MessageBody::AckNak(AckNak::nak(id, "run control not set")), None);
        };
        if self.status != SimulationStatus::Started {
            let reason = format!("cannot start a simulation that is {}", self.status);
            return (MessageBody::AckNak(AckNak::nak(id, reason)), None);
        }

        match self.model.run(&control) {
            Ok(()) => {
                self.status = SimulationStatus::Running;
                (MessageBody::AckNak(AckNak::ok(id)), Some(pacing(&control)))
            },
            Err(e) => {
                self.status = SimulationStatus::Error;
                self.error = e.to_string();
                (MessageBody::AckNak(AckNak::nak(id, e.to_string())), None)
            },
        }
    }

    fn statistic(&self, id: u64, name: &str) -> MessageBody {
        let unavailable = |error: String| {
            MessageBody::StatisticError(StatisticError {
                reply_to: id,
                variable_name: name.to_string(),
                error,
            })
        };
        if self.status != SimulationStatus::Ended {
            return unavailable(format!("simulation is {}", self.status));
        }
        match self.model.statistic(name) {
            Ok(value) => MessageBody::StatisticValue(StatisticValue {
                reply_to: id,
                variable_name: name.to_string(),
                value,
            }),
            Err(e) => unavailable(e.to_string()),
        }
    }

    fn reply(
        &mut self,
        run_id: &Identifier,
        receiver: &Identifier,
        body: MessageBody,
    ) -> Vec<ControllerAction> {
        let message_id = self.next_message_id;
        self.next_message_id += 1;
        let route = Route {
            run_id: run_id.clone(),
            sender_id: self.instance_id.clone(),
            receiver_id: receiver.clone(),
            message_id,
        };

        match Message::new(route, body).and_then(|m| m.to_envelope()) {
            Ok(envelope) => vec![ControllerAction::Reply(envelope)],
            Err(e) => vec![log(LogLevel::Error, format!("cannot build reply: {e}"))],
        }
    }
}

/// Wall-clock time a run takes at the requested speed.
fn pacing(control: &RunControl) -> Duration {
    let simulated = control.warmup_duration.as_seconds() + control.run_duration.as_seconds();
    let seconds = simulated * f64::from(control.number_replications.max(1)) / control.speed;
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
}

fn log(level: LogLevel, message: String) -> ControllerAction {
    ControllerAction::Log { level, message }
}

#[cfg(test)]
mod tests {
    use simlink_proto::{
        RequestStatistic, SetParameter, SimTime, TerminateFederate, Value,
    };

    use super::*;
    use crate::mm1::Mm1Model;

    fn controller() -> ModelController<Mm1Model> {
        ModelController::new(Identifier::from("MM1.0"), Mm1Model::new())
    }

    fn request(message_id: u64, body: MessageBody) -> Vec<u8> {
        let route = Route {
            run_id: Identifier::from("run"),
            sender_id: Identifier::from("FM"),
            receiver_id: Identifier::from("MM1.0"),
            message_id,
        };
        Message::new(route, body).unwrap().to_envelope().unwrap().to_bytes().unwrap().to_vec()
    }

    /// Send a request and return the single reply body.
    fn ask(controller: &mut ModelController<Mm1Model>, id: u64, body: MessageBody) -> MessageBody {
        let replies: Vec<_> = controller
            .handle_frame(&request(id, body))
            .into_iter()
            .filter_map(|a| match a {
                ControllerAction::Reply(envelope) => Some(envelope),
                _ => None,
            })
            .collect();
        assert_eq!(replies.len(), 1);
        Message::from_envelope(&replies[0], &Identifier::from("FM")).unwrap().into_body()
    }

    fn acked(body: &MessageBody) -> bool {
        matches!(body, MessageBody::AckNak(AckNak { status: true, .. }))
    }

    fn configure(controller: &mut ModelController<Mm1Model>) {
        let control = RunControl::new(SimTime::seconds(100.0), SimTime::seconds(0.0));
        assert!(acked(&ask(controller, 1, MessageBody::SetRunControl(control))));
        for (n, (name, value)) in
            [("iat", Value::Float64(1.0)), ("servicetime", Value::Float64(0.85)), ("seed", Value::Int32(42))]
                .into_iter()
                .enumerate()
        {
            let body = MessageBody::SetParameter(SetParameter::new(name, value));
            assert!(acked(&ask(controller, 2 + n as u64, body)));
        }
    }

    #[test]
    fn unpaced_run_ends_after_elapsed() {
        let mut controller = controller();
        configure(&mut controller);

        let actions = controller.handle_frame(&request(10, MessageBody::StartSimulation));
        assert!(actions.contains(&ControllerAction::Schedule(Duration::ZERO)));
        assert_eq!(controller.status(), SimulationStatus::Running);

        controller.handle_elapsed();
        assert_eq!(controller.status(), SimulationStatus::Ended);

        let stat = ask(
            &mut controller,
            11,
            MessageBody::RequestStatistic(RequestStatistic { variable_name: "qN.max".to_string() }),
        );
        assert!(matches!(stat, MessageBody::StatisticValue(v) if v.variable_name == "qN.max" && v.reply_to == 11));
    }

    #[test]
    fn unknown_statistic_is_an_error_reply() {
        let mut controller = controller();
        configure(&mut controller);
        controller.handle_frame(&request(10, MessageBody::StartSimulation));
        controller.handle_elapsed();

        let stat = ask(
            &mut controller,
            11,
            MessageBody::RequestStatistic(RequestStatistic { variable_name: "zzz".to_string() }),
        );

        let MessageBody::StatisticError(error) = stat else { panic!("expected MC.4, got {stat:?}") };
        assert_eq!(error.error, "unknown statistic zzz");
    }

    #[test]
    fn status_starts_as_started() {
        let mut controller = controller();

        let status = ask(&mut controller, 1, MessageBody::RequestStatus);

        assert_eq!(status, MessageBody::Status(StatusReply::new(1, SimulationStatus::Started)));
    }

    #[test]
    fn start_without_run_control_is_nacked() {
        let mut controller = controller();

        let reply = ask(&mut controller, 1, MessageBody::StartSimulation);

        assert_eq!(reply, MessageBody::AckNak(AckNak::nak(1, "run control not set")));
        assert_eq!(controller.status(), SimulationStatus::Started);
    }

    #[test]
    fn model_failure_reported_in_status() {
        let mut controller = controller();
        let control = RunControl::new(SimTime::seconds(10.0), SimTime::seconds(0.0));
        ask(&mut controller, 1, MessageBody::SetRunControl(control));

        // No parameters set
        let reply = ask(&mut controller, 2, MessageBody::StartSimulation);
        assert!(!acked(&reply));

        let MessageBody::Status(status) = ask(&mut controller, 3, MessageBody::RequestStatus) else {
            panic!("expected status");
        };
        assert_eq!(status.status, SimulationStatus::Error);
        assert_eq!(status.error, "invalid value for iat: not set");
    }

    #[test]
    fn statistic_before_end_is_unavailable() {
        let mut controller = controller();

        let reply = ask(
            &mut controller,
            1,
            MessageBody::RequestStatistic(RequestStatistic { variable_name: "served".to_string() }),
        );

        assert!(matches!(reply, MessageBody::StatisticError(e) if e.error == "simulation is started"));
    }

    #[test]
    fn reset_returns_to_started() {
        let mut controller = controller();
        configure(&mut controller);
        controller.handle_frame(&request(10, MessageBody::StartSimulation));
        controller.handle_elapsed();

        assert!(acked(&ask(&mut controller, 11, MessageBody::Reset)));
        assert_eq!(controller.status(), SimulationStatus::Started);
        assert!(controller.model().results().is_none());
    }

    #[test]
    fn paced_run_schedules_wall_clock_time() {
        let mut controller = controller();
        let control =
            RunControl::new(SimTime::seconds(100.0), SimTime::seconds(20.0)).with_speed(60.0);
        ask(&mut controller, 1, MessageBody::SetRunControl(control));
        ask(&mut controller, 2, MessageBody::SetParameter(SetParameter::new("iat", 1.0)));
        ask(&mut controller, 3, MessageBody::SetParameter(SetParameter::new("servicetime", 0.5)));

        let actions = controller.handle_frame(&request(4, MessageBody::StartSimulation));

        assert!(actions.contains(&ControllerAction::Schedule(Duration::from_secs(2))));
    }

    #[test]
    fn terminate_notice_exits_without_reply() {
        let mut controller = controller();
        let body = MessageBody::TerminateFederate(TerminateFederate {
            instance_id: "MM1.0".to_string(),
        });

        let actions = controller.handle_frame(&request(1, body));

        assert_eq!(actions.last(), Some(&ControllerAction::Exit));
        assert!(!actions.iter().any(|a| matches!(a, ControllerAction::Reply(_))));
    }

    #[test]
    fn misaddressed_request_is_nacked() {
        let mut controller = ModelController::new(Identifier::from("MM1.1"), Mm1Model::new());

        let actions = controller.handle_frame(&request(5, MessageBody::Heartbeat));

        let Some(ControllerAction::Reply(envelope)) =
            actions.iter().find(|a| matches!(a, ControllerAction::Reply(_)))
        else {
            panic!("expected a reply");
        };
        let reply = Message::from_envelope(envelope, &Identifier::from("FM")).unwrap();
        assert!(matches!(reply.body(), MessageBody::AckNak(AckNak { status: false, reply_to: 5, .. })));
    }

    #[test]
    fn garbage_only_logs() {
        let mut controller = controller();

        let actions = controller.handle_frame(&[0xff, 0x00]);

        assert!(actions.iter().all(|a| matches!(a, ControllerAction::Log { .. })));
    }
}
