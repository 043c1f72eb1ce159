//! Closed, versioned set of typed messages carried by envelopes.
//!
//! Every catalog entry has a tag (`"FM.1"`, `"MC.2"`, ...), a direction, and
//! an ordered field schema. [`Message`] pairs routing information with a
//! typed [`MessageBody`]; conversion to and from [`Envelope`] is where the
//! schema is enforced.
//!
//! # Invariants
//!
//! - Tag uniqueness: each [`MessageBody`] variant maps to exactly one
//!   [`MessageType`] and each [`MessageType`] to exactly one tag (enforced by
//!   match exhaustiveness).
//!
//! - Reply correlation: every reply type carries `replyToId` in payload slot
//!   0, exposed through [`MessageBody::reply_to`].
//!
//! - No silent defaults: a message is only constructed when every field is
//!   present with an accepted type and passes its field-level checks.

pub mod model;
pub mod starter;

use std::fmt;

use crate::{
    envelope::{Envelope, EnvelopeHeader},
    errors::{ProtocolError, Result},
    identifier::Identifier,
    value::Value,
};

/// Who sends a catalog entry to whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Orchestrator to process supervisor
    ManagerToStarter,
    /// Orchestrator to a running federate. `RequestStatus` is also sent by
    /// the supervisor while waiting for readiness.
    ManagerToFederate,
    /// Supervisor to a federate, no reply expected
    StarterToFederate,
    /// Any participant to any other
    Any,
    /// Answer to a request; payload slot 0 is `replyToId`
    Reply,
}

/// Accepted wire kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// UTF-8 string
    String,
    /// Boolean
    Bool,
    /// Integer of any width fitting `i32`
    Int32,
    /// `int64` carrying a message id
    MessageId,
    /// Any numeric value, read as `f64`
    Float,
    /// Plain number of seconds or a time quantity
    Time,
    /// Any value except the absent marker
    Any,
}

/// One entry of a message schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Wire field name
    pub name: &'static str,
    /// Accepted kind
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

const REPLY_TO: FieldSpec = field("replyToId", FieldKind::MessageId);

const START_FEDERATE: &[FieldSpec] = &[
    field("instanceId", FieldKind::String),
    field("softwareCode", FieldKind::String),
    field("argsBefore", FieldKind::String),
    field("modelPath", FieldKind::String),
    field("argsAfter", FieldKind::String),
    field("workingDirectory", FieldKind::String),
    field("redirectStdin", FieldKind::String),
    field("redirectStdout", FieldKind::String),
    field("redirectStderr", FieldKind::String),
    field("deleteWorkingDirectory", FieldKind::Bool),
    field("deleteStdout", FieldKind::Bool),
    field("deleteStderr", FieldKind::Bool),
];

const SET_RUN_CONTROL: &[FieldSpec] = &[
    field("runDuration", FieldKind::Time),
    field("warmupDuration", FieldKind::Time),
    field("offsetTime", FieldKind::Time),
    field("speed", FieldKind::Float),
    field("numberReplications", FieldKind::Int32),
    field("numberStreams", FieldKind::Int32),
];

const SET_PARAMETER: &[FieldSpec] =
    &[field("parameterName", FieldKind::String), field("value", FieldKind::Any)];

const INSTANCE_ONLY: &[FieldSpec] = &[field("instanceId", FieldKind::String)];

const REQUEST_STATISTIC: &[FieldSpec] = &[field("variableName", FieldKind::String)];

const FEDERATE_STARTED: &[FieldSpec] = &[
    REPLY_TO,
    field("instanceId", FieldKind::String),
    field("status", FieldKind::String),
    field("modelPort", FieldKind::Int32),
    field("message", FieldKind::String),
];

const FEDERATE_KILLED: &[FieldSpec] = &[
    REPLY_TO,
    field("instanceId", FieldKind::String),
    field("status", FieldKind::Bool),
    field("error", FieldKind::String),
];

const ALL_FEDERATES_KILLED: &[FieldSpec] =
    &[REPLY_TO, field("status", FieldKind::Bool), field("error", FieldKind::String)];

const ACK_NAK: &[FieldSpec] =
    &[REPLY_TO, field("status", FieldKind::Bool), field("message", FieldKind::String)];

const STATUS: &[FieldSpec] =
    &[REPLY_TO, field("status", FieldKind::String), field("error", FieldKind::String)];

const STATISTIC_VALUE: &[FieldSpec] =
    &[REPLY_TO, field("variableName", FieldKind::String), field("value", FieldKind::Any)];

const STATISTIC_ERROR: &[FieldSpec] =
    &[REPLY_TO, field("variableName", FieldKind::String), field("error", FieldKind::String)];

/// Catalog entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// FM.1 launch a federate process
    StartFederate,
    /// FM.2 configure the run
    SetRunControl,
    /// FM.3 set one model parameter
    SetParameter,
    /// FM.4 start the simulation
    StartSimulation,
    /// FM.5 poll simulation status
    RequestStatus,
    /// FM.6 fetch one statistic
    RequestStatistic,
    /// FM.7 reset the model
    Reset,
    /// FM.8 kill one federate process
    KillFederate,
    /// FM.9 kill every federate process
    KillAllFederates,
    /// FS.3 tell a federate to exit
    TerminateFederate,
    /// HB.1 liveness probe
    Heartbeat,
    /// FS.2 answer to `StartFederate`
    FederateStarted,
    /// FS.4 answer to `KillFederate`
    FederateKilled,
    /// FS.5 answer to `KillAllFederates`
    AllFederatesKilled,
    /// MC.1 generic acknowledgement
    AckNak,
    /// MC.2 answer to `RequestStatus`
    Status,
    /// MC.3 statistic found
    StatisticValue,
    /// MC.4 statistic not available
    StatisticError,
}

impl MessageType {
    /// Every catalog entry.
    pub const ALL: [Self; 18] = [
        Self::StartFederate,
        Self::SetRunControl,
        Self::SetParameter,
        Self::StartSimulation,
        Self::RequestStatus,
        Self::RequestStatistic,
        Self::Reset,
        Self::KillFederate,
        Self::KillAllFederates,
        Self::TerminateFederate,
        Self::Heartbeat,
        Self::FederateStarted,
        Self::FederateKilled,
        Self::AllFederatesKilled,
        Self::AckNak,
        Self::Status,
        Self::StatisticValue,
        Self::StatisticError,
    ];

    /// Wire tag.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::StartFederate => "FM.1",
            Self::SetRunControl => "FM.2",
            Self::SetParameter => "FM.3",
            Self::StartSimulation => "FM.4",
            Self::RequestStatus => "FM.5",
            Self::RequestStatistic => "FM.6",
            Self::Reset => "FM.7",
            Self::KillFederate => "FM.8",
            Self::KillAllFederates => "FM.9",
            Self::TerminateFederate => "FS.3",
            Self::Heartbeat => "HB.1",
            Self::FederateStarted => "FS.2",
            Self::FederateKilled => "FS.4",
            Self::AllFederatesKilled => "FS.5",
            Self::AckNak => "MC.1",
            Self::Status => "MC.2",
            Self::StatisticValue => "MC.3",
            Self::StatisticError => "MC.4",
        }
    }

    /// Look up a wire tag. `None` for tags outside the catalog.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Sender and receiver roles.
    pub const fn direction(self) -> Direction {
        match self {
            Self::StartFederate | Self::KillFederate | Self::KillAllFederates => {
                Direction::ManagerToStarter
            },
            Self::SetRunControl
            | Self::SetParameter
            | Self::StartSimulation
            | Self::RequestStatus
            | Self::RequestStatistic
            | Self::Reset => Direction::ManagerToFederate,
            Self::TerminateFederate => Direction::StarterToFederate,
            Self::Heartbeat => Direction::Any,
            Self::FederateStarted
            | Self::FederateKilled
            | Self::AllFederatesKilled
            | Self::AckNak
            | Self::Status
            | Self::StatisticValue
            | Self::StatisticError => Direction::Reply,
        }
    }

    /// Returns true for replies.
    pub const fn is_reply(self) -> bool {
        matches!(self.direction(), Direction::Reply)
    }

    /// Fixed part of the field schema.
    ///
    /// `SetRunControl` is followed by `numberStreams` pairs of
    /// `(streamId, seed)` beyond these six fields.
    pub const fn fields(self) -> &'static [FieldSpec] {
        match self {
            Self::StartFederate => START_FEDERATE,
            Self::SetRunControl => SET_RUN_CONTROL,
            Self::SetParameter => SET_PARAMETER,
            Self::RequestStatistic => REQUEST_STATISTIC,
            Self::KillFederate | Self::TerminateFederate => INSTANCE_ONLY,
            Self::StartSimulation
            | Self::RequestStatus
            | Self::Reset
            | Self::KillAllFederates
            | Self::Heartbeat => &[],
            Self::FederateStarted => FEDERATE_STARTED,
            Self::FederateKilled => FEDERATE_KILLED,
            Self::AllFederatesKilled => ALL_FEDERATES_KILLED,
            Self::AckNak => ACK_NAK,
            Self::Status => STATUS,
            Self::StatisticValue => STATISTIC_VALUE,
            Self::StatisticError => STATISTIC_ERROR,
        }
    }

    /// Payload arity this type expects for the given payload.
    ///
    /// Fixed for every type except `SetRunControl`, whose arity depends on
    /// its `numberStreams` field.
    fn expected_arity(self, payload: &[Value]) -> Result<usize> {
        let fixed = self.fields().len();
        if self != Self::SetRunControl {
            return Ok(fixed);
        }

        let Some(streams) = payload.get(fixed - 1) else {
            return Err(ProtocolError::schema(
                self.tag(),
                format!("expected at least {fixed} fields, got {}", payload.len()),
            ));
        };
        let count = streams
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                ProtocolError::schema(self.tag(), format!("numberStreams must be a count, got {streams}"))
            })?;

        count
            .checked_mul(2)
            .and_then(|pairs| pairs.checked_add(fixed))
            .ok_or_else(|| ProtocolError::schema(self.tag(), "numberStreams overflows"))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Typed payload of a catalog message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    // Supervisor requests
    /// FM.1
    StartFederate(starter::StartFederate),
    /// FM.8
    KillFederate(starter::KillFederate),
    /// FM.9
    KillAllFederates,
    /// FS.3
    TerminateFederate(starter::TerminateFederate),

    // Federate requests
    /// FM.2
    SetRunControl(model::RunControl),
    /// FM.3
    SetParameter(model::SetParameter),
    /// FM.4
    StartSimulation,
    /// FM.5
    RequestStatus,
    /// FM.6
    RequestStatistic(model::RequestStatistic),
    /// FM.7
    Reset,
    /// HB.1
    Heartbeat,

    // Replies
    /// FS.2
    FederateStarted(starter::FederateStarted),
    /// FS.4
    FederateKilled(starter::FederateKilled),
    /// FS.5
    AllFederatesKilled(starter::AllFederatesKilled),
    /// MC.1
    AckNak(model::AckNak),
    /// MC.2
    Status(model::StatusReply),
    /// MC.3
    StatisticValue(model::StatisticValue),
    /// MC.4
    StatisticError(model::StatisticError),
}

impl MessageBody {
    /// Catalog entry of this body.
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::StartFederate(_) => MessageType::StartFederate,
            Self::KillFederate(_) => MessageType::KillFederate,
            Self::KillAllFederates => MessageType::KillAllFederates,
            Self::TerminateFederate(_) => MessageType::TerminateFederate,
            Self::SetRunControl(_) => MessageType::SetRunControl,
            Self::SetParameter(_) => MessageType::SetParameter,
            Self::StartSimulation => MessageType::StartSimulation,
            Self::RequestStatus => MessageType::RequestStatus,
            Self::RequestStatistic(_) => MessageType::RequestStatistic,
            Self::Reset => MessageType::Reset,
            Self::Heartbeat => MessageType::Heartbeat,
            Self::FederateStarted(_) => MessageType::FederateStarted,
            Self::FederateKilled(_) => MessageType::FederateKilled,
            Self::AllFederatesKilled(_) => MessageType::AllFederatesKilled,
            Self::AckNak(_) => MessageType::AckNak,
            Self::Status(_) => MessageType::Status,
            Self::StatisticValue(_) => MessageType::StatisticValue,
            Self::StatisticError(_) => MessageType::StatisticError,
        }
    }

    /// Id of the request this body answers. `None` for requests.
    pub const fn reply_to(&self) -> Option<u64> {
        match self {
            Self::FederateStarted(m) => Some(m.reply_to),
            Self::FederateKilled(m) => Some(m.reply_to),
            Self::AllFederatesKilled(m) => Some(m.reply_to),
            Self::AckNak(m) => Some(m.reply_to),
            Self::Status(m) => Some(m.reply_to),
            Self::StatisticValue(m) => Some(m.reply_to),
            Self::StatisticError(m) => Some(m.reply_to),
            _ => None,
        }
    }

    /// Field-level checks.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::SchemaViolation` naming the offending field
    pub fn check(&self) -> Result<()> {
        match self {
            Self::StartFederate(m) => m.check(),
            Self::KillFederate(m) => m.check(),
            Self::TerminateFederate(m) => m.check(),
            Self::SetRunControl(m) => m.check(),
            Self::SetParameter(m) => m.check(),
            Self::RequestStatistic(m) => m.check(),
            Self::FederateStarted(m) => m.check(),
            Self::FederateKilled(m) => m.check(),
            Self::StatisticValue(m) => m.check(),
            Self::StatisticError(m) => m.check(),
            Self::KillAllFederates
            | Self::StartSimulation
            | Self::RequestStatus
            | Self::Reset
            | Self::Heartbeat
            | Self::AllFederatesKilled(_)
            | Self::AckNak(_)
            | Self::Status(_) => Ok(()),
        }
    }

    /// Payload values in schema order.
    pub fn to_fields(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(self.message_type().fields().len());
        match self {
            Self::StartFederate(m) => m.write(&mut out),
            Self::KillFederate(m) => m.write(&mut out),
            Self::TerminateFederate(m) => m.write(&mut out),
            Self::SetRunControl(m) => m.write(&mut out),
            Self::SetParameter(m) => m.write(&mut out),
            Self::RequestStatistic(m) => m.write(&mut out),
            Self::FederateStarted(m) => m.write(&mut out),
            Self::FederateKilled(m) => m.write(&mut out),
            Self::AllFederatesKilled(m) => m.write(&mut out),
            Self::AckNak(m) => m.write(&mut out),
            Self::Status(m) => m.write(&mut out),
            Self::StatisticValue(m) => m.write(&mut out),
            Self::StatisticError(m) => m.write(&mut out),
            Self::KillAllFederates
            | Self::StartSimulation
            | Self::RequestStatus
            | Self::Reset
            | Self::Heartbeat => {},
        }
        out
    }

    /// Construct a body from payload values already checked for arity.
    fn from_fields(message_type: MessageType, fields: &[Value]) -> Result<Self> {
        let mut reader = FieldReader::new(message_type, fields);
        let body = match message_type {
            MessageType::StartFederate => Self::StartFederate(starter::StartFederate::read(&mut reader)?),
            MessageType::KillFederate => Self::KillFederate(starter::KillFederate::read(&mut reader)?),
            MessageType::KillAllFederates => Self::KillAllFederates,
            MessageType::TerminateFederate => {
                Self::TerminateFederate(starter::TerminateFederate::read(&mut reader)?)
            },
            MessageType::SetRunControl => Self::SetRunControl(model::RunControl::read(&mut reader)?),
            MessageType::SetParameter => Self::SetParameter(model::SetParameter::read(&mut reader)?),
            MessageType::StartSimulation => Self::StartSimulation,
            MessageType::RequestStatus => Self::RequestStatus,
            MessageType::RequestStatistic => {
                Self::RequestStatistic(model::RequestStatistic::read(&mut reader)?)
            },
            MessageType::Reset => Self::Reset,
            MessageType::Heartbeat => Self::Heartbeat,
            MessageType::FederateStarted => {
                Self::FederateStarted(starter::FederateStarted::read(&mut reader)?)
            },
            MessageType::FederateKilled => Self::FederateKilled(starter::FederateKilled::read(&mut reader)?),
            MessageType::AllFederatesKilled => {
                Self::AllFederatesKilled(starter::AllFederatesKilled::read(&mut reader)?)
            },
            MessageType::AckNak => Self::AckNak(model::AckNak::read(&mut reader)?),
            MessageType::Status => Self::Status(model::StatusReply::read(&mut reader)?),
            MessageType::StatisticValue => Self::StatisticValue(model::StatisticValue::read(&mut reader)?),
            MessageType::StatisticError => Self::StatisticError(model::StatisticError::read(&mut reader)?),
        };
        reader.finish()?;
        Ok(body)
    }
}

/// Routing fields shared by every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Federation run
    pub run_id: Identifier,
    /// Sending participant
    pub sender_id: Identifier,
    /// Receiving participant
    pub receiver_id: Identifier,
    /// Sender-assigned id, unique per sender
    pub message_id: u64,
}

/// Routed, typed catalog message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    route: Route,
    body: MessageBody,
}

impl Message {
    /// Validating constructor.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::SchemaViolation` if a field fails its check
    pub fn new(route: Route, body: MessageBody) -> Result<Self> {
        body.check()?;
        Ok(Self { route, body })
    }

    /// Routing fields.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Typed payload.
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Take the typed payload.
    pub fn into_body(self) -> MessageBody {
        self.body
    }

    /// Catalog entry.
    pub const fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    /// Sender-assigned id.
    pub const fn message_id(&self) -> u64 {
        self.route.message_id
    }

    /// Id of the answered request, for replies.
    pub const fn reply_to(&self) -> Option<u64> {
        self.body.reply_to()
    }

    /// Build the wire envelope.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encoding` if the envelope cannot be formed
    pub fn to_envelope(&self) -> Result<Envelope> {
        let header = EnvelopeHeader {
            run_id: self.route.run_id.clone(),
            sender_id: self.route.sender_id.clone(),
            receiver_id: self.route.receiver_id.clone(),
            message_type: self.message_type().tag().to_string(),
            message_id: self.route.message_id,
        };
        Envelope::new(header, self.body.to_fields())
    }

    /// Interpret a decoded envelope addressed to `expected_receiver`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownMessageType` if the tag is not in the catalog
    /// - `ProtocolError::SchemaViolation` on wrong payload arity, a mistyped
    ///   field, or a failed field check
    /// - `ProtocolError::Violation` for an absent element or a receiver
    ///   mismatch
    pub fn from_envelope(envelope: &Envelope, expected_receiver: &Identifier) -> Result<Self> {
        let message_type = MessageType::from_tag(envelope.message_type())
            .ok_or_else(|| ProtocolError::UnknownMessageType(envelope.message_type().to_string()))?;

        let arity = message_type.expected_arity(envelope.payload())?;
        if envelope.field_count() != arity {
            return Err(ProtocolError::schema(
                message_type.tag(),
                format!("expected {arity} fields, got {}", envelope.field_count()),
            ));
        }
        envelope.validate(arity, message_type.tag(), expected_receiver)?;

        let body = MessageBody::from_fields(message_type, envelope.payload())?;
        let header = envelope.header();
        Self::new(
            Route {
                run_id: header.run_id.clone(),
                sender_id: header.sender_id.clone(),
                receiver_id: header.receiver_id.clone(),
                message_id: header.message_id,
            },
            body,
        )
    }

    /// Decode and interpret wire bytes.
    ///
    /// # Errors
    ///
    /// See [`Envelope::decode`] and [`Message::from_envelope`].
    pub fn decode(bytes: &[u8], expected_receiver: &Identifier) -> Result<Self> {
        Self::from_envelope(&Envelope::decode(bytes)?, expected_receiver)
    }
}

/// Per-message field layout.
pub(crate) trait Schema: Sized {
    fn write(&self, out: &mut Vec<Value>);

    fn read(reader: &mut FieldReader<'_>) -> Result<Self>;

    fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// Sequential typed access to payload values.
pub(crate) struct FieldReader<'a> {
    message_type: MessageType,
    fields: &'a [Value],
    index: usize,
}

impl<'a> FieldReader<'a> {
    fn new(message_type: MessageType, fields: &'a [Value]) -> Self {
        Self { message_type, fields, index: 0 }
    }

    pub(crate) fn tag(&self) -> &'static str {
        self.message_type.tag()
    }

    fn mistyped(&self, name: &str, expected: &str, actual: &Value) -> ProtocolError {
        ProtocolError::schema(
            self.tag(),
            format!("field {name} expected {expected}, got {}", actual.kind()),
        )
    }

    pub(crate) fn value(&mut self, name: &str) -> Result<&'a Value> {
        let value = self.fields.get(self.index).ok_or_else(|| {
            ProtocolError::schema(self.message_type.tag(), format!("missing field {name}"))
        })?;
        self.index += 1;
        Ok(value)
    }

    pub(crate) fn string(&mut self, name: &str) -> Result<String> {
        let value = self.value(name)?;
        value.as_str().map(str::to_string).ok_or_else(|| self.mistyped(name, "string", value))
    }

    pub(crate) fn boolean(&mut self, name: &str) -> Result<bool> {
        let value = self.value(name)?;
        value.as_bool().ok_or_else(|| self.mistyped(name, "bool", value))
    }

    pub(crate) fn int32(&mut self, name: &str) -> Result<i32> {
        let value = self.value(name)?;
        value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| self.mistyped(name, "int32", value))
    }

    pub(crate) fn int64(&mut self, name: &str) -> Result<i64> {
        let value = self.value(name)?;
        value.as_i64().ok_or_else(|| self.mistyped(name, "integer", value))
    }

    pub(crate) fn message_id(&mut self, name: &str) -> Result<u64> {
        match self.value(name)? {
            Value::Int64(id) => Ok(*id as u64),
            other => Err(self.mistyped(name, "int64", other)),
        }
    }

    pub(crate) fn float(&mut self, name: &str) -> Result<f64> {
        let value = self.value(name)?;
        match value {
            Value::Quantity32(_) | Value::Quantity64(_) => Err(self.mistyped(name, "number", value)),
            other => other.as_f64().ok_or_else(|| self.mistyped(name, "number", value)),
        }
    }

    pub(crate) fn time(&mut self, name: &str) -> Result<model::SimTime> {
        let value = self.value(name)?;
        model::SimTime::from_value(value.clone())
            .ok_or_else(|| self.mistyped(name, "number or time quantity", value))
    }

    fn finish(&self) -> Result<()> {
        if self.index == self.fields.len() {
            Ok(())
        } else {
            Err(ProtocolError::schema(
                self.tag(),
                format!("{} unread fields", self.fields.len() - self.index),
            ))
        }
    }
}

/// Reject an empty required string.
pub(crate) fn require(tag: &'static str, name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(ProtocolError::schema(tag, format!("field {name} is required")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Check;

    fn route(receiver: &str) -> Route {
        Route {
            run_id: Identifier::from("run"),
            sender_id: Identifier::from("FM"),
            receiver_id: Identifier::from(receiver),
            message_id: 11,
        }
    }

    #[test]
    fn tags_are_unique() {
        for (i, a) in MessageType::ALL.iter().enumerate() {
            for b in &MessageType::ALL[i + 1..] {
                assert_ne!(a.tag(), b.tag());
            }
            assert_eq!(MessageType::from_tag(a.tag()), Some(*a));
        }
    }

    #[test]
    fn replies_reserve_reply_to_slot() {
        for message_type in MessageType::ALL {
            if message_type.is_reply() {
                assert_eq!(message_type.fields()[0].name, "replyToId");
            } else {
                assert!(message_type.fields().iter().all(|f| f.name != "replyToId"));
            }
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        let envelope = Envelope::new(
            EnvelopeHeader {
                run_id: Identifier::from("run"),
                sender_id: Identifier::from("FM"),
                receiver_id: Identifier::from("FS"),
                message_type: "XX.9".to_string(),
                message_id: 1,
            },
            vec![],
        )
        .unwrap();

        let result = Message::from_envelope(&envelope, &Identifier::from("FS"));
        assert_eq!(result, Err(ProtocolError::UnknownMessageType("XX.9".to_string())));
    }

    #[test]
    fn wrong_arity_is_schema_violation() {
        let message = Message::new(
            route("FS"),
            MessageBody::KillFederate(starter::KillFederate { instance_id: "MM1.0".to_string() }),
        )
        .unwrap();
        let envelope = message.to_envelope().unwrap();
        let mut fields = envelope.payload().to_vec();
        fields.push(Value::Bool(true));
        let widened = Envelope::new(envelope.header().clone(), fields).unwrap();

        let result = Message::from_envelope(&widened, &Identifier::from("FS"));
        assert!(matches!(
            result,
            Err(ProtocolError::SchemaViolation { message_type: "FM.8", .. })
        ));
    }

    #[test]
    fn mistyped_field_is_schema_violation() {
        let envelope = Envelope::new(
            EnvelopeHeader {
                run_id: Identifier::from("run"),
                sender_id: Identifier::from("MM1.0"),
                receiver_id: Identifier::from("FM"),
                message_type: "MC.1".to_string(),
                message_id: 2,
            },
            vec![Value::Int64(1), Value::from("yes"), Value::from("")],
        )
        .unwrap();

        let result = Message::from_envelope(&envelope, &Identifier::from("FM"));
        assert_eq!(
            result,
            Err(ProtocolError::SchemaViolation {
                message_type: "MC.1",
                reason: "field status expected bool, got string".to_string(),
            })
        );
    }

    #[test]
    fn receiver_mismatch_is_violation() {
        let message = Message::new(route("FS"), MessageBody::KillAllFederates).unwrap();
        let envelope = message.to_envelope().unwrap();

        let result = Message::from_envelope(&envelope, &Identifier::from("OTHER"));
        assert!(matches!(result, Err(ProtocolError::Violation { check: Check::Receiver, .. })));
    }

    #[test]
    fn reply_to_exposed_for_replies_only() {
        let ack = MessageBody::AckNak(model::AckNak::ok(42));
        assert_eq!(ack.reply_to(), Some(42));
        assert_eq!(MessageBody::RequestStatus.reply_to(), None);
    }

    #[test]
    fn run_control_arity_follows_stream_count() {
        let mut streams = std::collections::BTreeMap::new();
        streams.insert(1, 42);
        streams.insert(2, 7);
        let body = MessageBody::SetRunControl(
            model::RunControl::new(model::SimTime::seconds(100.0), model::SimTime::seconds(0.0))
                .with_streams(streams),
        );
        let message = Message::new(route("MM1.0"), body).unwrap();
        let envelope = message.to_envelope().unwrap();
        assert_eq!(envelope.field_count(), 10);

        let decoded = Message::from_envelope(&envelope, &Identifier::from("MM1.0")).unwrap();
        assert_eq!(decoded, message);

        let mut short = envelope.payload().to_vec();
        short.pop();
        let short = Envelope::new(envelope.header().clone(), short).unwrap();
        assert!(matches!(
            Message::from_envelope(&short, &Identifier::from("MM1.0")),
            Err(ProtocolError::SchemaViolation { message_type: "FM.2", .. })
        ));
    }
}
