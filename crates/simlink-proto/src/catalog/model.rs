//! Messages exchanged with a running federate.

use std::{collections::BTreeMap, fmt, str::FromStr};

use super::{FieldReader, MessageType, Schema, require};
use crate::{
    errors::{ProtocolError, Result},
    value::{Quantity, Value},
};

/// Simulation time or duration: a plain number of seconds or a time
/// quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct SimTime(Value);

impl SimTime {
    /// Plain seconds.
    pub fn seconds(seconds: f64) -> Self {
        Self(Value::Float64(seconds))
    }

    /// Time quantity. `None` if the unit is not a time unit.
    pub fn quantity(quantity: Quantity<f64>) -> Option<Self> {
        quantity.as_seconds()?;
        Some(Self(Value::Quantity64(quantity)))
    }

    /// Accept a numeric value or a quantity with a time unit.
    pub fn from_value(value: Value) -> Option<Self> {
        let ok = match &value {
            Value::Quantity32(q) => q.as_seconds().is_some(),
            Value::Quantity64(q) => q.as_seconds().is_some(),
            Value::Int8(_)
            | Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::Float32(_)
            | Value::Float64(_) => true,
            Value::Absent | Value::Bool(_) | Value::String(_) => false,
        };
        ok.then_some(Self(value))
    }

    /// Value in seconds.
    pub fn as_seconds(&self) -> f64 {
        let seconds = match &self.0 {
            Value::Quantity32(q) => q.as_seconds(),
            Value::Quantity64(q) => q.as_seconds(),
            other => other.as_f64(),
        };
        seconds.unwrap_or(f64::NAN)
    }

    /// Wire value.
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::Quantity32(_) | Value::Quantity64(_) => write!(f, "{}", self.0),
            other => write!(f, "{other} s"),
        }
    }
}

/// FM.2: run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunControl {
    /// Simulated time to run each replication
    pub run_duration: SimTime,
    /// Simulated time discarded before statistics are collected
    pub warmup_duration: SimTime,
    /// Simulated start time
    pub offset_time: SimTime,
    /// Simulated seconds per wall-clock second; infinity runs unpaced
    pub speed: f64,
    /// Number of replications, at least one
    pub number_replications: i32,
    /// Seed per random stream id
    pub streams: BTreeMap<i32, i64>,
}

impl RunControl {
    /// Single unpaced replication starting at time zero with no streams.
    pub fn new(run_duration: SimTime, warmup_duration: SimTime) -> Self {
        Self {
            run_duration,
            warmup_duration,
            offset_time: SimTime::seconds(0.0),
            speed: f64::INFINITY,
            number_replications: 1,
            streams: BTreeMap::new(),
        }
    }

    /// Set the start time.
    #[must_use]
    pub fn with_offset(mut self, offset_time: SimTime) -> Self {
        self.offset_time = offset_time;
        self
    }

    /// Set the pacing.
    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Set the replication count.
    #[must_use]
    pub fn with_replications(mut self, number_replications: i32) -> Self {
        self.number_replications = number_replications;
        self
    }

    /// Set the stream seeds.
    #[must_use]
    pub fn with_streams(mut self, streams: BTreeMap<i32, i64>) -> Self {
        self.streams = streams;
        self
    }
}

impl Schema for RunControl {
    fn write(&self, out: &mut Vec<Value>) {
        out.extend([
            self.run_duration.value().clone(),
            self.warmup_duration.value().clone(),
            self.offset_time.value().clone(),
            Value::Float64(self.speed),
            Value::Int32(self.number_replications),
            Value::Int32(self.streams.len() as i32),
        ]);
        for (stream, seed) in &self.streams {
            out.push(Value::Int32(*stream));
            out.push(Value::Int64(*seed));
        }
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        let run_duration = reader.time("runDuration")?;
        let warmup_duration = reader.time("warmupDuration")?;
        let offset_time = reader.time("offsetTime")?;
        let speed = reader.float("speed")?;
        let number_replications = reader.int32("numberReplications")?;
        let count = reader.int32("numberStreams")?;

        let mut streams = BTreeMap::new();
        for _ in 0..count {
            let stream = reader.int32("streamId")?;
            let seed = reader.int64("seed")?;
            if streams.insert(stream, seed).is_some() {
                return Err(ProtocolError::schema(
                    reader.tag(),
                    format!("stream {stream} listed twice"),
                ));
            }
        }

        Ok(Self {
            run_duration,
            warmup_duration,
            offset_time,
            speed,
            number_replications,
            streams,
        })
    }

    fn check(&self) -> Result<()> {
        let tag = MessageType::SetRunControl.tag();
        for (name, time) in [
            ("runDuration", &self.run_duration),
            ("warmupDuration", &self.warmup_duration),
        ] {
            let seconds = time.as_seconds();
            if seconds.is_nan() || seconds < 0.0 {
                return Err(ProtocolError::schema(
                    tag,
                    format!("{name} must be non-negative, got {time}"),
                ));
            }
        }
        if self.offset_time.as_seconds().is_nan() {
            return Err(ProtocolError::schema(tag, "offsetTime is not a number"));
        }
        if self.speed.is_nan() || self.speed <= 0.0 {
            return Err(ProtocolError::schema(
                tag,
                format!("speed must be positive, got {}", self.speed),
            ));
        }
        if self.number_replications < 1 {
            return Err(ProtocolError::schema(
                tag,
                format!("numberReplications must be at least 1, got {}", self.number_replications),
            ));
        }
        if i32::try_from(self.streams.len()).is_err() {
            return Err(ProtocolError::schema(tag, "too many streams"));
        }
        Ok(())
    }
}

/// FM.3: set one model parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SetParameter {
    /// Parameter name
    pub name: String,
    /// New value
    pub value: Value,
}

impl SetParameter {
    /// Create a parameter assignment.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

impl Schema for SetParameter {
    fn write(&self, out: &mut Vec<Value>) {
        out.extend([Value::from(self.name.as_str()), self.value.clone()]);
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self { name: reader.string("parameterName")?, value: reader.value("value")?.clone() })
    }

    fn check(&self) -> Result<()> {
        let tag = MessageType::SetParameter.tag();
        require(tag, "parameterName", &self.name)?;
        if self.value.is_absent() {
            return Err(ProtocolError::schema(tag, "field value is required"));
        }
        Ok(())
    }
}

/// FM.6: fetch one statistic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestStatistic {
    /// Statistic name
    pub variable_name: String,
}

impl Schema for RequestStatistic {
    fn write(&self, out: &mut Vec<Value>) {
        out.push(Value::from(self.variable_name.as_str()));
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self { variable_name: reader.string("variableName")? })
    }

    fn check(&self) -> Result<()> {
        require(MessageType::RequestStatistic.tag(), "variableName", &self.variable_name)
    }
}

/// MC.1: acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckNak {
    /// Id of the acknowledged request
    pub reply_to: u64,
    /// Request accepted
    pub status: bool,
    /// Failure text, empty on success
    pub message: String,
}

impl AckNak {
    /// Positive acknowledgement.
    pub fn ok(reply_to: u64) -> Self {
        Self { reply_to, status: true, message: String::new() }
    }

    /// Negative acknowledgement.
    pub fn nak(reply_to: u64, message: impl Into<String>) -> Self {
        Self { reply_to, status: false, message: message.into() }
    }
}

impl Schema for AckNak {
    fn write(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::Int64(self.reply_to as i64),
            Value::Bool(self.status),
            Value::from(self.message.as_str()),
        ]);
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            reply_to: reader.message_id("replyToId")?,
            status: reader.boolean("status")?,
            message: reader.string("message")?,
        })
    }
}

/// Simulation state reported by a federate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationStatus {
    /// Ready, not yet running
    Started,
    /// Simulation in progress
    Running,
    /// Simulation finished; statistics available
    Ended,
    /// Simulation failed
    Error,
}

impl SimulationStatus {
    /// Wire string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Running => "running",
            Self::Ended => "ended",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimulationStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "started" => Ok(Self::Started),
            "running" => Ok(Self::Running),
            "ended" => Ok(Self::Ended),
            "error" => Ok(Self::Error),
            other => Err(ProtocolError::schema(
                MessageType::Status.tag(),
                format!("status must be started, running, ended or error, got {other:?}"),
            )),
        }
    }
}

/// MC.2: answer to a status request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReply {
    /// Id of the status request
    pub reply_to: u64,
    /// Current state
    pub status: SimulationStatus,
    /// Failure text for [`SimulationStatus::Error`]
    pub error: String,
}

impl StatusReply {
    /// Status without error text.
    pub fn new(reply_to: u64, status: SimulationStatus) -> Self {
        Self { reply_to, status, error: String::new() }
    }
}

impl Schema for StatusReply {
    fn write(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::Int64(self.reply_to as i64),
            Value::from(self.status.as_str()),
            Value::from(self.error.as_str()),
        ]);
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            reply_to: reader.message_id("replyToId")?,
            status: reader.string("status")?.parse()?,
            error: reader.string("error")?,
        })
    }
}

/// MC.3: statistic found.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticValue {
    /// Id of the statistic request
    pub reply_to: u64,
    /// Statistic name from the request
    pub variable_name: String,
    /// Statistic value
    pub value: Value,
}

impl Schema for StatisticValue {
    fn write(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::Int64(self.reply_to as i64),
            Value::from(self.variable_name.as_str()),
            self.value.clone(),
        ]);
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            reply_to: reader.message_id("replyToId")?,
            variable_name: reader.string("variableName")?,
            value: reader.value("value")?.clone(),
        })
    }

    fn check(&self) -> Result<()> {
        let tag = MessageType::StatisticValue.tag();
        require(tag, "variableName", &self.variable_name)?;
        if self.value.is_absent() {
            return Err(ProtocolError::schema(tag, "field value is required"));
        }
        Ok(())
    }
}

/// MC.4: statistic not available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticError {
    /// Id of the statistic request
    pub reply_to: u64,
    /// Statistic name from the request
    pub variable_name: String,
    /// Why the statistic is unavailable
    pub error: String,
}

impl Schema for StatisticError {
    fn write(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::Int64(self.reply_to as i64),
            Value::from(self.variable_name.as_str()),
            Value::from(self.error.as_str()),
        ]);
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            reply_to: reader.message_id("replyToId")?,
            variable_name: reader.string("variableName")?,
            error: reader.string("error")?,
        })
    }

    fn check(&self) -> Result<()> {
        require(MessageType::StatisticError.tag(), "variableName", &self.variable_name)
    }
}
