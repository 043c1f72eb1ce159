//! Messages exchanged with the process supervisor.

use std::{fmt, str::FromStr};

use super::{FieldReader, MessageType, Schema, require};
use crate::{
    errors::{ProtocolError, Result},
    value::Value,
};

/// FM.1: launch a federate process.
///
/// Empty strings mean "not set" for the optional fields (`argsBefore`,
/// `modelPath`, `argsAfter`, `workingDirectory`, redirections).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartFederate {
    /// Identity the federate will answer to
    pub instance_id: String,
    /// Alias resolved through the supervisor's software table
    pub software_code: String,
    /// Arguments placed before the model path
    pub args_before: String,
    /// Model file handed to the executable
    pub model_path: String,
    /// Arguments after the model path; `%PORT%` is replaced with the
    /// allocated port
    pub args_after: String,
    /// Working directory, created if absent
    pub working_directory: String,
    /// File fed to stdin
    pub redirect_stdin: String,
    /// File receiving stdout
    pub redirect_stdout: String,
    /// File receiving stderr
    pub redirect_stderr: String,
    /// Remove the working directory on kill
    pub delete_working_directory: bool,
    /// Remove the stdout file on kill
    pub delete_stdout: bool,
    /// Remove the stderr file on kill
    pub delete_stderr: bool,
}

impl StartFederate {
    /// Start request with only the required fields set.
    pub fn new(instance_id: impl Into<String>, software_code: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            software_code: software_code.into(),
            ..Self::default()
        }
    }
}

impl Schema for StartFederate {
    fn write(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::from(self.instance_id.as_str()),
            Value::from(self.software_code.as_str()),
            Value::from(self.args_before.as_str()),
            Value::from(self.model_path.as_str()),
            Value::from(self.args_after.as_str()),
            Value::from(self.working_directory.as_str()),
            Value::from(self.redirect_stdin.as_str()),
            Value::from(self.redirect_stdout.as_str()),
            Value::from(self.redirect_stderr.as_str()),
            Value::Bool(self.delete_working_directory),
            Value::Bool(self.delete_stdout),
            Value::Bool(self.delete_stderr),
        ]);
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            instance_id: reader.string("instanceId")?,
            software_code: reader.string("softwareCode")?,
            args_before: reader.string("argsBefore")?,
            model_path: reader.string("modelPath")?,
            args_after: reader.string("argsAfter")?,
            working_directory: reader.string("workingDirectory")?,
            redirect_stdin: reader.string("redirectStdin")?,
            redirect_stdout: reader.string("redirectStdout")?,
            redirect_stderr: reader.string("redirectStderr")?,
            delete_working_directory: reader.boolean("deleteWorkingDirectory")?,
            delete_stdout: reader.boolean("deleteStdout")?,
            delete_stderr: reader.boolean("deleteStderr")?,
        })
    }

    fn check(&self) -> Result<()> {
        let tag = MessageType::StartFederate.tag();
        require(tag, "instanceId", &self.instance_id)?;
        require(tag, "softwareCode", &self.software_code)
    }
}

/// FM.8: kill one federate process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillFederate {
    /// Instance to kill
    pub instance_id: String,
}

impl Schema for KillFederate {
    fn write(&self, out: &mut Vec<Value>) {
        out.push(Value::from(self.instance_id.as_str()));
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self { instance_id: reader.string("instanceId")? })
    }

    fn check(&self) -> Result<()> {
        require(MessageType::KillFederate.tag(), "instanceId", &self.instance_id)
    }
}

/// FS.3: one-way request asking a federate to exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminateFederate {
    /// Instance that should exit
    pub instance_id: String,
}

impl Schema for TerminateFederate {
    fn write(&self, out: &mut Vec<Value>) {
        out.push(Value::from(self.instance_id.as_str()));
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self { instance_id: reader.string("instanceId")? })
    }

    fn check(&self) -> Result<()> {
        require(MessageType::TerminateFederate.tag(), "instanceId", &self.instance_id)
    }
}

/// Outcome carried by [`FederateStarted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    /// Process launched and, in model-controller mode, reported ready
    Started,
    /// Launch failed; see the message
    Error,
}

impl StartStatus {
    /// Wire string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StartStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "started" => Ok(Self::Started),
            "error" => Ok(Self::Error),
            other => Err(ProtocolError::schema(
                MessageType::FederateStarted.tag(),
                format!("status must be started or error, got {other:?}"),
            )),
        }
    }
}

/// FS.2: answer to [`StartFederate`].
///
/// Exactly one is sent per start request. `model_port` is always the
/// allocated port, even on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederateStarted {
    /// Id of the start request
    pub reply_to: u64,
    /// Instance from the request
    pub instance_id: String,
    /// Launch outcome
    pub status: StartStatus,
    /// Port assigned to the federate
    pub model_port: u16,
    /// Empty on success, failure text otherwise
    pub message: String,
}

impl FederateStarted {
    /// Successful start.
    pub fn started(reply_to: u64, instance_id: impl Into<String>, model_port: u16) -> Self {
        Self {
            reply_to,
            instance_id: instance_id.into(),
            status: StartStatus::Started,
            model_port,
            message: String::new(),
        }
    }

    /// Failed start.
    pub fn error(
        reply_to: u64,
        instance_id: impl Into<String>,
        model_port: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            reply_to,
            instance_id: instance_id.into(),
            status: StartStatus::Error,
            model_port,
            message: message.into(),
        }
    }
}

impl Schema for FederateStarted {
    fn write(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::Int64(self.reply_to as i64),
            Value::from(self.instance_id.as_str()),
            Value::from(self.status.as_str()),
            Value::Int32(i32::from(self.model_port)),
            Value::from(self.message.as_str()),
        ]);
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        let reply_to = reader.message_id("replyToId")?;
        let instance_id = reader.string("instanceId")?;
        let status = reader.string("status")?.parse()?;
        let port = reader.int32("modelPort")?;
        let model_port = u16::try_from(port).map_err(|_| {
            ProtocolError::schema(reader.tag(), format!("modelPort {port} outside 0..=65535"))
        })?;
        let message = reader.string("message")?;

        Ok(Self { reply_to, instance_id, status, model_port, message })
    }

    fn check(&self) -> Result<()> {
        require(MessageType::FederateStarted.tag(), "instanceId", &self.instance_id)
    }
}

/// FS.4: answer to [`KillFederate`].
///
/// `status` is true when the process is confirmed gone and its registration
/// removed. `error` carries any failure text independently of `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederateKilled {
    /// Id of the kill request
    pub reply_to: u64,
    /// Instance from the request
    pub instance_id: String,
    /// Process reclaimed
    pub status: bool,
    /// Failure text, empty when clean
    pub error: String,
}

impl Schema for FederateKilled {
    fn write(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::Int64(self.reply_to as i64),
            Value::from(self.instance_id.as_str()),
            Value::Bool(self.status),
            Value::from(self.error.as_str()),
        ]);
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            reply_to: reader.message_id("replyToId")?,
            instance_id: reader.string("instanceId")?,
            status: reader.boolean("status")?,
            error: reader.string("error")?,
        })
    }

    fn check(&self) -> Result<()> {
        require(MessageType::FederateKilled.tag(), "instanceId", &self.instance_id)
    }
}

/// FS.5: answer to kill-all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllFederatesKilled {
    /// Id of the kill-all request
    pub reply_to: u64,
    /// Every instance reclaimed
    pub status: bool,
    /// Collected failure text
    pub error: String,
}

impl Schema for AllFederatesKilled {
    fn write(&self, out: &mut Vec<Value>) {
        out.extend([
            Value::Int64(self.reply_to as i64),
            Value::Bool(self.status),
            Value::from(self.error.as_str()),
        ]);
    }

    fn read(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            reply_to: reader.message_id("replyToId")?,
            status: reader.boolean("status")?,
            error: reader.string("error")?,
        })
    }
}
