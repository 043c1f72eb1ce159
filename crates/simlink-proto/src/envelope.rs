//! Envelope: the header + typed payload wrapper of every exchange.
//!
//! Wire layout, each element a tagged [`Value`]:
//!
//! ```text
//! [version][run_id][sender_id][receiver_id][message_type][message_id][field_count][payload..]
//! ```
//!
//! The envelope knows nothing about individual message kinds. The catalog
//! (see [`crate::catalog`]) interprets the payload after [`Envelope::validate`]
//! has passed.

use bytes::{BufMut, Bytes};

use crate::{
    errors::{Check, DecodeError, ProtocolError, Result},
    identifier::Identifier,
    value::Value,
};

/// Version token leading every envelope.
pub const PROTOCOL_VERSION: &str = "SIM02";

/// Fixed header fields of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Federation run this exchange belongs to
    pub run_id: Identifier,
    /// Sending participant
    pub sender_id: Identifier,
    /// Intended receiving participant
    pub receiver_id: Identifier,
    /// Catalog tag, `"<Family>.<Number>"`
    pub message_type: String,
    /// Per-sender monotonic message id
    pub message_id: u64,
}

/// Immutable envelope value.
///
/// # Invariants
///
/// - Arity: `payload().len()` is the field count written to and read from the
///   wire. A count that disagrees with the values present is rejected during
///   [`Envelope::decode`].
///
/// - No absent values on the encode path: [`Envelope::new`] refuses the absent
///   marker. Decoded envelopes may carry one; [`Envelope::validate`] rejects
///   it before interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    header: EnvelopeHeader,
    payload: Vec<Value>,
}

impl Envelope {
    /// Create an envelope from typed fields.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encoding` if a payload element is the absent marker
    ///   or the payload has more than `i32::MAX` fields
    pub fn new(header: EnvelopeHeader, payload: Vec<Value>) -> Result<Self> {
        if let Some(index) = payload.iter().position(Value::is_absent) {
            return Err(ProtocolError::Encoding(format!(
                "payload field {index} of {} is absent",
                header.message_type
            )));
        }

        if i32::try_from(payload.len()).is_err() {
            return Err(ProtocolError::Encoding(format!(
                "payload of {} fields exceeds the field count range",
                payload.len()
            )));
        }

        Ok(Self { header, payload })
    }

    /// Header fields.
    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    /// Payload values in order.
    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    /// Number of payload fields.
    pub fn field_count(&self) -> usize {
        self.payload.len()
    }

    /// Catalog tag.
    pub fn message_type(&self) -> &str {
        &self.header.message_type
    }

    /// Sender-assigned message id.
    pub fn message_id(&self) -> u64 {
        self.header.message_id
    }

    /// Sending participant.
    pub fn sender_id(&self) -> &Identifier {
        &self.header.sender_id
    }

    /// Receiving participant.
    pub fn receiver_id(&self) -> &Identifier {
        &self.header.receiver_id
    }

    /// Federation run id.
    pub fn run_id(&self) -> &Identifier {
        &self.header.run_id
    }

    /// Encode into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encoding` if a string field is too long
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let field_count = i32::try_from(self.payload.len())
            .map_err(|_| ProtocolError::Encoding("payload field count overflow".to_string()))?;

        Value::String(PROTOCOL_VERSION.to_string()).encode(dst)?;
        self.header.run_id.to_value().encode(dst)?;
        self.header.sender_id.to_value().encode(dst)?;
        self.header.receiver_id.to_value().encode(dst)?;
        Value::String(self.header.message_type.clone()).encode(dst)?;
        Value::Int64(self.header.message_id as i64).encode(dst)?;
        Value::Int32(field_count).encode(dst)?;

        for value in &self.payload {
            value.encode(dst)?;
        }

        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Decode an envelope from wire bytes.
    ///
    /// Parsing works on a local cursor over `bytes`; nothing outside the
    /// returned value is touched, so a failed decode has no side effects.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Decoding` on version mismatch, truncation, unknown
    ///   type tags or mistyped header fields
    /// - `ProtocolError::Violation` (`Check::FieldCount`) if bytes remain after
    ///   the declared number of payload fields
    ///
    /// # Security
    ///
    /// - Bounded allocation: the declared field count is untrusted. The payload
    ///   vector is pre-sized to at most one slot per remaining byte, since every
    ///   value occupies at least its tag byte.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut src = bytes;

        let version = Value::decode(&mut src)?;
        if version.as_str() != Some(PROTOCOL_VERSION) {
            return Err(DecodeError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version.to_string(),
            }
            .into());
        }

        let run_id = Identifier::from_value("run_id", &Value::decode(&mut src)?)?;
        let sender_id = Identifier::from_value("sender_id", &Value::decode(&mut src)?)?;
        let receiver_id = Identifier::from_value("receiver_id", &Value::decode(&mut src)?)?;

        let message_type = match Value::decode(&mut src)? {
            Value::String(tag) => tag,
            other => {
                return Err(DecodeError::HeaderField {
                    field: "message_type",
                    actual: other.kind().name(),
                }
                .into());
            },
        };

        let message_id = match Value::decode(&mut src)? {
            Value::Int64(id) => id as u64,
            other => {
                return Err(DecodeError::HeaderField {
                    field: "message_id",
                    actual: other.kind().name(),
                }
                .into());
            },
        };

        let field_count = match Value::decode(&mut src)? {
            Value::Int32(count) => {
                usize::try_from(count).map_err(|_| DecodeError::NegativeFieldCount(count))?
            },
            other => {
                return Err(DecodeError::HeaderField {
                    field: "field_count",
                    actual: other.kind().name(),
                }
                .into());
            },
        };

        let mut payload = Vec::with_capacity(field_count.min(src.len()));
        for _ in 0..field_count {
            payload.push(Value::decode(&mut src)?);
        }

        if !src.is_empty() {
            return Err(ProtocolError::violation(
                Check::FieldCount,
                format!("{field_count} fields"),
                describe_trailing(field_count, src),
            ));
        }

        Ok(Self {
            header: EnvelopeHeader { run_id, sender_id, receiver_id, message_type, message_id },
            payload,
        })
    }

    /// Check this envelope before it is interpreted as a catalog message.
    ///
    /// Checks run in order: payload arity, absent elements, message type,
    /// receiver identity. The first failure is reported.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Violation` naming the failed check with expected and
    ///   observed values
    pub fn validate(
        &self,
        expected_arity: usize,
        expected_type: &str,
        expected_receiver: &Identifier,
    ) -> Result<()> {
        if self.payload.len() != expected_arity {
            return Err(ProtocolError::violation(
                Check::PayloadArity,
                expected_arity,
                self.payload.len(),
            ));
        }

        if let Some(index) = self.payload.iter().position(Value::is_absent) {
            return Err(ProtocolError::violation(Check::AbsentField(index), "a value", "absent"));
        }

        if self.header.message_type != expected_type {
            return Err(ProtocolError::violation(
                Check::MessageType,
                expected_type,
                &self.header.message_type,
            ));
        }

        if &self.header.receiver_id != expected_receiver {
            return Err(ProtocolError::violation(
                Check::Receiver,
                expected_receiver,
                &self.header.receiver_id,
            ));
        }

        Ok(())
    }
}

/// Count whole values past the declared payload for the diagnosis.
fn describe_trailing(field_count: usize, mut rest: &[u8]) -> String {
    let total = rest.len();
    let mut extra = 0usize;
    while !rest.is_empty() {
        if Value::decode(&mut rest).is_err() {
            return format!("{} fields and {total} trailing bytes", field_count + extra);
        }
        extra += 1;
    }
    format!("{} fields", field_count + extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(message_type: &str) -> EnvelopeHeader {
        EnvelopeHeader {
            run_id: Identifier::from("run-1"),
            sender_id: Identifier::from("FM"),
            receiver_id: Identifier::from("FS"),
            message_type: message_type.to_string(),
            message_id: 7,
        }
    }

    #[test]
    fn envelope_round_trip() {
        let envelope =
            Envelope::new(header("FM.8"), vec![Value::String("MM1.0".to_string())]).unwrap();

        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn message_id_keeps_high_bit() {
        let mut h = header("FM.5");
        h.message_id = u64::MAX - 1;
        let envelope = Envelope::new(h, vec![]).unwrap();

        let decoded = Envelope::decode(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.message_id(), u64::MAX - 1);
    }

    #[test]
    fn numeric_identifiers_round_trip() {
        let mut h = header("FM.5");
        h.run_id = Identifier::Number(20_240_101);
        let envelope = Envelope::new(h, vec![]).unwrap();

        let decoded = Envelope::decode(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.run_id(), &Identifier::Number(20_240_101));
    }

    #[test]
    fn new_rejects_absent_field() {
        let result = Envelope::new(header("FM.3"), vec![Value::from("iat"), Value::Absent]);
        assert!(matches!(result, Err(ProtocolError::Encoding(_))));
    }

    #[test]
    fn decode_rejects_wrong_version() {
        let mut buf = Vec::new();
        Value::from("SIM01").encode(&mut buf).unwrap();

        let result = Envelope::decode(&buf);
        assert_eq!(
            result,
            Err(ProtocolError::Decoding(DecodeError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: "\"SIM01\"".to_string(),
            }))
        );
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let envelope = Envelope::new(header("MC.1"), vec![
            Value::Int64(3),
            Value::Bool(true),
            Value::from("ok"),
        ])
        .unwrap();
        let bytes = envelope.to_bytes().unwrap();

        let result = Envelope::decode(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(ProtocolError::Decoding(DecodeError::Truncated { .. }))));
    }

    #[test]
    fn decode_rejects_extra_fields() {
        let envelope = Envelope::new(header("FM.5"), vec![]).unwrap();
        let mut bytes = envelope.to_bytes().unwrap().to_vec();
        Value::Bool(true).encode(&mut bytes).unwrap();

        let result = Envelope::decode(&bytes);
        assert_eq!(
            result,
            Err(ProtocolError::Violation {
                check: Check::FieldCount,
                expected: "0 fields".to_string(),
                actual: "1 fields".to_string(),
            })
        );
    }

    #[test]
    fn decoded_absent_fails_validation() {
        let envelope = Envelope::new(header("FM.6"), vec![Value::from("x")]).unwrap();
        let mut bytes = envelope.to_bytes().unwrap().to_vec();
        // Replace the single payload value (string "x": 1 + 4 + 1 bytes) with the
        // absent marker.
        bytes.truncate(bytes.len() - 6);
        bytes.push(0x00);

        let decoded = Envelope::decode(&bytes).unwrap();
        let result = decoded.validate(1, "FM.6", &Identifier::from("FS"));
        assert!(matches!(
            result,
            Err(ProtocolError::Violation { check: Check::AbsentField(0), .. })
        ));
    }

    #[test]
    fn validate_reports_first_failure() {
        let envelope = Envelope::new(header("FM.8"), vec![Value::from("MM1.0")]).unwrap();
        let receiver = Identifier::from("FS");

        assert!(envelope.validate(1, "FM.8", &receiver).is_ok());
        assert!(matches!(
            envelope.validate(2, "FM.8", &receiver),
            Err(ProtocolError::Violation { check: Check::PayloadArity, .. })
        ));
        assert!(matches!(
            envelope.validate(1, "FM.1", &receiver),
            Err(ProtocolError::Violation { check: Check::MessageType, .. })
        ));
        assert_eq!(
            envelope.validate(1, "FM.8", &Identifier::from("MM1.0")),
            Err(ProtocolError::Violation {
                check: Check::Receiver,
                expected: "MM1.0".to_string(),
                actual: "FS".to_string(),
            })
        );
    }
}
