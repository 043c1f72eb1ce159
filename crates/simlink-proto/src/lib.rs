//! Simlink wire protocol.
//!
//! Every exchange between the federation manager, the federate starter and
//! the federates is one [`Envelope`]: a versioned header followed by a
//! type-tagged payload. The [`catalog`] gives each payload layout a typed
//! message and enforces its schema.
//!
//! # Components
//!
//! - [`Value`]: closed set of payload value types and their codec
//! - [`Envelope`]: header + payload wrapper, decode and validation
//! - [`Message`]: typed catalog message with routing fields
//! - [`ProtocolError`]: codec, validation and schema failures
//!
//! # Example
//!
//! ```
//! use simlink_proto::{Identifier, Message, MessageBody, Route};
//!
//! let message = Message::new(
//!     Route {
//!         run_id: Identifier::from("run-1"),
//!         sender_id: Identifier::from("FM"),
//!         receiver_id: Identifier::from("MM1.0"),
//!         message_id: 1,
//!     },
//!     MessageBody::RequestStatus,
//! )?;
//!
//! let bytes = message.to_envelope()?.to_bytes()?;
//! let decoded = Message::decode(&bytes, &Identifier::from("MM1.0"))?;
//! assert_eq!(decoded, message);
//! # Ok::<(), simlink_proto::ProtocolError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod envelope;
pub mod errors;
pub mod identifier;
pub mod value;

pub use catalog::{
    Direction, FieldKind, FieldSpec, Message, MessageBody, MessageType, Route,
    model::{
        AckNak, RequestStatistic, RunControl, SetParameter, SimTime, SimulationStatus,
        StatisticError, StatisticValue, StatusReply,
    },
    starter::{
        AllFederatesKilled, FederateKilled, FederateStarted, KillFederate, StartFederate,
        StartStatus, TerminateFederate,
    },
};
pub use envelope::{Envelope, EnvelopeHeader, PROTOCOL_VERSION};
pub use errors::{Check, DecodeError, ProtocolError, Result};
pub use identifier::Identifier;
pub use value::{Quantity, Value, ValueKind, time_unit_factor};
