//! Opaque participant and run identifiers.

use std::fmt;

use crate::{errors::DecodeError, value::Value};

/// Identifier of a federation run or of a participant in it.
///
/// Equality-comparable and either textual (`"FM"`, `"MM1.0"`) or numeric.
/// Numeric identifiers always encode as `int64`; narrower integer widths are
/// accepted on decode and compare equal to the same number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    /// Textual identifier
    Name(String),
    /// Numeric identifier
    Number(i64),
}

impl Identifier {
    /// Wire representation.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Name(name) => Value::String(name.clone()),
            Self::Number(n) => Value::Int64(*n),
        }
    }

    /// Parse a header field.
    ///
    /// # Errors
    ///
    /// - `DecodeError::HeaderField` if the value is neither a string nor an
    ///   integer
    pub fn from_value(field: &'static str, value: &Value) -> Result<Self, DecodeError> {
        if let Value::String(name) = value {
            return Ok(Self::Name(name.clone()));
        }
        value
            .as_i64()
            .map(Self::Number)
            .ok_or(DecodeError::HeaderField { field, actual: value.kind().name() })
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Identifier {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i64> for Identifier {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}
