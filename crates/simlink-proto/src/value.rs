//! Typed payload values and their binary codec.
//!
//! Every header field and payload element is a [`Value`]: a one-byte type
//! tag followed by a big-endian body. Strings carry a `u32` byte length.
//! Physical quantities carry the magnitude followed by the unit tag as a
//! string.
//!
//! The absent marker (tag `0x00`) decodes so that validation can reject it
//! with a precise diagnosis, but it is never encoded.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::errors::{DecodeError, ProtocolError, Result};

/// Scalar with a physical unit tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity<T> {
    /// Numeric magnitude expressed in `unit`
    pub magnitude: T,
    /// Unit tag, e.g. `"s"` or `"min"`
    pub unit: String,
}

impl<T> Quantity<T> {
    /// Create a quantity.
    pub fn new(magnitude: T, unit: impl Into<String>) -> Self {
        Self { magnitude, unit: unit.into() }
    }
}

impl<T: Into<f64> + Copy> Quantity<T> {
    /// Magnitude converted to seconds. `None` if the unit is not a time unit.
    pub fn as_seconds(&self) -> Option<f64> {
        time_unit_factor(&self.unit).map(|factor| self.magnitude.into() * factor)
    }
}

/// Seconds per unit for the recognized time units.
pub fn time_unit_factor(unit: &str) -> Option<f64> {
    let factor = match unit {
        "ns" => 1e-9,
        "us" | "µs" => 1e-6,
        "ms" => 1e-3,
        "s" | "sec" => 1.0,
        "min" => 60.0,
        "h" | "hr" => 3_600.0,
        "day" | "d" => 86_400.0,
        "wk" => 604_800.0,
        _ => return None,
    };
    Some(factor)
}

/// Closed set of payload value types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent marker. Decodable, never valid inside an envelope.
    Absent,
    /// 8-bit signed integer
    Int8(i8),
    /// 16-bit signed integer
    Int16(i16),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// Single-precision float
    Float32(f32),
    /// Double-precision float
    Float64(f64),
    /// Boolean
    Bool(bool),
    /// UTF-8 string
    String(String),
    /// Single-precision physical quantity
    Quantity32(Quantity<f32>),
    /// Double-precision physical quantity
    Quantity64(Quantity<f64>),
}

/// Discriminant of a [`Value`], used in diagnostics and schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Absent marker
    Absent,
    /// `i8`
    Int8,
    /// `i16`
    Int16,
    /// `i32`
    Int32,
    /// `i64`
    Int64,
    /// `f32`
    Float32,
    /// `f64`
    Float64,
    /// `bool`
    Bool,
    /// string
    String,
    /// `f32` quantity
    Quantity32,
    /// `f64` quantity
    Quantity64,
}

impl ValueKind {
    /// Wire tag byte for this kind.
    pub const fn tag(self) -> u8 {
        match self {
            Self::Absent => 0x00,
            Self::Int8 => 0x01,
            Self::Int16 => 0x02,
            Self::Int32 => 0x03,
            Self::Int64 => 0x04,
            Self::Float32 => 0x05,
            Self::Float64 => 0x06,
            Self::Bool => 0x07,
            Self::String => 0x08,
            Self::Quantity32 => 0x09,
            Self::Quantity64 => 0x0A,
        }
    }

    /// Kind for a wire tag byte. `None` if the tag is unknown.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        let kind = match tag {
            0x00 => Self::Absent,
            0x01 => Self::Int8,
            0x02 => Self::Int16,
            0x03 => Self::Int32,
            0x04 => Self::Int64,
            0x05 => Self::Float32,
            0x06 => Self::Float64,
            0x07 => Self::Bool,
            0x08 => Self::String,
            0x09 => Self::Quantity32,
            0x0A => Self::Quantity64,
            _ => return None,
        };
        Some(kind)
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Quantity32 => "float32 quantity",
            Self::Quantity64 => "float64 quantity",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// Kind of this value.
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Absent => ValueKind::Absent,
            Self::Int8(_) => ValueKind::Int8,
            Self::Int16(_) => ValueKind::Int16,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Float32(_) => ValueKind::Float32,
            Self::Float64(_) => ValueKind::Float64,
            Self::Bool(_) => ValueKind::Bool,
            Self::String(_) => ValueKind::String,
            Self::Quantity32(_) => ValueKind::Quantity32,
            Self::Quantity64(_) => ValueKind::Quantity64,
        }
    }

    /// Returns true for the absent marker.
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// String contents. `None` for other kinds.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean contents. `None` for other kinds.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer contents widened to `i64`. `None` for non-integers.
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int8(v) => Some(*v as i64),
            Self::Int16(v) => Some(*v as i64),
            Self::Int32(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric contents as `f64`. Integers widen; quantities yield their
    /// magnitude. `None` for strings, booleans and the absent marker.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float32(v) => Some(f64::from(*v)),
            Self::Float64(v) => Some(*v),
            Self::Quantity32(q) => Some(f64::from(q.magnitude)),
            Self::Quantity64(q) => Some(q.magnitude),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Encode this value (tag + body).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encoding` for the absent marker or a string longer
    ///   than `u32::MAX` bytes
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.is_absent() {
            return Err(ProtocolError::Encoding("absent marker cannot be encoded".to_string()));
        }

        dst.put_u8(self.kind().tag());
        match self {
            Self::Absent => {},
            Self::Int8(v) => dst.put_i8(*v),
            Self::Int16(v) => dst.put_i16(*v),
            Self::Int32(v) => dst.put_i32(*v),
            Self::Int64(v) => dst.put_i64(*v),
            Self::Float32(v) => dst.put_f32(*v),
            Self::Float64(v) => dst.put_f64(*v),
            Self::Bool(v) => dst.put_u8(u8::from(*v)),
            Self::String(s) => put_string(s, dst)?,
            Self::Quantity32(q) => {
                dst.put_f32(q.magnitude);
                put_string(&q.unit, dst)?;
            },
            Self::Quantity64(q) => {
                dst.put_f64(q.magnitude);
                put_string(&q.unit, dst)?;
            },
        }
        Ok(())
    }

    /// Decode one value from the front of `src`, advancing it.
    ///
    /// On error `src` may have been partially advanced; callers discard the
    /// cursor.
    pub fn decode(src: &mut &[u8]) -> std::result::Result<Self, DecodeError> {
        need(src, 1)?;
        let tag = src.get_u8();
        let kind = ValueKind::from_tag(tag).ok_or(DecodeError::UnknownTag(tag))?;

        let value = match kind {
            ValueKind::Absent => Self::Absent,
            ValueKind::Int8 => {
                need(src, 1)?;
                Self::Int8(src.get_i8())
            },
            ValueKind::Int16 => {
                need(src, 2)?;
                Self::Int16(src.get_i16())
            },
            ValueKind::Int32 => {
                need(src, 4)?;
                Self::Int32(src.get_i32())
            },
            ValueKind::Int64 => {
                need(src, 8)?;
                Self::Int64(src.get_i64())
            },
            ValueKind::Float32 => {
                need(src, 4)?;
                Self::Float32(src.get_f32())
            },
            ValueKind::Float64 => {
                need(src, 8)?;
                Self::Float64(src.get_f64())
            },
            ValueKind::Bool => {
                need(src, 1)?;
                Self::Bool(src.get_u8() != 0)
            },
            ValueKind::String => Self::String(get_string(src)?),
            ValueKind::Quantity32 => {
                need(src, 4)?;
                let magnitude = src.get_f32();
                Self::Quantity32(Quantity { magnitude, unit: get_string(src)? })
            },
            ValueKind::Quantity64 => {
                need(src, 8)?;
                let magnitude = src.get_f64();
                Self::Quantity64(Quantity { magnitude, unit: get_string(src)? })
            },
        };

        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "<absent>"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Quantity32(q) => write!(f, "{} {}", q.magnitude, q.unit),
            Self::Quantity64(q) => write!(f, "{} {}", q.magnitude, q.unit),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Quantity<f64>> for Value {
    fn from(q: Quantity<f64>) -> Self {
        Self::Quantity64(q)
    }
}

fn need(src: &[u8], needed: usize) -> std::result::Result<(), DecodeError> {
    if src.remaining() < needed {
        return Err(DecodeError::Truncated { needed, remaining: src.remaining() });
    }
    Ok(())
}

fn put_string(s: &str, dst: &mut impl BufMut) -> Result<()> {
    let len = u32::try_from(s.len())
        .map_err(|_| ProtocolError::Encoding(format!("string of {} bytes too long", s.len())))?;
    dst.put_u32(len);
    dst.put_slice(s.as_bytes());
    Ok(())
}

fn get_string(src: &mut &[u8]) -> std::result::Result<String, DecodeError> {
    need(src, 4)?;
    let len = src.get_u32() as usize;
    need(src, len)?;
    let data: &[u8] = *src;
    let (bytes, rest) = data.split_at(len);
    let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?.to_string();
    *src = rest;
    Ok(s)
}
