//! Decoded field nodes produced by the dissection engine.

use crate::wire::WireType;

/// Ordered sequence of decoded fields for one message level.
///
/// `truncated` carries the reason when the remainder of this level could not be
/// decoded (bad key, truncated varint); the well-formed prefix is kept.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedTree {
    pub fields: Vec<DecodedField>,
    pub truncated: Option<String>,
}

impl DecodedTree {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.truncated.is_none()
    }

    /// All occurrences of a field number, in wire order.
    pub fn fields_with_number(&self, number: i32) -> impl Iterator<Item = &DecodedField> {
        self.fields.iter().filter(move |f| f.number == number)
    }

    pub fn field(&self, number: i32) -> Option<&DecodedField> {
        self.fields_with_number(number).next()
    }
}

/// One decoded unit: field key plus its value, with its byte span in the
/// original buffer for host-side highlighting.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    pub number: i32,
    pub wire_type: WireType,
    /// Absolute offset of the field key within the original buffer.
    pub offset: usize,
    /// Bytes from the field key through the end of the value.
    pub len: usize,
    /// Resolved field name, if the schema knows this field.
    pub name: Option<String>,
    /// Declared type for display (`uint32`, `.pkg.Msg`, `map<k, v> entry`).
    pub type_name: Option<String>,
    /// Name of the oneof group this field belongs to, if any.
    pub oneof: Option<String>,
    pub value: DecodedValue,
    pub status: FieldStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldStatus {
    Ok,
    /// Field number not in the schema (or no schema); value kept raw.
    UnknownField,
    /// Wire-level fault contained to this field; the reason is attached.
    Malformed(String),
    /// Recursion bound hit; nested bytes kept undecoded.
    MaxDepthExceeded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    UInt(u64),
    Int(i64),
    Bool(bool),
    Enum { number: i64, name: Option<String> },
    Float(f32),
    Double(f64),
    /// Schema-free fixed32 payload; rendered as both integer and float.
    Fixed32(u32),
    /// Schema-free fixed64 payload; rendered as both integer and float.
    Fixed64(u64),
    Str(String),
    Bytes(Vec<u8>),
    Message(DecodedTree),
    Group(DecodedTree),
    Packed(Vec<DecodedValue>),
    /// Group end marker with no matching start, kept for inspection.
    Marker,
}

impl DecodedValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DecodedValue::UInt(v) => Some(*v),
            DecodedValue::Fixed32(v) => Some(u64::from(*v)),
            DecodedValue::Fixed64(v) => Some(*v),
            DecodedValue::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DecodedValue::Int(v) => Some(*v),
            DecodedValue::UInt(v) => i64::try_from(*v).ok(),
            DecodedValue::Enum { number, .. } => Some(*number),
            DecodedValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DecodedValue::Float(v) => Some(f64::from(*v)),
            DecodedValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DecodedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DecodedValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&DecodedTree> {
        match self {
            DecodedValue::Message(t) | DecodedValue::Group(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_packed(&self) -> Option<&[DecodedValue]> {
        match self {
            DecodedValue::Packed(v) => Some(v),
            _ => None,
        }
    }
}
