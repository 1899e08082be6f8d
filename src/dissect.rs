//! The dissection engine: walks raw payload bytes guided by the schema
//! registry, or by wire-type self-description alone when no schema applies.
//!
//! Dissection is infallible by design: every wire-level fault degrades the
//! smallest enclosing node's status (or the enclosing level's `truncated`
//! marker) and the walk continues with siblings when the stream permits.
//! Unknown field numbers are always kept, never dropped.

use crate::ast::{Label, ScalarType};
use crate::parser::MAX_FIELD_NUMBER;
use crate::registry::{FieldDescriptor, MessageDescriptor, ResolvedKind, SchemaRegistry};
use crate::value::{DecodedField, DecodedTree, DecodedValue, FieldStatus};
use crate::wire::{zigzag32, zigzag64, Cursor, WireError, WireType};

/// Default bound on embedded-message/group nesting.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Per-payload decoder. Borrows the immutable registry, so one registry can
/// serve any number of dissectors (and threads) concurrently.
#[derive(Debug, Clone, Copy)]
pub struct Dissector<'a> {
    registry: &'a SchemaRegistry,
    max_depth: usize,
}

enum Step {
    Field(DecodedField),
    /// An end-group key; matched (or flagged) by the caller.
    GroupEnd { number: i32, offset: usize },
}

impl<'a> Dissector<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Dissector<'a> {
        Dissector {
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(registry: &'a SchemaRegistry, max_depth: usize) -> Dissector<'a> {
        Dissector { registry, max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decode one payload. `root_type` is a fully-qualified message name (a
    /// unique suffix is accepted); absent or unresolved means schema-free
    /// wire-type-only decoding. Always returns a tree, best-effort.
    pub fn dissect(&self, bytes: &[u8], root_type: Option<&str>) -> DecodedTree {
        let desc = root_type.and_then(|name| self.registry.find_message(name));
        let mut cur = Cursor::new(bytes);
        self.dissect_message(&mut cur, desc, 0)
    }

    fn dissect_message(
        &self,
        cur: &mut Cursor<'_>,
        desc: Option<&'a MessageDescriptor>,
        depth: usize,
    ) -> DecodedTree {
        let mut tree = DecodedTree::default();
        while !cur.at_end() {
            let start = cur.offset();
            let key = match cur.read_varint() {
                Ok(k) => k,
                Err(e) => {
                    tree.truncated = Some(format!("field key: {}", e));
                    break;
                }
            };
            match self.step(cur, key, start, desc, depth) {
                Ok(Step::Field(field)) => tree.fields.push(field),
                Ok(Step::GroupEnd { number, offset }) => {
                    tree.fields.push(unmatched_group_end(number, offset, cur.offset() - offset));
                }
                Err(reason) => {
                    tree.truncated = Some(reason);
                    break;
                }
            }
        }
        tree
    }

    /// Walk a deprecated group body until the matching end marker. Returns the
    /// collected tree and whether the end marker was actually seen.
    fn dissect_group(
        &self,
        cur: &mut Cursor<'_>,
        group_number: i32,
        desc: Option<&'a MessageDescriptor>,
        depth: usize,
    ) -> (DecodedTree, bool) {
        let mut tree = DecodedTree::default();
        while !cur.at_end() {
            let start = cur.offset();
            let key = match cur.read_varint() {
                Ok(k) => k,
                Err(e) => {
                    tree.truncated = Some(format!("field key: {}", e));
                    return (tree, false);
                }
            };
            match self.step(cur, key, start, desc, depth) {
                Ok(Step::Field(field)) => tree.fields.push(field),
                Ok(Step::GroupEnd { number, .. }) if number == group_number => {
                    return (tree, true);
                }
                Ok(Step::GroupEnd { number, offset }) => {
                    tree.fields.push(unmatched_group_end(number, offset, cur.offset() - offset));
                }
                Err(reason) => {
                    tree.truncated = Some(reason);
                    return (tree, false);
                }
            }
        }
        (tree, false)
    }

    /// One field: split the key, dispatch on wire type, attach schema metadata.
    /// `Err` means the stream is unusable from `start` on (impossible key).
    fn step(
        &self,
        cur: &mut Cursor<'_>,
        key: u64,
        start: usize,
        desc: Option<&'a MessageDescriptor>,
        depth: usize,
    ) -> Result<Step, String> {
        let number = (key >> 3) as i64;
        if number < 1 || number > i64::from(MAX_FIELD_NUMBER) {
            return Err(format!("invalid field number {} at offset {}", number, start));
        }
        let number = number as i32;
        let tag = (key & 0x7) as u8;
        let wire_type = WireType::from_tag(tag)
            .ok_or_else(|| WireError::InvalidWireType { tag, offset: start }.to_string())?;
        if wire_type == WireType::EndGroup {
            return Ok(Step::GroupEnd { number, offset: start });
        }

        let fd = self.field_descriptor(desc, number);
        let (value, mut status) = match wire_type {
            WireType::Varint => match cur.read_varint() {
                Ok(v) => (self.varint_value(fd, v), FieldStatus::Ok),
                Err(e) => (
                    DecodedValue::Bytes(cur.take_rest().to_vec()),
                    FieldStatus::Malformed(e.to_string()),
                ),
            },
            WireType::Fixed64 => match cur.read_fixed64() {
                Ok(v) => (self.fixed64_value(fd, v), FieldStatus::Ok),
                Err(e) => (
                    DecodedValue::Bytes(cur.take_rest().to_vec()),
                    FieldStatus::Malformed(e.to_string()),
                ),
            },
            WireType::Fixed32 => match cur.read_fixed32() {
                Ok(v) => (self.fixed32_value(fd, v), FieldStatus::Ok),
                Err(e) => (
                    DecodedValue::Bytes(cur.take_rest().to_vec()),
                    FieldStatus::Malformed(e.to_string()),
                ),
            },
            WireType::LengthDelimited => {
                let remaining = cur.remaining();
                match cur.read_len_delimited() {
                    Ok((abs, span)) => self.len_delimited_value(fd, abs, span, depth),
                    Err(WireError::Truncated(off)) => (
                        DecodedValue::Bytes(cur.take_rest().to_vec()),
                        FieldStatus::Malformed(format!(
                            "declared length exceeds remaining {} bytes at offset {}",
                            remaining, off
                        )),
                    ),
                    Err(e) => (
                        DecodedValue::Bytes(cur.take_rest().to_vec()),
                        FieldStatus::Malformed(e.to_string()),
                    ),
                }
            }
            WireType::StartGroup => {
                if depth + 1 > self.max_depth {
                    (
                        DecodedValue::Bytes(cur.take_rest().to_vec()),
                        FieldStatus::MaxDepthExceeded,
                    )
                } else {
                    let group_desc = fd.and_then(|f| match &f.kind {
                        ResolvedKind::Message(fqn) => self.registry.message(fqn),
                        _ => None,
                    });
                    let (tree, matched) =
                        self.dissect_group(cur, number, group_desc, depth + 1);
                    let status = if matched {
                        FieldStatus::Ok
                    } else {
                        FieldStatus::Malformed("group start without matching end".to_string())
                    };
                    (DecodedValue::Group(tree), status)
                }
            }
            WireType::EndGroup => unreachable!("handled above"),
        };

        if matches!(status, FieldStatus::Ok) && fd.is_none() {
            status = FieldStatus::UnknownField;
        }
        Ok(Step::Field(DecodedField {
            number,
            wire_type,
            offset: start,
            len: cur.offset() - start,
            name: fd.map(|f| f.name.clone()),
            type_name: fd.map(|f| f.type_display()),
            oneof: fd.and_then(|f| f.oneof.clone()),
            value,
            status,
        }))
    }

    /// Declared field, or an extension field when the number falls inside one
    /// of the message's extension ranges.
    fn field_descriptor(
        &self,
        desc: Option<&'a MessageDescriptor>,
        number: i32,
    ) -> Option<&'a FieldDescriptor> {
        let desc = desc?;
        if let Some(fd) = desc.field_by_number(number) {
            return Some(fd);
        }
        if desc.in_extension_range(number) {
            return self.registry.extension(&desc.full_name, number);
        }
        None
    }

    fn varint_value(&self, fd: Option<&FieldDescriptor>, v: u64) -> DecodedValue {
        let Some(fd) = fd else {
            return DecodedValue::UInt(v);
        };
        match &fd.kind {
            ResolvedKind::Scalar(ScalarType::Int32) | ResolvedKind::Scalar(ScalarType::Int64) => {
                DecodedValue::Int(v as i64)
            }
            ResolvedKind::Scalar(ScalarType::UInt32) | ResolvedKind::Scalar(ScalarType::UInt64) => {
                DecodedValue::UInt(v)
            }
            ResolvedKind::Scalar(ScalarType::SInt32) => DecodedValue::Int(i64::from(zigzag32(v))),
            ResolvedKind::Scalar(ScalarType::SInt64) => DecodedValue::Int(zigzag64(v)),
            ResolvedKind::Scalar(ScalarType::Bool) => DecodedValue::Bool(v != 0),
            ResolvedKind::Enum(fqn) => DecodedValue::Enum {
                number: v as i64,
                name: self
                    .registry
                    .enum_type(fqn)
                    .and_then(|e| e.name_of(v as i64))
                    .map(str::to_string),
            },
            // Wire/schema mismatch or unresolved: keep the raw value.
            _ => DecodedValue::UInt(v),
        }
    }

    fn fixed64_value(&self, fd: Option<&FieldDescriptor>, v: u64) -> DecodedValue {
        match fd.map(|f| &f.kind) {
            Some(ResolvedKind::Scalar(ScalarType::Double)) => {
                DecodedValue::Double(f64::from_bits(v))
            }
            Some(ResolvedKind::Scalar(ScalarType::Fixed64)) => DecodedValue::UInt(v),
            Some(ResolvedKind::Scalar(ScalarType::SFixed64)) => DecodedValue::Int(v as i64),
            _ => DecodedValue::Fixed64(v),
        }
    }

    fn fixed32_value(&self, fd: Option<&FieldDescriptor>, v: u32) -> DecodedValue {
        match fd.map(|f| &f.kind) {
            Some(ResolvedKind::Scalar(ScalarType::Float)) => {
                DecodedValue::Float(f32::from_bits(v))
            }
            Some(ResolvedKind::Scalar(ScalarType::Fixed32)) => DecodedValue::UInt(u64::from(v)),
            Some(ResolvedKind::Scalar(ScalarType::SFixed32)) => {
                DecodedValue::Int(i64::from(v as i32))
            }
            _ => DecodedValue::Fixed32(v),
        }
    }

    /// Length-delimited payload: embedded message, packed repeats, string,
    /// bytes, or the schema-free heuristic.
    fn len_delimited_value(
        &self,
        fd: Option<&FieldDescriptor>,
        abs: usize,
        span: &[u8],
        depth: usize,
    ) -> (DecodedValue, FieldStatus) {
        if let Some(fd) = fd {
            match &fd.kind {
                ResolvedKind::Message(fqn) => {
                    if let Some(nested) = self.registry.message(fqn) {
                        if depth + 1 > self.max_depth {
                            return (
                                DecodedValue::Bytes(span.to_vec()),
                                FieldStatus::MaxDepthExceeded,
                            );
                        }
                        let mut sub = Cursor::sub_cursor(span, abs);
                        let tree = self.dissect_message(&mut sub, Some(nested), depth + 1);
                        return (DecodedValue::Message(tree), FieldStatus::Ok);
                    }
                    // Registered name without a definition: fall through.
                }
                ResolvedKind::Enum(_) if fd.label == Label::Repeated => {
                    return self.decode_packed(fd, abs, span);
                }
                ResolvedKind::Scalar(ScalarType::String) => {
                    return (
                        DecodedValue::Str(String::from_utf8_lossy(span).into_owned()),
                        FieldStatus::Ok,
                    );
                }
                ResolvedKind::Scalar(ScalarType::Bytes) => {
                    return (DecodedValue::Bytes(span.to_vec()), FieldStatus::Ok);
                }
                ResolvedKind::Scalar(s) if fd.label == Label::Repeated && s.packable() => {
                    return self.decode_packed(fd, abs, span);
                }
                _ => {}
            }
        }
        (self.heuristic_value(abs, span, depth), FieldStatus::Ok)
    }

    /// Packed repeated scalars: back-to-back values until the span is spent.
    fn decode_packed(&self, fd: &FieldDescriptor, abs: usize, span: &[u8]) -> (DecodedValue, FieldStatus) {
        let mut cur = Cursor::sub_cursor(span, abs);
        let mut items = Vec::new();
        while !cur.at_end() {
            let item = match &fd.kind {
                ResolvedKind::Scalar(ScalarType::Float) => {
                    cur.read_fixed32().map(|v| DecodedValue::Float(f32::from_bits(v)))
                }
                ResolvedKind::Scalar(ScalarType::Fixed32) => {
                    cur.read_fixed32().map(|v| DecodedValue::UInt(u64::from(v)))
                }
                ResolvedKind::Scalar(ScalarType::SFixed32) => {
                    cur.read_fixed32().map(|v| DecodedValue::Int(i64::from(v as i32)))
                }
                ResolvedKind::Scalar(ScalarType::Double) => {
                    cur.read_fixed64().map(|v| DecodedValue::Double(f64::from_bits(v)))
                }
                ResolvedKind::Scalar(ScalarType::Fixed64) => {
                    cur.read_fixed64().map(DecodedValue::UInt)
                }
                ResolvedKind::Scalar(ScalarType::SFixed64) => {
                    cur.read_fixed64().map(|v| DecodedValue::Int(v as i64))
                }
                _ => cur.read_varint().map(|v| self.varint_value(Some(fd), v)),
            };
            match item {
                Ok(v) => items.push(v),
                Err(e) => {
                    return (
                        DecodedValue::Packed(items),
                        FieldStatus::Malformed(format!("packed element: {}", e)),
                    );
                }
            }
        }
        (DecodedValue::Packed(items), FieldStatus::Ok)
    }

    /// No schema for this span: try a message decode, fall back to text or hex
    /// display. Best-effort only, never authoritative.
    fn heuristic_value(&self, abs: usize, span: &[u8], depth: usize) -> DecodedValue {
        if !span.is_empty() && depth + 1 <= self.max_depth {
            let mut sub = Cursor::sub_cursor(span, abs);
            let tree = self.dissect_message(&mut sub, None, depth + 1);
            let clean = tree.truncated.is_none()
                && !tree.fields.is_empty()
                && tree
                    .fields
                    .iter()
                    .all(|f| !matches!(f.status, FieldStatus::Malformed(_)));
            if clean {
                return DecodedValue::Message(tree);
            }
        }
        match std::str::from_utf8(span) {
            Ok(s) if s.chars().all(|c| !c.is_control() || c.is_ascii_whitespace()) => {
                DecodedValue::Str(s.to_string())
            }
            _ => DecodedValue::Bytes(span.to_vec()),
        }
    }
}

fn unmatched_group_end(number: i32, offset: usize, len: usize) -> DecodedField {
    DecodedField {
        number,
        wire_type: WireType::EndGroup,
        offset,
        len,
        name: None,
        type_name: None,
        oneof: None,
        value: DecodedValue::Marker,
        status: FieldStatus::Malformed("group end without matching start".to_string()),
    }
}
