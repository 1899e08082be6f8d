//! Bounded byte cursor over a captured payload.
//!
//! Every read is checked against the cursor's span; a sub-cursor can never read
//! past its parent's length boundary, which is what keeps every decoded node's
//! byte span inside its parent's span. The cursor carries the absolute offset of
//! its first byte so nodes can report positions in the original buffer.

use byteorder::{ByteOrder, LittleEndian};

/// The 3-bit encoding tag carried in every field key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    StartGroup,
    EndGroup,
    Fixed32,
}

impl WireType {
    pub fn from_tag(tag: u8) -> Option<WireType> {
        Some(match tag {
            0 => WireType::Varint,
            1 => WireType::Fixed64,
            2 => WireType::LengthDelimited,
            3 => WireType::StartGroup,
            4 => WireType::EndGroup,
            5 => WireType::Fixed32,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            WireType::Varint => "varint",
            WireType::Fixed64 => "fixed64",
            WireType::LengthDelimited => "len",
            WireType::StartGroup => "group-start",
            WireType::EndGroup => "group-end",
            WireType::Fixed32 => "fixed32",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("truncated input at offset {0}")]
    Truncated(usize),
    #[error("malformed varint at offset {0}")]
    MalformedVarint(usize),
    #[error("invalid wire type {tag} at offset {offset}")]
    InvalidWireType { tag: u8, offset: usize },
    #[error("nesting deeper than {0} levels")]
    MaxDepthExceeded(usize),
}

/// A cursor over a byte span, position always in `[0, len]`.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Absolute offset of `buf[0]` within the original capture buffer.
    base: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, pos: 0, base: 0 }
    }

    /// Absolute position within the original buffer.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Base-128 varint, at most 10 bytes. A continuation bit still set on the
    /// tenth byte would overflow 64 bits and is malformed.
    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let start = self.offset();
        let mut value: u64 = 0;
        for i in 0..10 {
            let byte = match self.buf.get(self.pos) {
                Some(b) => *b,
                None => return Err(WireError::Truncated(start)),
            };
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::MalformedVarint(start))
    }

    pub fn read_fixed32(&mut self) -> Result<u32, WireError> {
        if self.remaining() < 4 {
            return Err(WireError::Truncated(self.offset()));
        }
        let v = LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_fixed64(&mut self) -> Result<u64, WireError> {
        if self.remaining() < 8 {
            return Err(WireError::Truncated(self.offset()));
        }
        let v = LittleEndian::read_u64(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(v)
    }

    /// Varint length prefix, then exactly that many bytes.
    pub fn read_len_delimited(&mut self) -> Result<(usize, &'a [u8]), WireError> {
        let len = self.read_varint()?;
        let here = self.offset();
        if len > self.remaining() as u64 {
            return Err(WireError::Truncated(here));
        }
        let len = len as usize;
        let span = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok((here, span))
    }

    /// A child cursor bounded to `span`, which must have come from this buffer
    /// (its absolute base is `abs_offset`).
    pub fn sub_cursor(span: &'a [u8], abs_offset: usize) -> Cursor<'a> {
        Cursor {
            buf: span,
            pos: 0,
            base: abs_offset,
        }
    }

    /// Consume everything up to the end of the span.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// Zigzag decoding for `sint32`/`sint64` values.
pub fn zigzag64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

pub fn zigzag32(v: u64) -> i32 {
    let v = v as u32;
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}
