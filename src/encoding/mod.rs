//! # Field Wire Format
//!
//! Every record KilnDB stores is a flat concatenation of self-describing
//! fields. A field frames its payload with an identifier, a type tag, and a
//! varint length, so readers can walk a record without consulting a schema
//! and can skip payloads they do not understand:
//!
//! ```text
//! Field := [field_id: u16 LE] [type_tag: u8] [varint payload_len] [payload]
//! ```
//!
//! ## Type Tags
//!
//! | Tag | Type  | Payload |
//! |-----|-------|---------|
//! | 0x01| BOOL  | 1 byte, 0 or 1 |
//! | 0x02| INT   | zig-zag varint |
//! | 0x03| FLOAT | 8-byte LE IEEE-754 bits |
//! | 0x04| TEXT  | UTF-8 bytes |
//! | 0x05| BLOB  | raw bytes |
//! | 0x06| COUNT | unsigned varint |
//!
//! ## Reserved Field Ids
//!
//! Ids at the top of the range are structural, never schema-assigned:
//!
//! - `0xFFFF` — the compressed value field appended to every stored entry
//! - `0xFFFE` — group occurrence count (COUNT payload)
//! - `0xFFFD` — one grouped-mode member (BLOB payload wrapping the member's
//!   serialized fields)
//!
//! ## Key Boundary
//!
//! A stored entry is `key fields ++ value field`. The key's byte length is
//! recovered by walking exactly the schema's key-field count with
//! [`fields_end`]; the same walk serves the sorter and the binary-search
//! comparator on the read path.
//!
//! All functions here are zero-copy: decoders hand out subslices of the
//! input, encoders append to caller-owned buffers.

pub mod varint;

use eyre::{ensure, Result};
use varint::{read_varint, varint_len, write_varint};

pub const TAG_BOOL: u8 = 0x01;
pub const TAG_INT: u8 = 0x02;
pub const TAG_FLOAT: u8 = 0x03;
pub const TAG_TEXT: u8 = 0x04;
pub const TAG_BLOB: u8 = 0x05;
pub const TAG_COUNT: u8 = 0x06;

/// Field id of the single compressed value field of a stored entry.
pub const VALUE_FIELD_ID: u16 = 0xFFFF;
/// Field id of the occurrence-count field in counted modes.
pub const COUNT_FIELD_ID: u16 = 0xFFFE;
/// Field id wrapping one member of a grouped entry.
pub const MEMBER_FIELD_ID: u16 = 0xFFFD;

/// Field header size before the varint length: id (2) + tag (1).
const FIELD_FIXED_HEADER: usize = 3;

/// A decoded field borrowing its payload from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawField<'a> {
    pub id: u16,
    pub tag: u8,
    pub payload: &'a [u8],
}

fn valid_tag(tag: u8) -> bool {
    (TAG_BOOL..=TAG_COUNT).contains(&tag)
}

/// Appends one framed field to `out`.
pub fn write_field(id: u16, tag: u8, payload: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&id.to_le_bytes());
    out.push(tag);
    write_varint(payload.len() as u64, out);
    out.extend_from_slice(payload);
}

/// Encoded size of a field carrying `payload_len` bytes.
pub fn field_frame_len(payload_len: usize) -> usize {
    FIELD_FIXED_HEADER + varint_len(payload_len as u64) + payload_len
}

/// Decodes the field at the start of `buf`, returning it and the total
/// bytes consumed (header + payload).
pub fn read_field(buf: &[u8]) -> Result<(RawField<'_>, usize)> {
    ensure!(
        buf.len() >= FIELD_FIXED_HEADER,
        "truncated field header: {} bytes",
        buf.len()
    );

    let id = u16::from_le_bytes([buf[0], buf[1]]);
    let tag = buf[2];
    ensure!(valid_tag(tag), "unknown field type tag: {:#04x}", tag);

    let (len, len_bytes) = read_varint(&buf[FIELD_FIXED_HEADER..])?;
    let payload_start = FIELD_FIXED_HEADER + len_bytes;
    let payload_end = payload_start + len as usize;
    ensure!(
        buf.len() >= payload_end,
        "truncated field payload: need {} bytes, have {}",
        payload_end,
        buf.len()
    );

    Ok((
        RawField {
            id,
            tag,
            payload: &buf[payload_start..payload_end],
        },
        payload_end,
    ))
}

/// Byte length of the first `count` fields of `buf`. Used to locate the
/// key/value boundary of a stored entry.
pub fn fields_end(buf: &[u8], count: usize) -> Result<usize> {
    let mut pos = 0usize;
    for i in 0..count {
        ensure!(
            pos < buf.len(),
            "entry ends after {} of {} expected fields",
            i,
            count
        );
        let (_, consumed) = read_field(&buf[pos..])?;
        pos += consumed;
    }
    Ok(pos)
}

/// Iterator over the fields of a serialized record.
pub struct FieldIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Result<RawField<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        match read_field(&self.buf[self.pos..]) {
            Ok((field, consumed)) => {
                self.pos += consumed;
                Some(Ok(field))
            }
            Err(e) => {
                self.pos = self.buf.len(); // stop after a malformed field
                Some(Err(e))
            }
        }
    }
}
