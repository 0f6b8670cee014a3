//! # Value Codec
//!
//! Packs the non-key fields of a value record into the single opaque,
//! compressed **value field** that every stored entry carries, and unpacks
//! it on the read path.
//!
//! ## Layout
//!
//! ```text
//! value field := [0xFFFF: u16] [BLOB tag] [varint len] [compressed block]
//! compressed block := [uncompressed_len: u32 LE] [lz4 block]
//! ```
//!
//! The lz4 block format prepends the uncompressed length, which gives the
//! sorter and the metadata statistics a cheap size probe: the maximum
//! uncompressed value size per bucket is computed without decompressing
//! anything.
//!
//! ## Buffer Discipline
//!
//! `unpack_into` decompresses into a caller-provided buffer that readers
//! presize from the per-bucket `max_value_bytes` statistic, so steady-state
//! decoding performs no incremental growth. `pack` appends to a caller
//! buffer for the same reason on the build side.

use eyre::{ensure, eyre, Result};
use lz4_flex::block::decompress_into;

use crate::encoding::{read_field, write_field, TAG_BLOB, VALUE_FIELD_ID};

/// Compresses `payload` (a serialized run of fields) and appends the framed
/// value field to `out`.
pub fn pack(payload: &[u8], out: &mut Vec<u8>) {
    let compressed = lz4_flex::compress_prepend_size(payload);
    write_field(VALUE_FIELD_ID, TAG_BLOB, &compressed, out);
}

fn compressed_block(value_field: &[u8]) -> Result<&[u8]> {
    let (field, consumed) = read_field(value_field)?;
    ensure!(
        field.id == VALUE_FIELD_ID && field.tag == TAG_BLOB,
        "malformed value field: id {:#06x}, tag {:#04x}",
        field.id,
        field.tag
    );
    ensure!(
        consumed == value_field.len(),
        "trailing bytes after value field"
    );
    ensure!(
        field.payload.len() >= 4,
        "value field shorter than its size prefix"
    );
    Ok(field.payload)
}

/// Uncompressed payload size of a framed value field, read from the size
/// prefix without decompressing.
pub fn uncompressed_len(value_field: &[u8]) -> Result<usize> {
    let block = compressed_block(value_field)?;
    Ok(u32::from_le_bytes(block[..4].try_into().unwrap()) as usize) // INVARIANT: >= 4 bytes checked
}

/// Decompresses a framed value field into `out` (cleared and resized to the
/// exact uncompressed length) and returns the payload slice.
pub fn unpack_into<'a>(value_field: &[u8], out: &'a mut Vec<u8>) -> Result<&'a [u8]> {
    let block = compressed_block(value_field)?;
    let len = u32::from_le_bytes(block[..4].try_into().unwrap()) as usize;

    out.clear();
    out.resize(len, 0);
    let written = decompress_into(&block[4..], out)
        .map_err(|e| eyre!("failed to decompress value field: {}", e))?;
    ensure!(
        written == len,
        "value field decompressed to {} bytes, size prefix said {}",
        written,
        len
    );
    Ok(&out[..written])
}
