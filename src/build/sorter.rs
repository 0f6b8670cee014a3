//! # Bucket Sorter
//!
//! Turns one bucket's unordered temp file into its two final files: the
//! records file (key-ordered entries) and the offsets index (one `i32`
//! byte-offset per entry). The temp file is memory-mapped and parsed into
//! byte-range descriptors — key and value bytes are never copied until the
//! final write.
//!
//! ## Grouping
//!
//! After the descriptor sort, a maximal run of byte-identical keys forms a
//! **group**, merged into one output entry:
//!
//! - *Flat*: the group's last descriptor wins (arbitrary among duplicates
//!   by contract); its compressed value field is copied verbatim, or
//!   re-packed behind an occurrence-count field in counted mode.
//! - *Grouped*: every member's payload is decompressed and re-packed as one
//!   member field per occurrence, preceded by an optional count field.
//!
//! ## Buffer Presizing
//!
//! A pre-pass over the sorted groups computes the largest re-packed payload
//! using the codec's size probe (no decompression), so the pack and scratch
//! buffers are sized once before the write loop. The same maxima are
//! returned to the coordinator and persisted in metadata for the read side.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::Mmap;

use crate::codec;
use crate::config::{
    offsets_file_name, records_file_name, temp_file_name, MAX_BUCKET_TEMP_BYTES,
};
use crate::encoding::varint::write_varint;
use crate::encoding::{fields_end, write_field, COUNT_FIELD_ID, MEMBER_FIELD_ID, TAG_BLOB, TAG_COUNT};
use crate::meta::GroupingMode;

/// Per-bucket results of a successful sort, accumulated into metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOutput {
    pub entries_written: u64,
    pub max_group_size: u32,
    pub max_value_bytes: u32,
}

#[derive(Debug, Clone, Copy)]
struct Descriptor {
    /// Offset of the key bytes within the mapped temp file.
    start: u32,
    key_len: u32,
    /// Key + value-field length.
    len: u32,
}

/// Sorts one bucket's temp file into its final files and deletes the temp
/// file. Returns `None` for an empty bucket (no temp file or no entries),
/// which then has no final files at all.
pub fn sort_bucket(
    dir: &Path,
    bucket: u32,
    num_key_fields: usize,
    grouping: &GroupingMode,
) -> Result<Option<SortOutput>> {
    let temp_path = dir.join(temp_file_name(bucket));
    if !temp_path.exists() {
        return Ok(None);
    }

    let file = File::open(&temp_path)
        .wrap_err_with(|| format!("failed to open temp file '{}'", temp_path.display()))?;
    let len = file
        .metadata()
        .wrap_err_with(|| format!("failed to stat temp file '{}'", temp_path.display()))?
        .len();

    // eager configuration check: offsets are i32, so anything larger can
    // never be addressed in the final files
    ensure!(
        len <= MAX_BUCKET_TEMP_BYTES,
        "bucket {} temp file is {} bytes, beyond the addressable {} — use more buckets",
        bucket,
        len,
        MAX_BUCKET_TEMP_BYTES
    );

    if len == 0 {
        fs::remove_file(&temp_path)
            .wrap_err_with(|| format!("failed to remove temp file '{}'", temp_path.display()))?;
        return Ok(None);
    }

    // SAFETY: the temp file is build-local: its single writer has closed it
    // before any sorter runs, and nothing else opens it. The mapping lives
    // only for the duration of this call.
    let map = unsafe { Mmap::map(&file) }
        .wrap_err_with(|| format!("failed to memory-map temp file '{}'", temp_path.display()))?;
    let data = &map[..];

    let mut entries = parse_descriptors(data, num_key_fields, bucket)?;

    // ties are byte-identical keys, so instability never reorders distinct keys
    entries.sort_unstable_by(|a, b| key_of(data, a).cmp(key_of(data, b)));

    // pre-pass: group maxima for buffer presizing and metadata statistics
    let mut max_group_size = 0u32;
    let mut max_payload = 0usize;
    let mut max_member_payload = 0usize;
    let mut start = 0usize;
    while start < entries.len() {
        let end = group_end(data, &entries, start);
        let group = &entries[start..end];
        max_group_size = max_group_size.max(group.len() as u32);

        let mut payload = 0usize;
        if grouping.is_counted() {
            payload += count_field_len(group.len() as u64);
        }
        for d in group.iter() {
            let member = codec::uncompressed_len(value_of(data, d)).wrap_err_with(|| {
                format!("malformed value field in bucket {} temp file", bucket)
            })?;
            max_member_payload = max_member_payload.max(member);
            match grouping {
                GroupingMode::Grouped { .. } => {
                    payload += crate::encoding::field_frame_len(member);
                }
                GroupingMode::Flat { .. } => {
                    // only the retained (last) member contributes
                    payload = if grouping.is_counted() {
                        count_field_len(group.len() as u64) + member
                    } else {
                        member
                    };
                }
            }
        }
        ensure!(
            payload <= u32::MAX as usize,
            "bucket {} group payload of {} bytes exceeds the representable size",
            bucket,
            payload
        );
        max_payload = max_payload.max(payload);
        start = end;
    }

    let records_path = dir.join(records_file_name(bucket));
    let offsets_path = dir.join(offsets_file_name(bucket));
    let mut records = BufWriter::new(File::create(&records_path).wrap_err_with(|| {
        format!("failed to create records file '{}'", records_path.display())
    })?);
    let mut offsets = BufWriter::new(File::create(&offsets_path).wrap_err_with(|| {
        format!("failed to create offsets file '{}'", offsets_path.display())
    })?);

    // sized once; the write loop never grows them
    let mut payload_buf: Vec<u8> = Vec::with_capacity(max_payload);
    let mut member_buf: Vec<u8> = Vec::with_capacity(max_member_payload);
    let mut value_field_buf: Vec<u8> = Vec::new();

    let mut offset = 0u64;
    let mut entries_written = 0u64;
    let mut start = 0usize;
    while start < entries.len() {
        let end = group_end(data, &entries, start);
        let group = &entries[start..end];
        let key = key_of(data, &group[0]);

        ensure!(
            offset <= i32::MAX as u64,
            "bucket {} records file exceeds the addressable offset range",
            bucket
        );
        offsets
            .write_all(&(offset as i32).to_le_bytes())
            .wrap_err("failed to write offsets file")?;

        records
            .write_all(key)
            .wrap_err("failed to write records file")?;
        offset += key.len() as u64;

        let value_field: &[u8] = match grouping {
            GroupingMode::Flat { counted: false } => value_of(data, &group[group.len() - 1]),
            GroupingMode::Flat { counted: true } => {
                payload_buf.clear();
                write_count_field(group.len() as u64, &mut payload_buf);
                let member =
                    codec::unpack_into(value_of(data, &group[group.len() - 1]), &mut member_buf)?;
                payload_buf.extend_from_slice(member);

                value_field_buf.clear();
                codec::pack(&payload_buf, &mut value_field_buf);
                &value_field_buf
            }
            GroupingMode::Grouped { counted, .. } => {
                payload_buf.clear();
                if *counted {
                    write_count_field(group.len() as u64, &mut payload_buf);
                }
                for d in group.iter() {
                    let member = codec::unpack_into(value_of(data, d), &mut member_buf)?;
                    write_field(MEMBER_FIELD_ID, TAG_BLOB, member, &mut payload_buf);
                }

                value_field_buf.clear();
                codec::pack(&payload_buf, &mut value_field_buf);
                &value_field_buf
            }
        };
        records
            .write_all(value_field)
            .wrap_err("failed to write records file")?;
        offset += value_field.len() as u64;

        entries_written += 1;
        start = end;
    }

    records
        .flush()
        .wrap_err_with(|| format!("failed to flush records file '{}'", records_path.display()))?;
    offsets
        .flush()
        .wrap_err_with(|| format!("failed to flush offsets file '{}'", offsets_path.display()))?;

    fs::remove_file(&temp_path)
        .wrap_err_with(|| format!("failed to remove temp file '{}'", temp_path.display()))?;

    Ok(Some(SortOutput {
        entries_written,
        max_group_size,
        max_value_bytes: max_payload as u32,
    }))
}

fn parse_descriptors(data: &[u8], num_key_fields: usize, bucket: u32) -> Result<Vec<Descriptor>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        ensure!(
            pos + 4 <= data.len(),
            "bucket {} temp file has a truncated length prefix at offset {}",
            bucket,
            pos
        );
        let entry_len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize; // INVARIANT: bounds checked above
        let start = pos + 4;
        let end = start + entry_len;
        ensure!(
            end <= data.len(),
            "bucket {} temp file has a truncated entry at offset {}",
            bucket,
            pos
        );

        let entry = &data[start..end];
        let key_len = fields_end(entry, num_key_fields).wrap_err_with(|| {
            format!(
                "bucket {} temp file has a malformed entry at offset {}",
                bucket, pos
            )
        })?;
        ensure!(
            key_len < entry.len(),
            "bucket {} temp entry at offset {} has no value field",
            bucket,
            pos
        );

        entries.push(Descriptor {
            start: start as u32,
            key_len: key_len as u32,
            len: entry_len as u32,
        });
        pos = end;
    }
    Ok(entries)
}

fn key_of<'a>(data: &'a [u8], d: &Descriptor) -> &'a [u8] {
    &data[d.start as usize..(d.start + d.key_len) as usize]
}

fn value_of<'a>(data: &'a [u8], d: &Descriptor) -> &'a [u8] {
    &data[(d.start + d.key_len) as usize..(d.start + d.len) as usize]
}

fn group_end(data: &[u8], entries: &[Descriptor], start: usize) -> usize {
    let key = key_of(data, &entries[start]);
    let mut end = start + 1;
    while end < entries.len() && key_of(data, &entries[end]) == key {
        end += 1;
    }
    end
}

fn count_field_len(count: u64) -> usize {
    crate::encoding::field_frame_len(crate::encoding::varint::varint_len(count))
}

fn write_count_field(count: u64, out: &mut Vec<u8>) {
    let mut payload = Vec::with_capacity(9);
    write_varint(count, &mut payload);
    write_field(COUNT_FIELD_ID, TAG_COUNT, &payload, out);
}
