//! # Generation Metadata
//!
//! One `kiln.meta` file per generation directory, written as the final act
//! of a build. Readers treat a directory without a readable, checksum-valid
//! metadata file as absent — that single rule is the whole story of
//! incomplete-generation detection, since a failed build simply never gets
//! this far.
//!
//! ## File Layout
//!
//! ```text
//! +----------------------+
//! | MetaHeader (64B)     |  magic, version, counts, grouping, body_len
//! +----------------------+
//! | Body (variable)      |  field names, child name, per-bucket arrays
//! +----------------------+
//! | crc64 (8B LE)        |  CRC_64_ECMA_182 over header + body
//! +----------------------+
//! ```
//!
//! Body contents, in order: key field names, grouped-mode child field name
//! (empty string in flat modes), value field names (varint count first),
//! then two `u32 LE` arrays of `num_buckets` elements each — the largest
//! group size and the largest uncompressed value payload seen in every
//! bucket. The arrays let readers presize decode buffers once instead of
//! growing them incrementally.
//!
//! All strings are varint-length-prefixed UTF-8.

use std::fs;
use std::path::Path;

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{bail, ensure, Result, WrapErr};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::encoding::varint::{read_varint, write_varint};
use crate::records::Schema;

pub const META_FILE_NAME: &str = "kiln.meta";
pub const META_MAGIC: &[u8; 16] = b"KilnDB Meta\x00\x00\x00\x00\x00";
pub const CURRENT_VERSION: u32 = 1;

const META_HEADER_SIZE: usize = 64;
const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// How duplicate keys were merged when the generation was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupingMode {
    /// One stored value per key. The retained member among duplicates is
    /// whichever the sorter's tie handling leaves last in the group —
    /// arbitrary by contract; callers needing determinism must not insert
    /// duplicate keys in flat mode. With `counted`, the stored payload is
    /// prefixed with the true occurrence count.
    Flat { counted: bool },
    /// Every value sharing a key is retained as one member per occurrence,
    /// packed under `child_field`; with `counted`, a `<child>Count` field
    /// leads the payload.
    Grouped { child_field: String, counted: bool },
}

impl GroupingMode {
    pub fn is_grouped(&self) -> bool {
        matches!(self, GroupingMode::Grouped { .. })
    }

    pub fn is_counted(&self) -> bool {
        match self {
            GroupingMode::Flat { counted } => *counted,
            GroupingMode::Grouped { counted, .. } => *counted,
        }
    }

    fn discriminant(&self) -> u32 {
        match self {
            GroupingMode::Flat { counted: false } => 0,
            GroupingMode::Flat { counted: true } => 1,
            GroupingMode::Grouped { counted: false, .. } => 2,
            GroupingMode::Grouped { counted: true, .. } => 3,
        }
    }

    fn child_field(&self) -> &str {
        match self {
            GroupingMode::Flat { .. } => "",
            GroupingMode::Grouped { child_field, .. } => child_field,
        }
    }

    fn from_parts(discriminant: u32, child_field: String) -> Result<Self> {
        Ok(match discriminant {
            0 => GroupingMode::Flat { counted: false },
            1 => GroupingMode::Flat { counted: true },
            2 => GroupingMode::Grouped {
                child_field,
                counted: false,
            },
            3 => GroupingMode::Grouped {
                child_field,
                counted: true,
            },
            other => bail!("unknown grouping discriminant: {}", other),
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct MetaHeader {
    magic: [u8; 16],
    version: U32,
    num_buckets: U32,
    entry_count: U64,
    key_field_count: U32,
    grouping: U32,
    body_len: U32,
    reserved: [u8; 20],
}

const _: () = assert!(std::mem::size_of::<MetaHeader>() == META_HEADER_SIZE);

/// Everything a reader needs to know about one finished generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationMeta {
    pub num_buckets: u32,
    pub entry_count: u64,
    pub key_fields: Vec<String>,
    pub value_fields: Vec<String>,
    pub grouping: GroupingMode,
    /// Largest equal-key group merged into any entry, per bucket.
    pub max_group_size: Vec<u32>,
    /// Largest uncompressed value payload of any entry, per bucket.
    pub max_value_bytes: Vec<u32>,
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    write_varint(s.len() as u64, out);
    out.extend_from_slice(s.as_bytes());
}

fn read_string(buf: &[u8], pos: &mut usize) -> Result<String> {
    let (len, consumed) = read_varint(&buf[*pos..])?;
    *pos += consumed;
    let end = *pos + len as usize;
    ensure!(end <= buf.len(), "truncated string in metadata body");
    let s = std::str::from_utf8(&buf[*pos..end])
        .wrap_err("metadata string is not valid UTF-8")?
        .to_string();
    *pos = end;
    Ok(s)
}

impl GenerationMeta {
    /// Stored schema of the generation, for building field-id translations.
    pub fn schema(&self) -> Result<Schema> {
        Schema::new(&self.key_fields, &self.value_fields)
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        ensure!(
            self.max_group_size.len() == self.num_buckets as usize
                && self.max_value_bytes.len() == self.num_buckets as usize,
            "per-bucket statistics arrays must have {} elements",
            self.num_buckets
        );

        let mut body = Vec::new();
        for name in &self.key_fields {
            write_string(name, &mut body);
        }
        write_string(self.grouping.child_field(), &mut body);
        write_varint(self.value_fields.len() as u64, &mut body);
        for name in &self.value_fields {
            write_string(name, &mut body);
        }
        for &v in &self.max_group_size {
            body.extend_from_slice(&v.to_le_bytes());
        }
        for &v in &self.max_value_bytes {
            body.extend_from_slice(&v.to_le_bytes());
        }

        let header = MetaHeader {
            magic: *META_MAGIC,
            version: U32::new(CURRENT_VERSION),
            num_buckets: U32::new(self.num_buckets),
            entry_count: U64::new(self.entry_count),
            key_field_count: U32::new(self.key_fields.len() as u32),
            grouping: U32::new(self.grouping.discriminant()),
            body_len: U32::new(body.len() as u32),
            reserved: [0u8; 20],
        };

        let mut bytes = Vec::with_capacity(META_HEADER_SIZE + body.len() + 8);
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&body);
        let checksum = CRC64.checksum(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());

        let path = dir.join(META_FILE_NAME);
        fs::write(&path, &bytes)
            .wrap_err_with(|| format!("failed to write metadata file '{}'", path.display()))?;
        Ok(())
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(META_FILE_NAME);
        let bytes = fs::read(&path)
            .wrap_err_with(|| format!("failed to read metadata file '{}'", path.display()))?;

        ensure!(
            bytes.len() >= META_HEADER_SIZE + 8,
            "metadata file '{}' is truncated ({} bytes)",
            path.display(),
            bytes.len()
        );

        let header = MetaHeader::ref_from_bytes(&bytes[..META_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse metadata header: {:?}", e))?;
        ensure!(
            &header.magic == META_MAGIC,
            "invalid magic bytes in '{}'",
            path.display()
        );
        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported metadata version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );

        let body_len = header.body_len.get() as usize;
        let payload_end = META_HEADER_SIZE + body_len;
        ensure!(
            bytes.len() == payload_end + 8,
            "metadata file '{}' length {} does not match header",
            path.display(),
            bytes.len()
        );

        let stored_crc = u64::from_le_bytes(bytes[payload_end..].try_into().unwrap()); // INVARIANT: exact length checked
        let actual_crc = CRC64.checksum(&bytes[..payload_end]);
        ensure!(
            stored_crc == actual_crc,
            "metadata checksum mismatch in '{}' (generation is incomplete or corrupt)",
            path.display()
        );

        let num_buckets = header.num_buckets.get();
        ensure!(num_buckets > 0, "metadata declares zero buckets");

        let body = &bytes[META_HEADER_SIZE..payload_end];
        let mut pos = 0usize;

        let key_fields: Vec<String> = (0..header.key_field_count.get())
            .map(|_| read_string(body, &mut pos))
            .collect::<Result<_>>()?;
        ensure!(!key_fields.is_empty(), "metadata declares no key fields");

        let child_field = read_string(body, &mut pos)?;
        let (value_field_count, consumed) = read_varint(&body[pos..])?;
        pos += consumed;
        let value_fields: Vec<String> = (0..value_field_count)
            .map(|_| read_string(body, &mut pos))
            .collect::<Result<_>>()?;

        let array_bytes = num_buckets as usize * 4;
        ensure!(
            body.len() == pos + 2 * array_bytes,
            "metadata body length mismatch"
        );
        let mut read_array = |pos: &mut usize| -> Vec<u32> {
            (0..num_buckets)
                .map(|_| {
                    let v = u32::from_le_bytes(body[*pos..*pos + 4].try_into().unwrap()); // INVARIANT: length checked above
                    *pos += 4;
                    v
                })
                .collect()
        };
        let max_group_size = read_array(&mut pos);
        let max_value_bytes = read_array(&mut pos);

        Ok(Self {
            num_buckets,
            entry_count: header.entry_count.get(),
            key_fields,
            value_fields,
            grouping: GroupingMode::from_parts(header.grouping.get(), child_field)?,
            max_group_size,
            max_value_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_meta() -> GenerationMeta {
        GenerationMeta {
            num_buckets: 4,
            entry_count: 12345,
            key_fields: vec!["id".into(), "region".into()],
            value_fields: vec!["name".into(), "score".into()],
            grouping: GroupingMode::Grouped {
                child_field: "visit".into(),
                counted: true,
            },
            max_group_size: vec![3, 1, 0, 9],
            max_value_bytes: vec![100, 2048, 0, 77],
        }
    }

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let meta = sample_meta();
        meta.write(dir.path()).unwrap();

        let restored = GenerationMeta::read(dir.path()).unwrap();
        assert_eq!(restored, meta);
    }

    #[test]
    fn flat_mode_roundtrip() {
        let dir = tempdir().unwrap();
        let meta = GenerationMeta {
            grouping: GroupingMode::Flat { counted: false },
            ..sample_meta()
        };
        meta.write(dir.path()).unwrap();

        let restored = GenerationMeta::read(dir.path()).unwrap();
        assert_eq!(restored.grouping, GroupingMode::Flat { counted: false });
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(GenerationMeta::read(dir.path()).is_err());
    }

    #[test]
    fn corrupt_body_fails_checksum() {
        let dir = tempdir().unwrap();
        sample_meta().write(dir.path()).unwrap();

        let path = dir.path().join(META_FILE_NAME);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[META_HEADER_SIZE + 2] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = GenerationMeta::read(dir.path()).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn truncated_file_is_an_error() {
        let dir = tempdir().unwrap();
        sample_meta().write(dir.path()).unwrap();

        let path = dir.path().join(META_FILE_NAME);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        assert!(GenerationMeta::read(dir.path()).is_err());
    }

    #[test]
    fn write_rejects_mismatched_arrays() {
        let dir = tempdir().unwrap();
        let mut meta = sample_meta();
        meta.max_group_size.pop();
        assert!(meta.write(dir.path()).is_err());
    }

    #[test]
    fn schema_reconstructs_from_field_names() {
        let meta = sample_meta();
        let schema = meta.schema().unwrap();
        assert_eq!(schema.num_key_fields(), 2);
        assert_eq!(schema.value_fields(), &["name".to_string(), "score".into()]);
    }
}
