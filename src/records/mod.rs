//! # Named-Field Records
//!
//! KilnDB keys and values are **records**: ordered sequences of named, typed
//! fields serialized with the wire format in [`crate::encoding`]. A
//! [`Schema`] declares the key fields and value fields of one generation;
//! field ids are positional within the schema (key fields first), which
//! makes two records with identical serialized key fields byte-for-byte
//! equal — the property the sorter and the binary search both rely on.
//!
//! ## Building Records
//!
//! [`RecordBuilder`] appends typed fields in schema order and enforces the
//! declared field count at `finish()`:
//!
//! ```ignore
//! let schema = Schema::new(&["id"], &["name", "score"])?;
//! let key = schema.key_builder().int(42).finish()?;
//! let value = schema.value_builder().text("alice").float(0.9).finish()?;
//! ```
//!
//! ## Stored vs. Live Field Ids
//!
//! Inside a generation, field ids are positional in the *stored* schema. A
//! consuming pipeline numbers its fields independently; [`FieldIdMap`]
//! translates stored ids to live ids by matching field names. Stored fields
//! with no live counterpart are dropped during decode, and no live field is
//! ever fabricated.
//!
//! ## Key Comparison
//!
//! Keys compare as raw serialized bytes: unsigned lexicographic, with a
//! shorter prefix ordering first — exactly `<[u8]>::cmp`. No field-aware
//! comparison happens anywhere on the hot path.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use crate::encoding::varint::{read_varint, write_varint, zigzag_decode, zigzag_encode};
use crate::encoding::{
    read_field, write_field, FieldIter, RawField, TAG_BLOB, TAG_BOOL, TAG_COUNT, TAG_FLOAT,
    TAG_INT, TAG_TEXT,
};

/// Declared field layout of one generation: key fields first, then value
/// fields. Field ids are the positional index into this combined list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    key_fields: Vec<String>,
    value_fields: Vec<String>,
}

impl Schema {
    pub fn new<S: AsRef<str>>(key_fields: &[S], value_fields: &[S]) -> Result<Self> {
        ensure!(
            !key_fields.is_empty(),
            "schema requires at least one key field"
        );

        let key_fields: Vec<String> = key_fields.iter().map(|s| s.as_ref().to_string()).collect();
        let value_fields: Vec<String> =
            value_fields.iter().map(|s| s.as_ref().to_string()).collect();

        let mut seen = std::collections::HashSet::new();
        for name in key_fields.iter().chain(value_fields.iter()) {
            ensure!(!name.is_empty(), "empty field name in schema");
            ensure!(seen.insert(name.as_str()), "duplicate field name '{}'", name);
        }
        ensure!(
            key_fields.len() + value_fields.len() <= 0xFF00,
            "schema exceeds the assignable field-id range"
        );

        Ok(Self {
            key_fields,
            value_fields,
        })
    }

    pub fn num_key_fields(&self) -> usize {
        self.key_fields.len()
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn value_fields(&self) -> &[String] {
        &self.value_fields
    }

    /// Builder for a key record; fields must be appended in declared order.
    pub fn key_builder(&self) -> RecordBuilder {
        RecordBuilder::new(0, self.key_fields.len())
    }

    /// Builder for a value record; ids continue after the key fields.
    pub fn value_builder(&self) -> RecordBuilder {
        RecordBuilder::new(self.key_fields.len() as u16, self.value_fields.len())
    }
}

/// An owned, serialized record (a concatenation of framed fields).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    bytes: Vec<u8>,
}

impl Record {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(&self.bytes)
    }
}

/// Serializes typed fields with positional ids. `finish` fails unless the
/// expected number of fields was appended, so a record can never silently
/// drift from its schema.
pub struct RecordBuilder {
    bytes: Vec<u8>,
    next_id: u16,
    expected: usize,
    appended: usize,
}

impl RecordBuilder {
    fn new(first_id: u16, expected: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(64),
            next_id: first_id,
            expected,
            appended: 0,
        }
    }

    fn push(mut self, tag: u8, payload: &[u8]) -> Self {
        write_field(self.next_id, tag, payload, &mut self.bytes);
        self.next_id += 1;
        self.appended += 1;
        self
    }

    pub fn bool(self, v: bool) -> Self {
        self.push(TAG_BOOL, &[v as u8])
    }

    pub fn int(self, v: i64) -> Self {
        let mut payload = Vec::with_capacity(9);
        write_varint(zigzag_encode(v), &mut payload);
        self.push(TAG_INT, &payload)
    }

    pub fn float(self, v: f64) -> Self {
        self.push(TAG_FLOAT, &v.to_bits().to_le_bytes())
    }

    pub fn text(self, v: &str) -> Self {
        self.push(TAG_TEXT, v.as_bytes())
    }

    pub fn blob(self, v: &[u8]) -> Self {
        self.push(TAG_BLOB, v)
    }

    pub fn finish(self) -> Result<Record> {
        ensure!(
            self.appended == self.expected,
            "record has {} field(s), schema declares {}",
            self.appended,
            self.expected
        );
        Ok(Record { bytes: self.bytes })
    }
}

/// A decoded field value owning its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Count(u64),
}

impl OwnedValue {
    pub fn from_raw(field: &RawField<'_>) -> Result<Self> {
        Ok(match field.tag {
            TAG_BOOL => {
                ensure!(field.payload.len() == 1, "BOOL payload must be one byte");
                OwnedValue::Bool(field.payload[0] != 0)
            }
            TAG_INT => {
                let (raw, consumed) = read_varint(field.payload)?;
                ensure!(
                    consumed == field.payload.len(),
                    "trailing bytes in INT payload"
                );
                OwnedValue::Int(zigzag_decode(raw))
            }
            TAG_FLOAT => {
                ensure!(field.payload.len() == 8, "FLOAT payload must be 8 bytes");
                OwnedValue::Float(f64::from_bits(u64::from_le_bytes(
                    field.payload.try_into().unwrap(), // INVARIANT: length checked above
                )))
            }
            TAG_TEXT => OwnedValue::Text(std::str::from_utf8(field.payload)?.to_string()),
            TAG_BLOB => OwnedValue::Blob(field.payload.to_vec()),
            TAG_COUNT => {
                let (raw, consumed) = read_varint(field.payload)?;
                ensure!(
                    consumed == field.payload.len(),
                    "trailing bytes in COUNT payload"
                );
                OwnedValue::Count(raw)
            }
            other => bail!("unknown field type tag: {:#04x}", other),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnedField {
    pub id: u16,
    pub value: OwnedValue,
}

/// A fully decoded record with live field ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnedRecord {
    pub fields: SmallVec<[OwnedField; 8]>,
}

impl OwnedRecord {
    pub fn field(&self, id: u16) -> Option<&OwnedValue> {
        self.fields.iter().find(|f| f.id == id).map(|f| &f.value)
    }
}

/// Stored→live field-id translation built by matching names. Index is the
/// stored id; `None` drops the field during decode.
#[derive(Debug, Clone)]
pub struct FieldIdMap {
    mapping: Vec<Option<u16>>,
}

impl FieldIdMap {
    /// Identity map over `count` stored fields.
    pub fn identity(count: usize) -> Self {
        Self {
            mapping: (0..count as u16).map(Some).collect(),
        }
    }

    pub fn build<S: AsRef<str>>(stored: &[String], live: &[S]) -> Self {
        let mapping = stored
            .iter()
            .map(|name| {
                live.iter()
                    .position(|l| l.as_ref() == name)
                    .map(|idx| idx as u16)
            })
            .collect();
        Self { mapping }
    }

    pub fn translate(&self, stored_id: u16) -> Option<u16> {
        self.mapping.get(stored_id as usize).copied().flatten()
    }

    /// Decodes a serialized fields payload into an owned record with live
    /// ids. Stored fields without a live counterpart are skipped.
    pub fn decode_payload(&self, payload: &[u8]) -> Result<OwnedRecord> {
        let mut record = OwnedRecord::default();
        let mut pos = 0usize;
        while pos < payload.len() {
            let (raw, consumed) = read_field(&payload[pos..])?;
            pos += consumed;
            if let Some(live_id) = self.translate(raw.id) {
                record.fields.push(OwnedField {
                    id: live_id,
                    value: OwnedValue::from_raw(&raw)?,
                });
            }
        }
        Ok(record)
    }
}
