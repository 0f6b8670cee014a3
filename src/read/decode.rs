//! # Entry Decoding
//!
//! Turns a stored entry's compressed value field back into live records:
//! decompress into a presized scratch buffer, peel off the structural
//! fields the sorter added (occurrence count, grouped members), and
//! translate the remaining field ids from the stored numbering to the
//! caller's live numbering.
//!
//! The scratch buffer is sized once from the generation's per-bucket
//! `max_value_bytes` statistic, so decoding never grows it — the metadata
//! arrays exist for exactly this.

use eyre::{bail, ensure, Result};

use crate::codec;
use crate::encoding::varint::read_varint;
use crate::encoding::{read_field, COUNT_FIELD_ID, MEMBER_FIELD_ID, TAG_BLOB, TAG_COUNT};
use crate::meta::{GenerationMeta, GroupingMode};
use crate::records::{FieldIdMap, OwnedRecord};

/// One decoded entry: a single member in flat mode, every merged member in
/// grouped mode, plus the occurrence count when the build recorded one.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEntry {
    pub occurrences: Option<u64>,
    pub members: Vec<OwnedRecord>,
}

#[derive(Debug)]
pub struct EntryDecoder {
    grouping: GroupingMode,
    id_map: FieldIdMap,
    payload_buf: Vec<u8>,
}

impl EntryDecoder {
    pub fn new(meta: &GenerationMeta, id_map: FieldIdMap) -> Self {
        let capacity = meta.max_value_bytes.iter().copied().max().unwrap_or(0) as usize;
        Self {
            grouping: meta.grouping.clone(),
            id_map,
            payload_buf: Vec::with_capacity(capacity),
        }
    }

    /// Fresh decoder with its own scratch buffer, for a replicated session.
    pub fn replicate(&self) -> Self {
        Self {
            grouping: self.grouping.clone(),
            id_map: self.id_map.clone(),
            payload_buf: Vec::with_capacity(self.payload_buf.capacity()),
        }
    }

    pub fn decode(&mut self, value_field: &[u8]) -> Result<DecodedEntry> {
        let Self {
            grouping,
            id_map,
            payload_buf,
        } = self;
        let payload = codec::unpack_into(value_field, payload_buf)?;

        let mut occurrences = None;
        let mut members = Vec::new();

        if grouping.is_grouped() {
            let mut pos = 0usize;
            while pos < payload.len() {
                let (raw, consumed) = read_field(&payload[pos..])?;
                pos += consumed;
                match raw.id {
                    COUNT_FIELD_ID => {
                        ensure!(raw.tag == TAG_COUNT, "count field has wrong tag");
                        let (count, _) = read_varint(raw.payload)?;
                        occurrences = Some(count);
                    }
                    MEMBER_FIELD_ID => {
                        ensure!(raw.tag == TAG_BLOB, "member field has wrong tag");
                        members.push(id_map.decode_payload(raw.payload)?);
                    }
                    other => bail!("unexpected field {:#06x} in grouped entry", other),
                }
            }
        } else {
            let mut body = payload;
            if !payload.is_empty() {
                let (raw, consumed) = read_field(payload)?;
                if raw.id == COUNT_FIELD_ID {
                    ensure!(raw.tag == TAG_COUNT, "count field has wrong tag");
                    let (count, _) = read_varint(raw.payload)?;
                    occurrences = Some(count);
                    body = &payload[consumed..];
                }
            }
            members.push(id_map.decode_payload(body)?);
        }

        Ok(DecodedEntry {
            occurrences,
            members,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::varint::write_varint;
    use crate::encoding::write_field;
    use crate::records::{OwnedValue, Schema};

    fn meta(grouping: GroupingMode) -> GenerationMeta {
        GenerationMeta {
            num_buckets: 1,
            entry_count: 0,
            key_fields: vec!["id".into()],
            value_fields: vec!["name".into()],
            grouping,
            max_group_size: vec![4],
            max_value_bytes: vec![256],
        }
    }

    fn packed(payload: &[u8]) -> Vec<u8> {
        let mut field = Vec::new();
        codec::pack(payload, &mut field);
        field
    }

    fn member_payload(name: &str) -> Vec<u8> {
        let s = Schema::new(&["id"], &["name"]).unwrap();
        s.value_builder()
            .text(name)
            .finish()
            .unwrap()
            .bytes()
            .to_vec()
    }

    #[test]
    fn flat_entry_decodes_one_member() {
        let mut decoder = EntryDecoder::new(
            &meta(GroupingMode::Flat { counted: false }),
            FieldIdMap::identity(2),
        );

        let entry = decoder.decode(&packed(&member_payload("ada"))).unwrap();
        assert_eq!(entry.occurrences, None);
        assert_eq!(entry.members.len(), 1);
        assert_eq!(
            entry.members[0].field(1),
            Some(&OwnedValue::Text("ada".into()))
        );
    }

    #[test]
    fn flat_counted_entry_surfaces_occurrences() {
        let mut decoder = EntryDecoder::new(
            &meta(GroupingMode::Flat { counted: true }),
            FieldIdMap::identity(2),
        );

        let mut payload = Vec::new();
        let mut count = Vec::new();
        write_varint(5, &mut count);
        write_field(COUNT_FIELD_ID, TAG_COUNT, &count, &mut payload);
        payload.extend_from_slice(&member_payload("ada"));

        let entry = decoder.decode(&packed(&payload)).unwrap();
        assert_eq!(entry.occurrences, Some(5));
        assert_eq!(entry.members.len(), 1);
    }

    #[test]
    fn grouped_entry_decodes_every_member() {
        let grouping = GroupingMode::Grouped {
            child_field: "visit".into(),
            counted: true,
        };
        let mut decoder = EntryDecoder::new(&meta(grouping), FieldIdMap::identity(2));

        let mut payload = Vec::new();
        let mut count = Vec::new();
        write_varint(2, &mut count);
        write_field(COUNT_FIELD_ID, TAG_COUNT, &count, &mut payload);
        write_field(MEMBER_FIELD_ID, TAG_BLOB, &member_payload("a"), &mut payload);
        write_field(MEMBER_FIELD_ID, TAG_BLOB, &member_payload("b"), &mut payload);

        let entry = decoder.decode(&packed(&payload)).unwrap();
        assert_eq!(entry.occurrences, Some(2));
        assert_eq!(entry.members.len(), 2);
        assert_eq!(
            entry.members[1].field(1),
            Some(&OwnedValue::Text("b".into()))
        );
    }

    #[test]
    fn grouped_entry_rejects_foreign_fields() {
        let grouping = GroupingMode::Grouped {
            child_field: "visit".into(),
            counted: false,
        };
        let mut decoder = EntryDecoder::new(&meta(grouping), FieldIdMap::identity(2));

        let mut payload = Vec::new();
        write_field(3, TAG_BLOB, b"stray", &mut payload);
        assert!(decoder.decode(&packed(&payload)).is_err());
    }

    #[test]
    fn id_translation_applies_to_members() {
        let stored = vec!["id".to_string(), "name".to_string()];
        let live = ["name"];
        let mut decoder = EntryDecoder::new(
            &meta(GroupingMode::Flat { counted: false }),
            FieldIdMap::build(&stored, &live),
        );

        let entry = decoder.decode(&packed(&member_payload("ada"))).unwrap();
        // stored id 1 ("name") became live id 0
        assert_eq!(
            entry.members[0].field(0),
            Some(&OwnedValue::Text("ada".into()))
        );
    }
}
