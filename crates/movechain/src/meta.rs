//! Sparse per-game metadata: header roster and annotation records.
//!
//! A metadata blob binds to a game's final move blob and carries the STR
//! roster, extra header tags, and annotation records sorted by mainline
//! move index. Records are a tagged sum dispatched on the type byte.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, ObjectKind, Result};
use crate::format::HashKind;

/// STR tag ids, in roster order.
pub const STR_TAG_NAMES: [&str; 7] = ["Event", "Site", "Date", "Round", "White", "Black", "Result"];

pub fn str_tag_id(name: &str) -> Option<u8> {
    STR_TAG_NAMES
        .iter()
        .position(|&n| n == name)
        .map(|i| i as u8)
}

const TYPE_COMMENT: u8 = 0;
const TYPE_NAG: u8 = 1;
const TYPE_VARIATION: u8 = 2;
const TYPE_NEWLINE: u8 = 3;

const TYPE_MASK: u8 = 0x07;
const FLAG_PRE: u8 = 0x08;
const FLAG_SEMICOLON: u8 = 0x10;
const FLAG_NEWLINE_AFTER: u8 = 0x20;

/// Payload of one annotation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPayload {
    Comment {
        text_hash: u64,
        pre: bool,
        semicolon: bool,
        line_break: bool,
    },
    Nag(u8),
    Variation {
        final_hash: u64,
        /// Zero when the variation carries no annotations of its own.
        meta_hash: u64,
    },
    LineBreak,
}

/// One annotation, anchored to a mainline move index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub move_index: u32,
    pub payload: RecordPayload,
}

impl AnnotationRecord {
    fn write(&self, out: &mut Vec<u8>) {
        write_varint(out, self.move_index as u64);
        match &self.payload {
            RecordPayload::Comment {
                text_hash,
                pre,
                semicolon,
                line_break,
            } => {
                let mut ty = TYPE_COMMENT;
                if *pre {
                    ty |= FLAG_PRE;
                }
                if *semicolon {
                    ty |= FLAG_SEMICOLON;
                }
                if *line_break {
                    ty |= FLAG_NEWLINE_AFTER;
                }
                out.push(ty);
                out.extend_from_slice(&text_hash.to_le_bytes());
            }
            RecordPayload::Nag(code) => {
                out.push(TYPE_NAG);
                out.push(*code);
            }
            RecordPayload::Variation {
                final_hash,
                meta_hash,
            } => {
                out.push(TYPE_VARIATION);
                out.extend_from_slice(&final_hash.to_le_bytes());
                out.extend_from_slice(&meta_hash.to_le_bytes());
            }
            RecordPayload::LineBreak => {
                out.push(TYPE_NEWLINE | FLAG_NEWLINE_AFTER);
            }
        }
    }

    fn read(buf: &mut &[u8]) -> Result<AnnotationRecord> {
        let move_index = read_varint(buf)?;
        if move_index > u32::MAX as u64 {
            return Err(Error::InvalidBlob("move index out of range"));
        }
        let ty = take_u8(buf)?;
        let payload = match ty & TYPE_MASK {
            TYPE_COMMENT => RecordPayload::Comment {
                pre: ty & FLAG_PRE != 0,
                semicolon: ty & FLAG_SEMICOLON != 0,
                line_break: ty & FLAG_NEWLINE_AFTER != 0,
                text_hash: take_u64(buf)?,
            },
            TYPE_NAG => RecordPayload::Nag(take_u8(buf)?),
            TYPE_VARIATION => RecordPayload::Variation {
                final_hash: take_u64(buf)?,
                meta_hash: take_u64(buf)?,
            },
            TYPE_NEWLINE => RecordPayload::LineBreak,
            _ => return Err(Error::InvalidBlob("unknown annotation record type")),
        };
        Ok(AnnotationRecord {
            move_index: move_index as u32,
            payload,
        })
    }
}

/// A complete metadata blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameMeta {
    pub final_hash: u64,
    /// (tag id, value hash), sorted by tag id. At most seven entries.
    pub str_tags: Vec<(u8, u64)>,
    /// (name hash, value hash), sorted by name hash.
    pub extra_tags: Vec<(u64, u64)>,
    /// Ascending by move index; ties keep insertion order.
    pub records: Vec<AnnotationRecord>,
}

impl GameMeta {
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.str_tags.len() <= STR_TAG_NAMES.len());
        let mut out = Vec::with_capacity(32 + self.records.len() * 10);
        out.extend_from_slice(&self.final_hash.to_le_bytes());
        out.push(self.str_tags.len() as u8);
        for (id, value_hash) in &self.str_tags {
            out.push(*id);
            out.extend_from_slice(&value_hash.to_le_bytes());
        }
        let mut count = [0u8; 2];
        LittleEndian::write_u16(&mut count, self.extra_tags.len() as u16);
        out.extend_from_slice(&count);
        for (name_hash, value_hash) in &self.extra_tags {
            out.extend_from_slice(&name_hash.to_le_bytes());
            out.extend_from_slice(&value_hash.to_le_bytes());
        }
        LittleEndian::write_u16(&mut count, self.records.len() as u16);
        out.extend_from_slice(&count);
        for record in &self.records {
            record.write(&mut out);
        }
        out
    }

    pub fn decode(mut buf: &[u8]) -> Result<GameMeta> {
        let buf = &mut buf;
        let final_hash = take_u64(buf)?;

        let str_count = take_u8(buf)? as usize;
        if str_count > STR_TAG_NAMES.len() {
            return Err(Error::InvalidBlob("tag roster too large"));
        }
        let mut str_tags = Vec::with_capacity(str_count);
        for _ in 0..str_count {
            let id = take_u8(buf)?;
            if id as usize >= STR_TAG_NAMES.len() {
                return Err(Error::InvalidBlob("tag id out of range"));
            }
            str_tags.push((id, take_u64(buf)?));
        }

        let extra_count = take_u16(buf)? as usize;
        let mut extra_tags = Vec::with_capacity(extra_count);
        for _ in 0..extra_count {
            extra_tags.push((take_u64(buf)?, take_u64(buf)?));
        }

        let record_count = take_u16(buf)? as usize;
        let mut records: Vec<AnnotationRecord> = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            let record = AnnotationRecord::read(buf)?;
            if records
                .last()
                .is_some_and(|last| last.move_index > record.move_index)
            {
                return Err(Error::InvalidBlob("annotation records out of order"));
            }
            records.push(record);
        }

        Ok(GameMeta {
            final_hash,
            str_tags,
            extra_tags,
            records,
        })
    }

    pub fn content_hash(&self, kind: HashKind) -> u64 {
        kind.digest(&self.encode())
    }
}

/// Content-addressed store of metadata blobs, persisted like the string
/// store: count header, then (hash, length, body) records.
pub struct MetaStore {
    path: PathBuf,
    kind: HashKind,
    map: HashMap<u64, GameMeta>,
    pending: Vec<u64>,
    published: u64,
    published_bytes: u64,
}

impl MetaStore {
    pub fn open(path: impl AsRef<Path>, kind: HashKind) -> Result<MetaStore> {
        let path = path.as_ref().to_path_buf();
        let mut store = MetaStore {
            path,
            kind,
            map: HashMap::new(),
            pending: Vec::new(),
            published: 0,
            published_bytes: 8,
        };
        if store.path.exists() {
            store.load()?;
        }
        Ok(store)
    }

    fn load(&mut self) -> Result<()> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let count = reader.read_u64::<LittleEndian>()?;
        let mut bytes = 8u64;
        for _ in 0..count {
            let hash = reader.read_u64::<LittleEndian>()?;
            let len = reader.read_u32::<LittleEndian>()?;
            let mut body = vec![0u8; len as usize];
            reader.read_exact(&mut body)?;
            bytes += 8 + 4 + len as u64;
            self.map.insert(hash, GameMeta::decode(&body)?);
        }
        self.published = count;
        self.published_bytes = bytes;
        Ok(())
    }

    /// Content-addressed insert; identical bodies deduplicate.
    pub fn put(&mut self, meta: GameMeta) -> u64 {
        let hash = meta.content_hash(self.kind);
        if !self.map.contains_key(&hash) {
            self.map.insert(hash, meta);
            self.pending.push(hash);
        }
        hash
    }

    pub fn get(&self, hash: u64) -> Result<&GameMeta> {
        self.map
            .get(&hash)
            .ok_or_else(|| Error::missing(ObjectKind::Metadata, hash))
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.map.contains_key(&hash)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        file.set_len(self.published_bytes.max(8))?;
        file.seek(SeekFrom::Start(self.published_bytes.max(8)))?;
        let mut appended = 0u64;
        {
            let mut writer = BufWriter::new(&mut file);
            for hash in &self.pending {
                let body = self.map[hash].encode();
                writer.write_u64::<LittleEndian>(*hash)?;
                writer.write_u32::<LittleEndian>(body.len() as u32)?;
                writer.write_all(&body)?;
                appended += 8 + 4 + body.len() as u64;
            }
            writer.flush()?;
        }
        file.sync_data()?;

        self.published += self.pending.len() as u64;
        self.published_bytes = self.published_bytes.max(8) + appended;
        file.seek(SeekFrom::Start(0))?;
        file.write_u64::<LittleEndian>(self.published)?;
        file.sync_data()?;
        self.pending.clear();
        Ok(())
    }

    /// Drop every record not in `keep` and rewrite the log. Requires a
    /// flushed store. Returns (kept, swept).
    pub fn retain(&mut self, keep: &HashSet<u64>) -> Result<(u64, u64)> {
        debug_assert!(self.pending.is_empty());
        let before = self.map.len() as u64;
        self.map.retain(|hash, _| keep.contains(hash));

        let tmp = self.path.with_extension("tmp");
        let mut bytes = 8u64;
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_u64::<LittleEndian>(self.map.len() as u64)?;
            for (hash, meta) in &self.map {
                let body = meta.encode();
                writer.write_u64::<LittleEndian>(*hash)?;
                writer.write_u32::<LittleEndian>(body.len() as u32)?;
                writer.write_all(&body)?;
                bytes += 8 + 4 + body.len() as u64;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        self.published = self.map.len() as u64;
        self.published_bytes = bytes;
        Ok((self.published, before - self.published))
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_varint(buf: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = take_u8(buf)?;
        if shift >= 64 {
            return Err(Error::InvalidBlob("varint overflow"));
        }
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(Error::InvalidBlob("truncated metadata record"));
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

fn take_u8(buf: &mut &[u8]) -> Result<u8> {
    Ok(take(buf, 1)?[0])
}

fn take_u16(buf: &mut &[u8]) -> Result<u16> {
    Ok(LittleEndian::read_u16(take(buf, 2)?))
}

fn take_u64(buf: &mut &[u8]) -> Result<u64> {
    Ok(LittleEndian::read_u64(take(buf, 8)?))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tempfile::tempdir;

    use super::{AnnotationRecord, GameMeta, MetaStore, RecordPayload, str_tag_id};
    use crate::format::HashKind;

    fn sample_meta() -> GameMeta {
        GameMeta {
            final_hash: 0xdead_beef,
            str_tags: vec![(0, 11), (6, 22)],
            extra_tags: vec![(5, 6), (7, 8)],
            records: vec![
                AnnotationRecord {
                    move_index: 3,
                    payload: RecordPayload::Comment {
                        text_hash: 99,
                        pre: false,
                        semicolon: true,
                        line_break: false,
                    },
                },
                AnnotationRecord {
                    move_index: 3,
                    payload: RecordPayload::Nag(14),
                },
                AnnotationRecord {
                    move_index: 200,
                    payload: RecordPayload::Variation {
                        final_hash: 123,
                        meta_hash: 0,
                    },
                },
                AnnotationRecord {
                    move_index: 200,
                    payload: RecordPayload::LineBreak,
                },
            ],
        }
    }

    #[test]
    fn meta_round_trips() {
        let meta = sample_meta();
        let decoded = GameMeta::decode(&meta.encode()).expect("decodes");
        assert_eq!(decoded, meta);
    }

    #[test]
    fn varint_indices_round_trip_across_width_boundaries() {
        for index in [0u32, 1, 127, 128, 16_383, 16_384, 1 << 20] {
            let meta = GameMeta {
                records: vec![AnnotationRecord {
                    move_index: index,
                    payload: RecordPayload::LineBreak,
                }],
                ..GameMeta::default()
            };
            let decoded = GameMeta::decode(&meta.encode()).expect("decodes");
            assert_eq!(decoded.records[0].move_index, index);
        }
    }

    #[test]
    fn out_of_order_records_are_rejected() {
        let mut meta = sample_meta();
        meta.records.swap(0, 2);
        assert!(GameMeta::decode(&meta.encode()).is_err());
    }

    #[test]
    fn truncated_bodies_are_rejected() {
        let body = sample_meta().encode();
        for cut in [0, 5, 9, body.len() - 1] {
            assert!(GameMeta::decode(&body[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn identical_bodies_deduplicate() {
        let tmp = tempdir().expect("tempdir");
        let mut store = MetaStore::open(tmp.path().join("metadata"), HashKind::Xxh64).expect("open");
        let a = store.put(sample_meta());
        let b = store.put(sample_meta());
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn survives_flush_and_reopen() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("metadata");
        let hash = {
            let mut store = MetaStore::open(&path, HashKind::Xxh64).expect("open");
            let hash = store.put(sample_meta());
            store.flush().expect("flush");
            hash
        };
        let store = MetaStore::open(&path, HashKind::Xxh64).expect("reopen");
        assert_eq!(store.get(hash).expect("present"), &sample_meta());
    }

    #[test]
    fn retain_sweeps_unmarked_records() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("metadata");
        let mut store = MetaStore::open(&path, HashKind::Xxh64).expect("open");
        let kept = store.put(sample_meta());
        let dropped = store.put(GameMeta {
            final_hash: 1,
            ..GameMeta::default()
        });
        store.flush().expect("flush");

        let keep: HashSet<u64> = [kept].into_iter().collect();
        let (k, s) = store.retain(&keep).expect("retain");
        assert_eq!((k, s), (1, 1));
        assert!(store.contains(kept));
        assert!(!store.contains(dropped));

        let store = MetaStore::open(&path, HashKind::Xxh64).expect("reopen");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn roster_ids_map_to_names() {
        assert_eq!(str_tag_id("Event"), Some(0));
        assert_eq!(str_tag_id("Result"), Some(6));
        assert_eq!(str_tag_id("WhiteElo"), None);
    }
}
