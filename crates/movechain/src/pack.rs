//! The blob pack and its sorted hash index.
//!
//! Reads go through a memory-mapped view bounded by the published blob
//! count in the pack header. Writes buffer in memory and reach disk at
//! flush: blob append, sorted-index rewrite (temp file + rename), then
//! header publish, in that order. A reader observing a published count
//! sees a fully sorted index prefix for exactly those blobs.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use tracing::debug;

use crate::blob::MoveBlob;
use crate::error::{Error, ObjectKind, Result};
use crate::format::{
    BLOB_LEN, HashKind, IndexEntry, PACK_COUNT_OFFSET, PACK_HEADER_LEN, PACK_MAGIC, VERSION,
};

const FANOUT_LEN: usize = 1 << 16;

pub struct PackFile {
    pack_path: PathBuf,
    idx_path: PathBuf,
    kind: HashKind,
    map: Mmap,
    entries: Vec<IndexEntry>,
    fanout: Vec<u32>,
    published: u64,
    pending: HashMap<u64, MoveBlob>,
    pending_order: Vec<u64>,
}

impl PackFile {
    /// Create an empty pack + index pair, then open it.
    pub fn create(
        pack_path: impl AsRef<Path>,
        idx_path: impl AsRef<Path>,
        kind: HashKind,
    ) -> Result<PackFile> {
        let mut header = [0u8; PACK_HEADER_LEN];
        header[..4].copy_from_slice(PACK_MAGIC);
        LittleEndian::write_u16(&mut header[4..6], VERSION);
        LittleEndian::write_u64(&mut header[6..14], 0);
        let mut file = File::create(pack_path.as_ref())?;
        file.write_all(&header)?;
        file.sync_all()?;
        File::create(idx_path.as_ref())?.sync_all()?;
        PackFile::open(pack_path, idx_path, kind)
    }

    pub fn open(
        pack_path: impl AsRef<Path>,
        idx_path: impl AsRef<Path>,
        kind: HashKind,
    ) -> Result<PackFile> {
        let pack_path = pack_path.as_ref().to_path_buf();
        let idx_path = idx_path.as_ref().to_path_buf();

        let file = File::open(&pack_path)?;
        let mut header = [0u8; PACK_HEADER_LEN];
        (&file).read_exact(&mut header)?;
        if &header[..4] != PACK_MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = LittleEndian::read_u16(&header[4..6]);
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let published = LittleEndian::read_u64(&header[6..14]);

        let map = unsafe { Mmap::map(&file)? };
        let published_end = PACK_HEADER_LEN as u64 + published * BLOB_LEN as u64;
        if (map.len() as u64) < published_end {
            return Err(Error::Integrity(format!(
                "pack shorter than its published count ({published} blobs)"
            )));
        }

        let entries = read_index(&idx_path, published_end)?;
        if entries.len() as u64 != published {
            return Err(Error::Integrity(format!(
                "index holds {} entries for {published} published blobs",
                entries.len()
            )));
        }
        let fanout = build_fanout(&entries);

        Ok(PackFile {
            pack_path,
            idx_path,
            kind,
            map,
            entries,
            fanout,
            published,
            pending: HashMap::new(),
            pending_order: Vec::new(),
        })
    }

    /// Published + pending blob count.
    pub fn len(&self) -> u64 {
        self.published + self.pending.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn pack_bytes(&self) -> u64 {
        PACK_HEADER_LEN as u64 + self.len() * BLOB_LEN as u64
    }

    pub fn exists(&self, hash: u64) -> bool {
        self.pending.contains_key(&hash) || self.find(hash).is_some()
    }

    pub fn get(&self, hash: u64) -> Result<MoveBlob> {
        if let Some(blob) = self.pending.get(&hash) {
            return Ok(blob.clone());
        }
        let entry = self
            .find(hash)
            .ok_or_else(|| Error::missing(ObjectKind::Blob, hash))?;
        self.read_at(entry.offset)
    }

    /// Content-addressed insert: returns the existing hash when the blob
    /// is already stored, otherwise queues it for the next flush.
    pub fn put(&mut self, blob: MoveBlob) -> u64 {
        let hash = blob.content_hash(self.kind);
        if self.exists(hash) {
            debug!(hash = %format_args!("{hash:016x}"), "blob deduplicated");
            return hash;
        }
        self.pending.insert(hash, blob);
        self.pending_order.push(hash);
        hash
    }

    /// Lazy walk over every stored blob, published first, then pending.
    pub fn iter_all(&self) -> impl Iterator<Item = Result<(u64, MoveBlob)>> + '_ {
        let published = self
            .entries
            .iter()
            .map(move |e| self.read_at(e.offset).map(|blob| (e.hash, blob)));
        let pending = self
            .pending_order
            .iter()
            .map(move |hash| Ok((*hash, self.pending[hash].clone())));
        published.chain(pending)
    }

    /// Append pending blobs, rebuild the sorted index, publish the count.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.pack_path)?;
        let published_end = PACK_HEADER_LEN as u64 + self.published * BLOB_LEN as u64;
        // Drop any unpublished tail a previous crash left behind.
        file.set_len(published_end)?;
        file.seek(SeekFrom::Start(published_end))?;

        let mut appended = Vec::with_capacity(self.pending_order.len());
        {
            let mut writer = BufWriter::new(&mut file);
            let mut offset = published_end;
            for hash in &self.pending_order {
                writer.write_all(&self.pending[hash].encode())?;
                appended.push(IndexEntry {
                    hash: *hash,
                    offset,
                });
                offset += BLOB_LEN as u64;
            }
            writer.flush()?;
        }
        file.sync_data()?;

        let mut merged = self.entries.clone();
        merged.extend(appended);
        merged.sort_by_key(|e| e.hash);
        write_index(&self.idx_path, &merged)?;

        let count = self.published + self.pending_order.len() as u64;
        file.seek(SeekFrom::Start(PACK_COUNT_OFFSET))?;
        file.write_u64::<LittleEndian>(count)?;
        file.sync_data()?;

        self.published = count;
        self.fanout = build_fanout(&merged);
        self.entries = merged;
        self.pending.clear();
        self.pending_order.clear();
        self.map = unsafe { Mmap::map(&File::open(&self.pack_path)?)? };
        Ok(())
    }

    /// Rewrite the pack keeping only `keep`, swapping the new files into
    /// place atomically. Requires a flushed pack. Returns (kept, swept).
    pub fn rewrite(&mut self, keep: &std::collections::HashSet<u64>) -> Result<(u64, u64)> {
        debug_assert!(self.pending.is_empty());

        let kept: Vec<IndexEntry> = self
            .entries
            .iter()
            .filter(|e| keep.contains(&e.hash))
            .copied()
            .collect();
        let swept = self.entries.len() as u64 - kept.len() as u64;

        let pack_tmp = self.pack_path.with_extension("tmp");
        let mut entries = Vec::with_capacity(kept.len());
        {
            let mut writer = BufWriter::new(File::create(&pack_tmp)?);
            let mut header = [0u8; PACK_HEADER_LEN];
            header[..4].copy_from_slice(PACK_MAGIC);
            LittleEndian::write_u16(&mut header[4..6], VERSION);
            LittleEndian::write_u64(&mut header[6..14], kept.len() as u64);
            writer.write_all(&header)?;
            let mut offset = PACK_HEADER_LEN as u64;
            for entry in &kept {
                let blob = self.read_at(entry.offset)?;
                writer.write_all(&blob.encode())?;
                entries.push(IndexEntry {
                    hash: entry.hash,
                    offset,
                });
                offset += BLOB_LEN as u64;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        entries.sort_by_key(|e| e.hash);
        std::fs::rename(&pack_tmp, &self.pack_path)?;
        write_index(&self.idx_path, &entries)?;

        self.published = entries.len() as u64;
        self.fanout = build_fanout(&entries);
        self.entries = entries;
        self.map = unsafe { Mmap::map(&File::open(&self.pack_path)?)? };
        Ok((self.published, swept))
    }

    fn find(&self, hash: u64) -> Option<&IndexEntry> {
        let bucket = (hash >> 48) as usize;
        let lo = self.fanout[bucket] as usize;
        let hi = if bucket + 1 < FANOUT_LEN {
            self.fanout[bucket + 1] as usize
        } else {
            self.entries.len()
        };
        let slice = &self.entries[lo..hi];
        slice
            .binary_search_by_key(&hash, |e| e.hash)
            .ok()
            .map(|i| &slice[i])
    }

    fn read_at(&self, offset: u64) -> Result<MoveBlob> {
        let start = offset as usize;
        let end = start + BLOB_LEN;
        if start < PACK_HEADER_LEN || end > self.map.len() {
            return Err(Error::Integrity(format!(
                "blob offset {offset} out of bounds"
            )));
        }
        let mut buf = [0u8; BLOB_LEN];
        buf.copy_from_slice(&self.map[start..end]);
        MoveBlob::decode(&buf)
    }
}

fn read_index(path: &Path, published_end: u64) -> Result<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    loop {
        let hash = match reader.read_u64::<LittleEndian>() {
            Ok(hash) => hash,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let offset = reader.read_u64::<LittleEndian>()?;
        // Entries past the published pack prefix belong to an unpublished
        // flush; skip them.
        if offset + BLOB_LEN as u64 > published_end {
            continue;
        }
        if entries.last().is_some_and(|last| last.hash >= hash) {
            return Err(Error::Integrity("index is not sorted".to_string()));
        }
        entries.push(IndexEntry { hash, offset });
    }
    Ok(entries)
}

fn write_index(path: &Path, entries: &[IndexEntry]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for entry in entries {
            writer.write_u64::<LittleEndian>(entry.hash)?;
            writer.write_u64::<LittleEndian>(entry.offset)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn build_fanout(entries: &[IndexEntry]) -> Vec<u32> {
    let mut fanout = vec![0u32; FANOUT_LEN];
    let mut pos = 0usize;
    for (bucket, slot) in fanout.iter_mut().enumerate() {
        while pos < entries.len() && (entries[pos].hash >> 48) < bucket as u64 {
            pos += 1;
        }
        *slot = pos as u32;
    }
    fanout
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use gametree::{GameResult, PackedMove};
    use tempfile::tempdir;

    use super::PackFile;
    use crate::blob::MoveBlob;
    use crate::format::HashKind;

    fn blob(parent: u64, seed: u64) -> MoveBlob {
        let moves = (0..5)
            .map(|i| {
                PackedMove::pack(
                    ((seed + i) % 64) as u8,
                    ((seed + i + 8) % 64) as u8,
                    Default::default(),
                )
                .expect("valid move")
            })
            .collect();
        MoveBlob::new(parent, seed.wrapping_mul(0x9e37), moves, GameResult::Unknown)
    }

    #[test]
    fn put_get_exists() {
        let tmp = tempdir().expect("tempdir");
        let mut pack = PackFile::create(
            tmp.path().join("moves"),
            tmp.path().join("idx"),
            HashKind::Xxh64,
        )
        .expect("create");

        let b = blob(0, 1);
        let hash = pack.put(b.clone());
        assert!(pack.exists(hash));
        assert_eq!(pack.get(hash).expect("present"), b);
        assert!(pack.get(hash ^ 1).is_err());
    }

    #[test]
    fn identical_content_deduplicates() {
        let tmp = tempdir().expect("tempdir");
        let mut pack = PackFile::create(
            tmp.path().join("moves"),
            tmp.path().join("idx"),
            HashKind::Xxh64,
        )
        .expect("create");

        let first = pack.put(blob(7, 3));
        let second = pack.put(blob(7, 3));
        assert_eq!(first, second);
        assert_eq!(pack.len(), 1);
    }

    #[test]
    fn flush_reopen_and_fanout_lookup() {
        let tmp = tempdir().expect("tempdir");
        let pack_path = tmp.path().join("moves");
        let idx_path = tmp.path().join("idx");

        let mut hashes = Vec::new();
        {
            let mut pack =
                PackFile::create(&pack_path, &idx_path, HashKind::Xxh64).expect("create");
            for seed in 0u64..300 {
                hashes.push(pack.put(blob(seed, seed)));
            }
            pack.flush().expect("flush");
        }

        let pack = PackFile::open(&pack_path, &idx_path, HashKind::Xxh64).expect("reopen");
        assert_eq!(pack.published(), 300);
        for (seed, hash) in hashes.iter().enumerate() {
            let got = pack.get(*hash).expect("published blob");
            assert_eq!(got, blob(seed as u64, seed as u64));
        }
        assert_eq!(pack.iter_all().count(), 300);
    }

    #[test]
    fn unflushed_blobs_are_not_published() {
        let tmp = tempdir().expect("tempdir");
        let pack_path = tmp.path().join("moves");
        let idx_path = tmp.path().join("idx");
        let kept;
        {
            let mut pack =
                PackFile::create(&pack_path, &idx_path, HashKind::Xxh64).expect("create");
            kept = pack.put(blob(0, 1));
            pack.flush().expect("flush");
            pack.put(blob(0, 2));
        }
        let pack = PackFile::open(&pack_path, &idx_path, HashKind::Xxh64).expect("reopen");
        assert_eq!(pack.published(), 1);
        assert!(pack.exists(kept));
    }

    #[test]
    fn rewrite_keeps_only_marked_blobs() {
        let tmp = tempdir().expect("tempdir");
        let mut pack = PackFile::create(
            tmp.path().join("moves"),
            tmp.path().join("idx"),
            HashKind::Xxh64,
        )
        .expect("create");

        let keep_hash = pack.put(blob(0, 1));
        let drop_hash = pack.put(blob(0, 2));
        pack.flush().expect("flush");

        let keep: HashSet<u64> = [keep_hash].into_iter().collect();
        let (kept, swept) = pack.rewrite(&keep).expect("rewrite");
        assert_eq!((kept, swept), (1, 1));
        assert!(pack.exists(keep_hash));
        assert!(!pack.exists(drop_hash));
    }
}
