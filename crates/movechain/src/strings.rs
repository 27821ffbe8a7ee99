//! Content-addressable UTF-8 interning store.
//!
//! File layout: published record count (8), then (hash: 8, length: 4,
//! bytes). The whole mapping loads into memory at open; new entries reach
//! disk at flush, and the count header is published only after them.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, ObjectKind, Result};
use crate::format::HashKind;

pub struct StringStore {
    path: PathBuf,
    kind: HashKind,
    map: HashMap<u64, Vec<u8>>,
    pending: Vec<u64>,
    published: u64,
    published_bytes: u64,
}

impl StringStore {
    pub fn open(path: impl AsRef<Path>, kind: HashKind) -> Result<StringStore> {
        let path = path.as_ref().to_path_buf();
        let mut store = StringStore {
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
            let mut data = vec![0u8; len as usize];
            reader.read_exact(&mut data)?;
            bytes += 8 + 4 + len as u64;
            self.map.insert(hash, data);
        }
        self.published = count;
        self.published_bytes = bytes;
        Ok(())
    }

    /// Intern `bytes`, returning its content hash. Duplicates collapse.
    pub fn intern(&mut self, bytes: &[u8]) -> u64 {
        let hash = self.kind.digest(bytes);
        if !self.map.contains_key(&hash) {
            self.map.insert(hash, bytes.to_vec());
            self.pending.push(hash);
        }
        hash
    }

    pub fn intern_str(&mut self, text: &str) -> u64 {
        self.intern(text.as_bytes())
    }

    pub fn lookup(&self, hash: u64) -> Result<&[u8]> {
        self.map
            .get(&hash)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::missing(ObjectKind::Text, hash))
    }

    pub fn lookup_str(&self, hash: u64) -> Result<&str> {
        std::str::from_utf8(self.lookup(hash)?)
            .map_err(|_| Error::Integrity(format!("text {hash:016x} is not valid utf-8")))
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

    /// Append pending records, then publish the new count.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        // Drop any unpublished tail a previous crash left behind.
        file.set_len(self.published_bytes.max(8))?;
        file.seek(SeekFrom::Start(self.published_bytes.max(8)))?;
        let mut appended = 0u64;
        {
            let mut writer = BufWriter::new(&mut file);
            for hash in &self.pending {
                let data = &self.map[hash];
                writer.write_u64::<LittleEndian>(*hash)?;
                writer.write_u32::<LittleEndian>(data.len() as u32)?;
                writer.write_all(data)?;
                appended += 8 + 4 + data.len() as u64;
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
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::StringStore;
    use crate::format::HashKind;

    #[test]
    fn intern_is_idempotent() {
        let tmp = tempdir().expect("tempdir");
        let mut store =
            StringStore::open(tmp.path().join("strings"), HashKind::Xxh64).expect("open");
        let a = store.intern_str("Ruy Lopez");
        let b = store.intern_str("Ruy Lopez");
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup_str(a).expect("present"), "Ruy Lopez");
    }

    #[test]
    fn survives_flush_and_reopen() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("strings");
        let hash = {
            let mut store = StringStore::open(&path, HashKind::Xxh64).expect("open");
            let hash = store.intern_str("good move");
            store.intern(b"");
            store.flush().expect("flush");
            hash
        };
        let store = StringStore::open(&path, HashKind::Xxh64).expect("reopen");
        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup_str(hash).expect("present"), "good move");
    }

    #[test]
    fn unflushed_entries_are_not_published() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("strings");
        {
            let mut store = StringStore::open(&path, HashKind::Xxh64).expect("open");
            store.intern_str("kept");
            store.flush().expect("flush");
            store.intern_str("lost");
        }
        let store = StringStore::open(&path, HashKind::Xxh64).expect("reopen");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_hash_is_not_found() {
        let tmp = tempdir().expect("tempdir");
        let store = StringStore::open(tmp.path().join("strings"), HashKind::Xxh64).expect("open");
        assert!(store.lookup(42).is_err());
    }
}
