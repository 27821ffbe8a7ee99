//! Game registry: external game-id → (final blob hash, metadata hash).
//!
//! Persisted as a length-prefixed key-value log behind a published count;
//! the in-memory map is rebuilt by replaying the log at open, with later
//! records for the same id winning.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

pub struct Registry {
    path: PathBuf,
    map: HashMap<String, (u64, u64)>,
    order: Vec<String>,
    pending: Vec<String>,
    published: u64,
    published_bytes: u64,
}

impl Registry {
    pub fn open(path: impl AsRef<Path>) -> Result<Registry> {
        let path = path.as_ref().to_path_buf();
        let mut registry = Registry {
            path,
            map: HashMap::new(),
            order: Vec::new(),
            pending: Vec::new(),
            published: 0,
            published_bytes: 8,
        };
        if registry.path.exists() {
            registry.load()?;
        }
        Ok(registry)
    }

    fn load(&mut self) -> Result<()> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let count = reader.read_u64::<LittleEndian>()?;
        let mut bytes = 8u64;
        for _ in 0..count {
            let len = reader.read_u16::<LittleEndian>()? as usize;
            let mut id = vec![0u8; len];
            reader.read_exact(&mut id)?;
            let id = String::from_utf8(id)
                .map_err(|_| Error::Integrity("registry id is not valid utf-8".to_string()))?;
            let final_hash = reader.read_u64::<LittleEndian>()?;
            let meta_hash = reader.read_u64::<LittleEndian>()?;
            bytes += 2 + len as u64 + 16;
            if self.map.insert(id.clone(), (final_hash, meta_hash)).is_none() {
                self.order.push(id);
            }
        }
        self.published = count;
        self.published_bytes = bytes;
        Ok(())
    }

    pub fn insert(&mut self, id: &str, final_hash: u64, meta_hash: u64) -> Result<()> {
        if self.map.contains_key(id) {
            return Err(Error::DuplicateGameId(id.to_string()));
        }
        self.map.insert(id.to_string(), (final_hash, meta_hash));
        self.order.push(id.to_string());
        self.pending.push(id.to_string());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<(u64, u64)> {
        self.map
            .get(id)
            .copied()
            .ok_or_else(|| Error::GameNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.map.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Registered ids in registration order.
    pub fn games(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// (id, final hash, metadata hash) in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64, u64)> {
        self.order.iter().map(|id| {
            let (final_hash, meta_hash) = self.map[id];
            (id.as_str(), final_hash, meta_hash)
        })
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
            for id in &self.pending {
                let (final_hash, meta_hash) = self.map[id];
                writer.write_u16::<LittleEndian>(id.len() as u16)?;
                writer.write_all(id.as_bytes())?;
                writer.write_u64::<LittleEndian>(final_hash)?;
                writer.write_u64::<LittleEndian>(meta_hash)?;
                appended += 2 + id.len() as u64 + 16;
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

    use super::Registry;

    #[test]
    fn insert_get_and_duplicate_rejection() {
        let tmp = tempdir().expect("tempdir");
        let mut registry = Registry::open(tmp.path().join("registry")).expect("open");
        registry.insert("game_0", 10, 20).expect("insert");
        assert_eq!(registry.get("game_0").expect("present"), (10, 20));
        assert!(registry.insert("game_0", 11, 21).is_err());
        assert!(registry.get("game_1").is_err());
    }

    #[test]
    fn survives_flush_and_reopen() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("registry");
        {
            let mut registry = Registry::open(&path).expect("open");
            registry.insert("a", 1, 2).expect("insert");
            registry.insert("b", 3, 4).expect("insert");
            registry.flush().expect("flush");
            registry.insert("lost", 5, 6).expect("insert");
        }
        let registry = Registry::open(&path).expect("reopen");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("b").expect("present"), (3, 4));
        assert!(!registry.contains("lost"));
        let ids: Vec<&str> = registry.games().collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
