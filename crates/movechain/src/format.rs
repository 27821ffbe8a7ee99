//! Layout constants for the on-disk file set.
//!
//! All integers are little-endian. The pack file is a 16-byte header
//! followed by 64-byte blobs; the index file is (hash, offset) pairs
//! sorted by hash; strings, metadata, and registry files carry a count
//! header published after their records.

use crate::error::{Error, Result};

/// Magic header for the pack file.
pub const PACK_MAGIC: &[u8; 4] = b"CHSS";

/// Magic header for the store marker (`config`).
pub const CONFIG_MAGIC: &[u8; 4] = b"CHSC";

/// Current on-disk format version, shared by the pack and the marker.
pub const VERSION: u16 = 1;

/// Pack header: magic(4) + version(2) + blob count(8) + reserved(2).
pub const PACK_HEADER_LEN: usize = 16;

/// Byte offset of the published blob count within the pack header.
pub const PACK_COUNT_OFFSET: u64 = 6;

/// Fixed blob size.
pub const BLOB_LEN: usize = 64;

/// Packed-move capacity of one blob.
pub const MOVES_PER_BLOB: usize = 22;

/// Blob flag bit 0: the blob terminates exactly at an opening-catalog
/// boundary.
pub const FLAG_OPENING_ANCHOR: u8 = 0x01;

/// Blob flag bit 1: the blob terminates a game and carries its result.
pub const FLAG_GAME_END: u8 = 0x02;

/// Marker string hashed to derive the orphan-parent sentinel.
pub const ORPHAN_MARKER: &[u8] = b"ORPHAN_VARIATION_PARENT_MARKER";

/// Parent walks longer than this are treated as corrupt.
pub const MAX_CHAIN_STEPS: usize = 1 << 16;

/// Variation nesting bound for ingestion and reconstruction.
pub const MAX_VARIATION_DEPTH: usize = 64;

/// Openings shorter than this many plies are ignored by the catalog.
pub const DEFAULT_MIN_OPENING_PLIES: usize = 6;

/// Games ingested between automatic flushes.
pub const DEFAULT_FLUSH_EVERY: usize = 100;

/// Content-hash family identifiers recorded in the store marker.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u16)]
pub enum HashKind {
    Xxh64 = 1,
}

impl HashKind {
    pub fn from_raw(raw: u16) -> Result<HashKind> {
        match raw {
            1 => Ok(HashKind::Xxh64),
            other => Err(Error::UnsupportedHashKind(other)),
        }
    }

    pub const fn raw(self) -> u16 {
        self as u16
    }

    /// 64-bit content digest of `data`.
    pub fn digest(self, data: &[u8]) -> u64 {
        match self {
            HashKind::Xxh64 => xxhash_rust::xxh64::xxh64(data, 0),
        }
    }

    /// The fixed orphan-parent sentinel for this family.
    pub fn orphan_hash(self) -> u64 {
        self.digest(ORPHAN_MARKER)
    }
}

/// One sorted-index entry: blob hash and byte offset into the pack.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct IndexEntry {
    pub hash: u64,
    pub offset: u64,
}

#[cfg(test)]
mod tests {
    use super::HashKind;

    #[test]
    fn digest_is_deterministic() {
        let kind = HashKind::Xxh64;
        assert_eq!(kind.digest(b"abc"), kind.digest(b"abc"));
        assert_ne!(kind.digest(b"abc"), kind.digest(b"abd"));
    }

    #[test]
    fn orphan_sentinel_is_stable() {
        let kind = HashKind::Xxh64;
        assert_eq!(kind.orphan_hash(), kind.orphan_hash());
        assert_ne!(kind.orphan_hash(), 0);
    }

    #[test]
    fn unknown_hash_kind_is_rejected() {
        assert!(HashKind::from_raw(0).is_err());
        assert!(HashKind::from_raw(2).is_err());
        assert_eq!(
            HashKind::from_raw(1).expect("known kind"),
            HashKind::Xxh64
        );
    }
}
