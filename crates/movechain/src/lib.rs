//! Content-addressable move-chain storage for chess games.
//!
//! Games are stored as backward-linked chains of fixed 64-byte blobs,
//! each holding up to 22 packed moves and named by a 64-bit content hash,
//! so games sharing an opening share the blobs that encode it. A sparse
//! metadata overlay carries headers, comments, NAGs, and nested
//! variations; strings are interned content-addressably. See
//! [`store::Store`] for the entry point.
//!
//! The on-disk file set lives in one directory: `moves` (pack), `idx`
//! (sorted hash index), `metadata`, `strings`, `registry`, `sources`
//! (reserved for import tracking), and the `config` marker.

pub mod blob;
pub mod catalog;
pub mod error;
pub mod format;
mod ingest;
pub mod meta;
pub mod pack;
mod reconstruct;
pub mod registry;
pub mod rules;
pub mod store;
pub mod strings;
pub mod verify;

pub use crate::blob::MoveBlob;
pub use crate::catalog::{Catalog, OpeningEntry};
pub use crate::error::{Error, ObjectKind, Result};
pub use crate::format::HashKind;
pub use crate::meta::{AnnotationRecord, GameMeta, RecordPayload};
pub use crate::rules::{CoordinateRules, Replay, Rules};
pub use crate::store::{GcStats, Options, Store, StoreStats};
pub use crate::verify::GameIssue;
