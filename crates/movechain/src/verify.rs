//! Integrity verifier: per-game checks over the whole store.
//!
//! Each registered game gets its chain walked with content hashes
//! recomputed against their index keys, its Zobrists replayed, and every
//! metadata reference (texts, variation chains, nested metadata) resolved
//! recursively. Failures are collected per game; the sweep never stops at
//! the first bad game.

use tracing::warn;

use crate::error::{Error, Result};
use crate::format::{HashKind, MAX_CHAIN_STEPS, MAX_VARIATION_DEPTH};
use crate::meta::RecordPayload;
use crate::reconstruct::ChainReader;
use crate::registry::Registry;

/// One failed game.
#[derive(Debug)]
pub struct GameIssue {
    pub game_id: String,
    pub error: Error,
}

pub(crate) fn verify_games(
    reader: &ChainReader<'_>,
    registry: &Registry,
    kind: HashKind,
) -> Vec<GameIssue> {
    let mut issues = Vec::new();
    for (game_id, final_hash, meta_hash) in registry.iter() {
        if let Err(error) = verify_game(reader, kind, final_hash, meta_hash) {
            warn!(game = game_id, error = %error, "integrity check failed");
            issues.push(GameIssue {
                game_id: game_id.to_string(),
                error,
            });
        }
    }
    issues
}

fn verify_game(
    reader: &ChainReader<'_>,
    kind: HashKind,
    final_hash: u64,
    meta_hash: u64,
) -> Result<()> {
    verify_chain(reader, kind, final_hash, false)?;
    verify_meta(reader, kind, meta_hash, 0)?;
    // Full reconstruction covers Zobrist replay, the metadata binding,
    // and annotation index bounds.
    reader.game(final_hash, meta_hash)?;
    Ok(())
}

/// Walk parents recomputing each blob's content hash against the key it
/// was fetched under.
fn verify_chain(
    reader: &ChainReader<'_>,
    kind: HashKind,
    final_hash: u64,
    allow_orphan: bool,
) -> Result<()> {
    let mut cursor = final_hash;
    let mut steps = 0usize;
    while cursor != reader.init_hash {
        if cursor == reader.orphan_hash {
            if allow_orphan {
                return Ok(());
            }
            return Err(Error::Chain("orphan parent reached from a game chain"));
        }
        if steps >= MAX_CHAIN_STEPS {
            return Err(Error::Chain("parent walk exceeds safety bound"));
        }
        let blob = reader.pack.get(cursor)?;
        let recomputed = blob.content_hash(kind);
        if recomputed != cursor {
            return Err(Error::Integrity(format!(
                "blob {cursor:016x} re-hashes to {recomputed:016x}"
            )));
        }
        cursor = blob.parent;
        steps += 1;
    }
    Ok(())
}

/// Resolve every hash a metadata blob refers to, recursing through
/// variation metadata.
fn verify_meta(
    reader: &ChainReader<'_>,
    kind: HashKind,
    meta_hash: u64,
    depth: usize,
) -> Result<()> {
    if depth > MAX_VARIATION_DEPTH {
        return Err(Error::Chain("variation nesting too deep"));
    }
    let meta = reader.meta.get(meta_hash)?;
    for (_, value_hash) in &meta.str_tags {
        reader.strings.lookup(*value_hash)?;
    }
    for (name_hash, value_hash) in &meta.extra_tags {
        reader.strings.lookup(*name_hash)?;
        reader.strings.lookup(*value_hash)?;
    }
    for record in &meta.records {
        match &record.payload {
            RecordPayload::Comment { text_hash, .. } => {
                reader.strings.lookup(*text_hash)?;
            }
            RecordPayload::Variation {
                final_hash,
                meta_hash,
            } => {
                verify_chain(reader, kind, *final_hash, true)?;
                if *meta_hash != 0 {
                    verify_meta(reader, kind, *meta_hash, depth + 1)?;
                }
            }
            RecordPayload::Nag(_) | RecordPayload::LineBreak => {}
        }
    }
    Ok(())
}
