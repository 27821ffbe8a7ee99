//! Reconstruction: blob chain + metadata blob → annotated game tree.
//!
//! The parent walk runs backward to `H_init` (or `H_orphan` for
//! variation chains), the move stack is reversed, and every blob's
//! Zobrist is re-derived by replay before annotations are overlaid.

use gametree::{Comment, GameTree, Note, PackedMove, Ply};

use crate::blob::MoveBlob;
use crate::error::{Error, Result};
use crate::format::{MAX_CHAIN_STEPS, MAX_VARIATION_DEPTH};
use crate::meta::{GameMeta, MetaStore, RecordPayload, STR_TAG_NAMES};
use crate::pack::PackFile;
use crate::rules::Rules;
use crate::strings::StringStore;

pub(crate) struct ChainReader<'s> {
    pub pack: &'s PackFile,
    pub strings: &'s StringStore,
    pub meta: &'s MetaStore,
    pub rules: &'s dyn Rules,
    pub init_hash: u64,
    pub orphan_hash: u64,
}

impl ChainReader<'_> {
    /// Chronological blobs of the chain ending at `final_hash`.
    ///
    /// Mainline chains must terminate at `H_init`; hitting `H_orphan`
    /// there is a chain error. Variation chains may root at either.
    pub fn walk(&self, final_hash: u64, allow_orphan: bool) -> Result<Vec<MoveBlob>> {
        let mut blobs = Vec::new();
        let mut cursor = final_hash;
        while cursor != self.init_hash {
            if cursor == self.orphan_hash {
                if allow_orphan {
                    break;
                }
                return Err(Error::Chain("orphan parent reached from a game chain"));
            }
            if blobs.len() >= MAX_CHAIN_STEPS {
                return Err(Error::Chain("parent walk exceeds safety bound"));
            }
            let blob = self.pack.get(cursor)?;
            cursor = blob.parent;
            blobs.push(blob);
        }
        blobs.reverse();
        Ok(blobs)
    }

    /// Replay `prefix` then every blob's moves, checking each blob's
    /// recorded Zobrist against the replayed position. Returns the
    /// chain's moves in order.
    pub fn moves_verified(
        &self,
        prefix: &[PackedMove],
        blobs: &[MoveBlob],
    ) -> Result<Vec<PackedMove>> {
        let mut replay = self.rules.replay();
        for mv in prefix {
            replay.play(*mv)?;
        }
        let mut moves = Vec::new();
        for blob in blobs {
            for mv in &blob.moves {
                replay.play(*mv)?;
                moves.push(*mv);
            }
            let replayed = replay.position_hash();
            if replayed != blob.zobrist {
                return Err(Error::Integrity(format!(
                    "zobrist mismatch after move {}: blob records {:016x}, replay yields {replayed:016x}",
                    moves.len(),
                    blob.zobrist
                )));
            }
        }
        Ok(moves)
    }

    /// Just the packed mainline of a registered chain.
    pub fn mainline(&self, final_hash: u64) -> Result<Vec<PackedMove>> {
        let blobs = self.walk(final_hash, false)?;
        self.moves_verified(&[], &blobs)
    }

    /// Full game tree: headers from the metadata blob, mainline from the
    /// chain, annotations interleaved at their recorded move indices.
    pub fn game(&self, final_hash: u64, meta_hash: u64) -> Result<GameTree> {
        let meta = self.meta.get(meta_hash)?;
        if meta.final_hash != final_hash {
            return Err(Error::Integrity(format!(
                "metadata {meta_hash:016x} binds {:016x}, registry names {final_hash:016x}",
                meta.final_hash
            )));
        }

        let mut tags = Vec::with_capacity(meta.str_tags.len() + meta.extra_tags.len());
        for (id, value_hash) in &meta.str_tags {
            tags.push((
                STR_TAG_NAMES[*id as usize].to_string(),
                self.strings.lookup_str(*value_hash)?.to_string(),
            ));
        }
        for (name_hash, value_hash) in &meta.extra_tags {
            tags.push((
                self.strings.lookup_str(*name_hash)?.to_string(),
                self.strings.lookup_str(*value_hash)?.to_string(),
            ));
        }

        let plies = self.line(final_hash, Some(meta), &[], false, 0)?;
        Ok(GameTree { tags, plies })
    }

    fn line(
        &self,
        final_hash: u64,
        meta: Option<&GameMeta>,
        prefix: &[PackedMove],
        allow_orphan: bool,
        depth: usize,
    ) -> Result<Vec<Ply>> {
        if depth > MAX_VARIATION_DEPTH {
            return Err(Error::Chain("variation nesting too deep"));
        }
        let blobs = self.walk(final_hash, allow_orphan)?;
        let moves = self.moves_verified(prefix, &blobs)?;
        let mut plies: Vec<Ply> = moves.iter().map(|mv| Ply::new(*mv)).collect();

        let Some(meta) = meta else {
            return Ok(plies);
        };
        for record in &meta.records {
            let index = record.move_index as usize;
            if index >= plies.len() {
                return Err(Error::Integrity(format!(
                    "annotation at move {index} beyond a line of {} plies",
                    plies.len()
                )));
            }
            let note = match &record.payload {
                RecordPayload::Comment {
                    text_hash,
                    pre,
                    semicolon,
                    line_break,
                } => Note::Comment(Comment {
                    text: self.strings.lookup_str(*text_hash)?.to_string(),
                    pre: *pre,
                    semicolon: *semicolon,
                    line_break: *line_break,
                }),
                RecordPayload::Nag(code) => Note::Nag(*code),
                RecordPayload::LineBreak => Note::LineBreak,
                RecordPayload::Variation {
                    final_hash: var_final,
                    meta_hash: var_meta,
                } => {
                    let mut branch: Vec<PackedMove> = prefix.to_vec();
                    branch.extend_from_slice(&moves[..index]);
                    let var_meta = if *var_meta == 0 {
                        None
                    } else {
                        Some(self.meta.get(*var_meta)?)
                    };
                    Note::Variation(self.line(*var_final, var_meta, &branch, true, depth + 1)?)
                }
            };
            plies[index].notes.push(note);
        }
        Ok(plies)
    }
}
