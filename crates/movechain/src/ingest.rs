//! Ingestion: annotated game tree → blob chain + metadata blob.
//!
//! Mainline moves are chunked into 22-move blobs chained from `H_init`,
//! with every matching opening-catalog boundary emitted as its own
//! anchor-flagged blob so that games sharing an opening share those blobs
//! byte for byte. Variations branch off as fresh chains rooted at
//! `H_orphan` (or `H_init` when they replace the first move).

use std::collections::BTreeMap;

use gametree::{GameResult, GameTree, Note, PackedMove, Ply};
use tracing::debug;

use crate::blob::MoveBlob;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::format::{FLAG_GAME_END, FLAG_OPENING_ANCHOR, MAX_VARIATION_DEPTH, MOVES_PER_BLOB};
use crate::meta::{AnnotationRecord, GameMeta, MetaStore, RecordPayload, str_tag_id};
use crate::pack::PackFile;
use crate::rules::Rules;
use crate::strings::StringStore;

pub(crate) struct ChainWriter<'s> {
    pub pack: &'s mut PackFile,
    pub strings: &'s mut StringStore,
    pub meta: &'s mut MetaStore,
    pub catalog: &'s Catalog,
    pub rules: &'s dyn Rules,
    pub init_hash: u64,
    pub orphan_hash: u64,
}

impl ChainWriter<'_> {
    /// Write one game, returning (final blob hash, metadata hash). The
    /// registry entry is the caller's job.
    pub fn ingest(&mut self, game: &GameTree) -> Result<(u64, u64)> {
        let mainline: Vec<PackedMove> = game.mainline().collect();
        let (start_hash, hashes) = self.replay_hashes(&[], &mainline)?;
        let final_hash = self.write_mainline(&mainline, start_hash, &hashes, game.result());
        let records = self.collect_notes(&game.plies, &[], 0)?;
        let (str_tags, extra_tags) = self.header_tags(game);
        let meta_hash = self.meta.put(GameMeta {
            final_hash,
            str_tags,
            extra_tags,
            records,
        });
        Ok((final_hash, meta_hash))
    }

    /// Position hashes after replaying `prefix`, then after each move of
    /// `moves`. Surfaces the engine's legality verdicts before anything
    /// is written.
    fn replay_hashes(
        &self,
        prefix: &[PackedMove],
        moves: &[PackedMove],
    ) -> Result<(u64, Vec<u64>)> {
        let mut replay = self.rules.replay();
        for mv in prefix {
            replay.play(*mv)?;
        }
        let start = replay.position_hash();
        let mut hashes = Vec::with_capacity(moves.len());
        for mv in moves {
            replay.play(*mv)?;
            hashes.push(replay.position_hash());
        }
        Ok((start, hashes))
    }

    fn write_mainline(
        &mut self,
        moves: &[PackedMove],
        initial_zobrist: u64,
        hashes: &[u64],
        result: GameResult,
    ) -> u64 {
        if moves.is_empty() {
            let mut blob = MoveBlob::new(self.init_hash, initial_zobrist, Vec::new(), result);
            blob.flags |= FLAG_GAME_END;
            return self.pack.put(blob);
        }

        let mut parent = self.init_hash;
        let mut cursor = 0usize;
        let catalog = self.catalog;
        for entry in catalog.match_prefixes(moves) {
            let end = entry.moves.len();
            if end <= cursor {
                continue;
            }
            debug!(opening = %entry.name, plies = end, "anchoring opening prefix");
            parent = self.write_span(moves, hashes, cursor, end, parent, true, end == moves.len(), result);
            cursor = end;
        }
        if cursor < moves.len() {
            parent = self.write_span(moves, hashes, cursor, moves.len(), parent, false, true, result);
        }
        parent
    }

    /// Encode `moves[start..end]` as consecutive blobs under `parent`.
    /// The blob ending the span gets the anchor flag when `anchor`, and
    /// the game-end flag plus the result when `terminal`.
    #[allow(clippy::too_many_arguments)]
    fn write_span(
        &mut self,
        moves: &[PackedMove],
        hashes: &[u64],
        start: usize,
        end: usize,
        mut parent: u64,
        anchor: bool,
        terminal: bool,
        result: GameResult,
    ) -> u64 {
        let mut at = start;
        while at < end {
            let take = (end - at).min(MOVES_PER_BLOB);
            let last = at + take == end;
            let mut blob = MoveBlob::new(
                parent,
                hashes[at + take - 1],
                moves[at..at + take].to_vec(),
                if last && terminal { result } else { GameResult::Unknown },
            );
            if last && anchor {
                blob.flags |= FLAG_OPENING_ANCHOR;
            }
            if last && terminal {
                blob.flags |= FLAG_GAME_END;
            }
            parent = self.pack.put(blob);
            at += take;
        }
        parent
    }

    /// Annotation records for one line, in ascending move-index order.
    /// `prefix` holds every move played before this line begins.
    fn collect_notes(
        &mut self,
        plies: &[Ply],
        prefix: &[PackedMove],
        depth: usize,
    ) -> Result<Vec<AnnotationRecord>> {
        let mut records = Vec::new();
        for (index, ply) in plies.iter().enumerate() {
            for note in &ply.notes {
                let payload = match note {
                    Note::Comment(c) => RecordPayload::Comment {
                        text_hash: self.strings.intern_str(&c.text),
                        pre: c.pre,
                        semicolon: c.semicolon,
                        line_break: c.line_break,
                    },
                    Note::Nag(code) => RecordPayload::Nag(*code),
                    Note::LineBreak => RecordPayload::LineBreak,
                    Note::Variation(line) => {
                        if line.is_empty() {
                            continue;
                        }
                        let mut branch: Vec<PackedMove> = prefix.to_vec();
                        branch.extend(plies[..index].iter().map(|p| p.mv));
                        let (final_hash, meta_hash) =
                            self.ingest_variation(line, &branch, depth + 1)?;
                        RecordPayload::Variation {
                            final_hash,
                            meta_hash,
                        }
                    }
                };
                records.push(AnnotationRecord {
                    move_index: index as u32,
                    payload,
                });
            }
        }
        Ok(records)
    }

    /// A variation is its own chain: rooted at `H_init` when it replaces
    /// the first move of the game, at `H_orphan` otherwise. Its blob
    /// Zobrists come from replaying the branch prefix first.
    fn ingest_variation(
        &mut self,
        plies: &[Ply],
        branch: &[PackedMove],
        depth: usize,
    ) -> Result<(u64, u64)> {
        if depth > MAX_VARIATION_DEPTH {
            return Err(Error::Chain("variation nesting too deep"));
        }
        let moves: Vec<PackedMove> = plies.iter().map(|p| p.mv).collect();
        let (_, hashes) = self.replay_hashes(branch, &moves)?;

        let mut parent = if branch.is_empty() {
            self.init_hash
        } else {
            self.orphan_hash
        };
        let mut at = 0usize;
        while at < moves.len() {
            let take = (moves.len() - at).min(MOVES_PER_BLOB);
            let blob = MoveBlob::new(
                parent,
                hashes[at + take - 1],
                moves[at..at + take].to_vec(),
                GameResult::Unknown,
            );
            parent = self.pack.put(blob);
            at += take;
        }

        let records = self.collect_notes(plies, branch, depth)?;
        let meta_hash = if records.is_empty() {
            0
        } else {
            self.meta.put(GameMeta {
                final_hash: parent,
                str_tags: Vec::new(),
                extra_tags: Vec::new(),
                records,
            })
        };
        Ok((parent, meta_hash))
    }

    /// Split headers into the STR roster and extra tags, interning every
    /// name and value. Later duplicates win, and both lists come out in
    /// their stored sort order.
    fn header_tags(&mut self, game: &GameTree) -> (Vec<(u8, u64)>, Vec<(u64, u64)>) {
        let mut str_tags: BTreeMap<u8, u64> = BTreeMap::new();
        let mut extra_tags: BTreeMap<u64, u64> = BTreeMap::new();
        for (name, value) in &game.tags {
            match str_tag_id(name) {
                Some(id) => {
                    str_tags.insert(id, self.strings.intern_str(value));
                }
                None => {
                    extra_tags.insert(
                        self.strings.intern_str(name),
                        self.strings.intern_str(value),
                    );
                }
            }
        }
        (
            str_tags.into_iter().collect(),
            extra_tags.into_iter().collect(),
        )
    }
}
