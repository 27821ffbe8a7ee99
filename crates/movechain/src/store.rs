//! The store facade: one directory, five data files, one marker.
//!
//! A store directory holds `moves` (pack), `idx` (sorted index),
//! `metadata`, `strings`, `registry`, a reserved `sources` file, and the
//! `config` marker recording format version, hash family, and the rules
//! engine's initial position hash. One writer at a time; readers observe
//! the published counts. Nothing reaches disk until [`Store::flush`], so a
//! crash loses at most the games since the last flush and never leaves a
//! partially visible game.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use gametree::{GameTree, PackedMove};
use tracing::{debug, info};

use crate::blob::MoveBlob;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::format::{
    CONFIG_MAGIC, DEFAULT_FLUSH_EVERY, DEFAULT_MIN_OPENING_PLIES, HashKind, MAX_CHAIN_STEPS,
    VERSION,
};
use crate::ingest::ChainWriter;
use crate::meta::{GameMeta, MetaStore, RecordPayload};
use crate::pack::PackFile;
use crate::reconstruct::ChainReader;
use crate::registry::Registry;
use crate::rules::{CoordinateRules, Rules};
use crate::strings::StringStore;
use crate::verify::{GameIssue, verify_games};

const CONFIG_LEN: usize = 16;

/// Store construction knobs.
pub struct Options {
    pub hash: HashKind,
    /// Tab-separated opening listing; `None` disables anchoring.
    pub catalog_path: Option<PathBuf>,
    pub min_opening_plies: usize,
    /// Games between automatic flushes; 0 leaves flushing to the caller.
    pub flush_every: usize,
    pub rules: Box<dyn Rules>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            hash: HashKind::Xxh64,
            catalog_path: None,
            min_opening_plies: DEFAULT_MIN_OPENING_PLIES,
            flush_every: DEFAULT_FLUSH_EVERY,
            rules: Box::new(CoordinateRules),
        }
    }
}

/// Counters reported by [`Store::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub games: usize,
    pub blobs: u64,
    pub metadata: usize,
    pub strings: usize,
    pub pack_bytes: u64,
}

/// Mark/sweep summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub blobs_kept: u64,
    pub blobs_swept: u64,
    pub metadata_kept: u64,
    pub metadata_swept: u64,
}

pub struct Store {
    dir: PathBuf,
    kind: HashKind,
    init_hash: u64,
    orphan_hash: u64,
    rules: Box<dyn Rules>,
    pack: PackFile,
    strings: StringStore,
    meta: MetaStore,
    registry: Registry,
    catalog: Catalog,
    flush_every: usize,
    unflushed_games: usize,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("dir", &self.dir).finish_non_exhaustive()
    }
}

impl Store {
    /// Initialize a fresh store directory and open it.
    pub fn create(dir: impl AsRef<Path>, opts: Options) -> Result<Store> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let marker = dir.join("config");
        if marker.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("store marker already present in {}", dir.display()),
            )
            .into());
        }

        let initial_zobrist = opts.rules.replay().position_hash();
        write_marker(&marker, opts.hash, initial_zobrist)?;
        File::create(dir.join("sources"))?;
        PackFile::create(dir.join("moves"), dir.join("idx"), opts.hash)?;

        let mut store = Store::assemble(dir, opts, initial_zobrist)?;
        store.flush()?;
        info!(dir = %dir.display(), "store created");
        Ok(store)
    }

    /// Open an existing store, validating the marker against the options
    /// and the supplied rules engine.
    pub fn open(dir: impl AsRef<Path>, opts: Options) -> Result<Store> {
        let dir = dir.as_ref();
        let (kind, initial_zobrist) = read_marker(&dir.join("config"))?;
        let engine_zobrist = opts.rules.replay().position_hash();
        if engine_zobrist != initial_zobrist {
            return Err(Error::RulesMismatch {
                expected: initial_zobrist,
                actual: engine_zobrist,
            });
        }
        let opts = Options { hash: kind, ..opts };
        let store = Store::assemble(dir, opts, initial_zobrist)?;
        info!(
            dir = %dir.display(),
            games = store.registry.len(),
            blobs = store.pack.published(),
            "store opened"
        );
        Ok(store)
    }

    fn assemble(dir: &Path, opts: Options, initial_zobrist: u64) -> Result<Store> {
        let kind = opts.hash;
        let mut pack = PackFile::open(dir.join("moves"), dir.join("idx"), kind)?;
        let strings = StringStore::open(dir.join("strings"), kind)?;
        let meta = MetaStore::open(dir.join("metadata"), kind)?;
        let registry = Registry::open(dir.join("registry"))?;
        let catalog = match &opts.catalog_path {
            Some(path) => Catalog::load(path, opts.rules.as_ref(), opts.min_opening_plies)?,
            None => Catalog::empty(opts.min_opening_plies),
        };

        let init_blob = MoveBlob::initial(initial_zobrist);
        let init_hash = pack.put(init_blob);
        let orphan_hash = kind.orphan_hash();

        Ok(Store {
            dir: dir.to_path_buf(),
            kind,
            init_hash,
            orphan_hash,
            rules: opts.rules,
            pack,
            strings,
            meta,
            registry,
            catalog,
            flush_every: opts.flush_every,
            unflushed_games: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn hash_kind(&self) -> HashKind {
        self.kind
    }

    /// Hash of the canonical initial-position blob.
    pub fn init_hash(&self) -> u64 {
        self.init_hash
    }

    /// The orphan-parent sentinel for this store's hash family.
    pub fn orphan_hash(&self) -> u64 {
        self.orphan_hash
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Ingest one game under `game_id`. Transactional at game
    /// granularity: on error nothing is registered, and any blobs already
    /// queued become orphans for the next GC.
    pub fn ingest_game(&mut self, game: &GameTree, game_id: &str) -> Result<(u64, u64)> {
        if self.registry.contains(game_id) {
            return Err(Error::DuplicateGameId(game_id.to_string()));
        }
        let mut writer = ChainWriter {
            pack: &mut self.pack,
            strings: &mut self.strings,
            meta: &mut self.meta,
            catalog: &self.catalog,
            rules: self.rules.as_ref(),
            init_hash: self.init_hash,
            orphan_hash: self.orphan_hash,
        };
        let (final_hash, meta_hash) = writer.ingest(game)?;
        self.registry.insert(game_id, final_hash, meta_hash)?;
        debug!(
            game = game_id,
            final_hash = %format_args!("{final_hash:016x}"),
            "game ingested"
        );

        self.unflushed_games += 1;
        if self.flush_every > 0 && self.unflushed_games >= self.flush_every {
            self.flush()?;
        }
        Ok((final_hash, meta_hash))
    }

    /// Rebuild the full annotated game tree for `game_id`, verifying the
    /// chain as it is walked.
    pub fn reconstruct(&self, game_id: &str) -> Result<GameTree> {
        let (final_hash, meta_hash) = self.registry.get(game_id)?;
        self.reader().game(final_hash, meta_hash)
    }

    /// Just the packed mainline for `game_id`.
    pub fn mainline_moves(&self, game_id: &str) -> Result<Vec<PackedMove>> {
        let (final_hash, _) = self.registry.get(game_id)?;
        self.reader().mainline(final_hash)
    }

    pub fn contains_game(&self, game_id: &str) -> bool {
        self.registry.contains(game_id)
    }

    /// Registered game ids, in registration order.
    pub fn games(&self) -> impl Iterator<Item = &str> {
        self.registry.games()
    }

    pub fn blob(&self, hash: u64) -> Result<MoveBlob> {
        self.pack.get(hash)
    }

    pub fn contains_blob(&self, hash: u64) -> bool {
        self.pack.exists(hash)
    }

    pub fn iter_blobs(&self) -> impl Iterator<Item = Result<(u64, MoveBlob)>> + '_ {
        self.pack.iter_all()
    }

    pub fn metadata(&self, hash: u64) -> Result<&GameMeta> {
        self.meta.get(hash)
    }

    /// Check every registered game; reports are collected, not fatal.
    pub fn verify(&self) -> Vec<GameIssue> {
        verify_games(&self.reader(), &self.registry, self.kind)
    }

    /// Push everything pending to disk in dependency order: blobs and
    /// index first, registry last, each file publishing its count only
    /// after its records land.
    pub fn flush(&mut self) -> Result<()> {
        self.pack.flush()?;
        self.meta.flush()?;
        self.strings.flush()?;
        self.registry.flush()?;
        self.unflushed_games = 0;
        debug!(blobs = self.pack.published(), "store flushed");
        Ok(())
    }

    /// Mark/sweep collection: everything reachable from the registry
    /// (chains, metadata, variations, and always the initial blob)
    /// survives; the pack and index are rewritten and swapped atomically.
    pub fn gc(&mut self) -> Result<GcStats> {
        self.flush()?;

        let mut marked_blobs = HashSet::new();
        let mut marked_meta = HashSet::new();
        marked_blobs.insert(self.init_hash);
        let mut meta_queue: Vec<u64> = Vec::new();
        for (_, final_hash, meta_hash) in self.registry.iter() {
            self.mark_chain(final_hash, &mut marked_blobs)?;
            if marked_meta.insert(meta_hash) {
                meta_queue.push(meta_hash);
            }
        }
        while let Some(meta_hash) = meta_queue.pop() {
            let meta = self.meta.get(meta_hash)?;
            for record in &meta.records {
                if let RecordPayload::Variation {
                    final_hash,
                    meta_hash,
                } = &record.payload
                {
                    self.mark_chain(*final_hash, &mut marked_blobs)?;
                    if *meta_hash != 0 && marked_meta.insert(*meta_hash) {
                        meta_queue.push(*meta_hash);
                    }
                }
            }
        }

        let (blobs_kept, blobs_swept) = self.pack.rewrite(&marked_blobs)?;
        let (metadata_kept, metadata_swept) = self.meta.retain(&marked_meta)?;
        let stats = GcStats {
            blobs_kept,
            blobs_swept,
            metadata_kept,
            metadata_swept,
        };
        info!(
            swept = stats.blobs_swept,
            kept = stats.blobs_kept,
            "garbage collection finished"
        );
        Ok(stats)
    }

    fn mark_chain(&self, final_hash: u64, marked: &mut HashSet<u64>) -> Result<()> {
        let mut cursor = final_hash;
        let mut steps = 0usize;
        while cursor != self.init_hash && cursor != self.orphan_hash {
            if !marked.insert(cursor) {
                return Ok(());
            }
            if steps >= MAX_CHAIN_STEPS {
                return Err(Error::Chain("parent walk exceeds safety bound"));
            }
            cursor = self.pack.get(cursor)?.parent;
            steps += 1;
        }
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            games: self.registry.len(),
            blobs: self.pack.len(),
            metadata: self.meta.len(),
            strings: self.strings.len(),
            pack_bytes: self.pack.pack_bytes(),
        }
    }

    fn reader(&self) -> ChainReader<'_> {
        ChainReader {
            pack: &self.pack,
            strings: &self.strings,
            meta: &self.meta,
            rules: self.rules.as_ref(),
            init_hash: self.init_hash,
            orphan_hash: self.orphan_hash,
        }
    }
}

fn write_marker(path: &Path, kind: HashKind, initial_zobrist: u64) -> Result<()> {
    let mut buf = [0u8; CONFIG_LEN];
    buf[..4].copy_from_slice(CONFIG_MAGIC);
    LittleEndian::write_u16(&mut buf[4..6], VERSION);
    LittleEndian::write_u16(&mut buf[6..8], kind.raw());
    LittleEndian::write_u64(&mut buf[8..16], initial_zobrist);
    let mut file = File::create(path)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    Ok(())
}

fn read_marker(path: &Path) -> Result<(HashKind, u64)> {
    let mut buf = [0u8; CONFIG_LEN];
    File::open(path)?.read_exact(&mut buf)?;
    if &buf[..4] != CONFIG_MAGIC {
        return Err(Error::InvalidMagic);
    }
    let version = LittleEndian::read_u16(&buf[4..6]);
    if version != VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let kind = HashKind::from_raw(LittleEndian::read_u16(&buf[6..8]))?;
    let initial_zobrist = LittleEndian::read_u64(&buf[8..16]);
    Ok((kind, initial_zobrist))
}
