//! Seam to the external chess rules engine.
//!
//! The store never inspects board state. It needs three things from a
//! rules engine: position hashes for integrity checks, legality screening
//! of packed moves, and resolution of catalog move text at the current
//! position. Everything stored — every blob Zobrist and `H_init` itself —
//! depends on the engine's hashes, so a store must always be opened with
//! the engine it was created with (the marker pins the initial hash).

use gametree::PackedMove;

use crate::error::{Error, Result};

/// Factory for replays from the initial position.
pub trait Rules {
    fn replay(&self) -> Box<dyn Replay + '_>;
}

/// A position being advanced move by move.
pub trait Replay {
    /// Hash of the current position; before any move this is Z₀.
    fn position_hash(&self) -> u64;

    /// Apply one packed move, failing on illegal input.
    fn play(&mut self, mv: PackedMove) -> Result<()>;

    /// Resolve one movetext token at the current position, apply it, and
    /// return its packed form. A full engine accepts SAN here.
    fn play_token(&mut self, token: &str) -> Result<PackedMove>;
}

/// Position-blind stand-in engine.
///
/// Accepts any structurally valid move without legality checking, resolves
/// coordinate tokens only, and derives position hashes by folding each
/// packed move into the running hash. Suitable for catalogs and tests
/// expressed in coordinate text; production stores plug in an
/// engine-backed implementation with real Zobrist hashing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateRules;

impl Rules for CoordinateRules {
    fn replay(&self) -> Box<dyn Replay + '_> {
        Box::new(CoordinateReplay {
            hash: xxhash_rust::xxh64::xxh64(b"CCAMC_INITIAL_POSITION", 0),
        })
    }
}

struct CoordinateReplay {
    hash: u64,
}

impl Replay for CoordinateReplay {
    fn position_hash(&self) -> u64 {
        self.hash
    }

    fn play(&mut self, mv: PackedMove) -> Result<()> {
        let mut buf = [0u8; 10];
        buf[..8].copy_from_slice(&self.hash.to_le_bytes());
        buf[8..].copy_from_slice(&mv.raw().to_le_bytes());
        self.hash = xxhash_rust::xxh64::xxh64(&buf, 0);
        Ok(())
    }

    fn play_token(&mut self, token: &str) -> Result<PackedMove> {
        let mv: PackedMove = token
            .parse()
            .map_err(|_| Error::InvalidMove(token.to_string()))?;
        self.play(mv)?;
        Ok(mv)
    }
}

#[cfg(test)]
mod tests {
    use super::{CoordinateRules, Rules};

    #[test]
    fn replays_are_deterministic() {
        let rules = CoordinateRules;
        let mut a = rules.replay();
        let mut b = rules.replay();
        assert_eq!(a.position_hash(), b.position_hash());
        for token in ["e2e4", "e7e5", "g1f3"] {
            a.play_token(token).expect("token");
            b.play_token(token).expect("token");
            assert_eq!(a.position_hash(), b.position_hash());
        }
    }

    #[test]
    fn position_hash_tracks_the_move_sequence() {
        let rules = CoordinateRules;
        let mut a = rules.replay();
        let mut b = rules.replay();
        a.play_token("e2e4").expect("token");
        b.play_token("d2d4").expect("token");
        assert_ne!(a.position_hash(), b.position_hash());
    }

    #[test]
    fn rejects_non_coordinate_tokens() {
        let rules = CoordinateRules;
        let mut replay = rules.replay();
        assert!(replay.play_token("Nf3").is_err());
        assert!(replay.play_token("O-O").is_err());
    }
}
