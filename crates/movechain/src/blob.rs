//! The fixed 64-byte move blob.
//!
//! Layout: parent hash (8) | zobrist (8) | move count (1) | flags (1) |
//! 22 packed moves (44) | result code (2). Unused move slots stay zero.

use byteorder::{ByteOrder, LittleEndian};
use gametree::{GameResult, PackedMove};

use crate::error::{Error, Result};
use crate::format::{
    BLOB_LEN, FLAG_GAME_END, FLAG_OPENING_ANCHOR, HashKind, MOVES_PER_BLOB,
};

const PARENT_OFFSET: usize = 0;
const ZOBRIST_OFFSET: usize = 8;
const COUNT_OFFSET: usize = 16;
const FLAGS_OFFSET: usize = 17;
const MOVES_OFFSET: usize = 18;
const RESULT_OFFSET: usize = 62;

/// An in-memory blob. `moves` never exceeds [`MOVES_PER_BLOB`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveBlob {
    pub parent: u64,
    pub zobrist: u64,
    pub flags: u8,
    pub moves: Vec<PackedMove>,
    pub result: GameResult,
}

impl MoveBlob {
    pub fn new(parent: u64, zobrist: u64, moves: Vec<PackedMove>, result: GameResult) -> MoveBlob {
        debug_assert!(moves.len() <= MOVES_PER_BLOB);
        MoveBlob {
            parent,
            zobrist,
            flags: 0,
            moves,
            result,
        }
    }

    /// The canonical initial-position blob: parent zero, no moves, the
    /// position hash of the starting board, result unknown.
    pub fn initial(initial_zobrist: u64) -> MoveBlob {
        MoveBlob::new(0, initial_zobrist, Vec::new(), GameResult::Unknown)
    }

    pub fn is_opening_anchor(&self) -> bool {
        self.flags & FLAG_OPENING_ANCHOR != 0
    }

    pub fn is_game_end(&self) -> bool {
        self.flags & FLAG_GAME_END != 0
    }

    pub fn encode(&self) -> [u8; BLOB_LEN] {
        debug_assert!(self.moves.len() <= MOVES_PER_BLOB);
        let mut buf = [0u8; BLOB_LEN];
        LittleEndian::write_u64(&mut buf[PARENT_OFFSET..PARENT_OFFSET + 8], self.parent);
        LittleEndian::write_u64(&mut buf[ZOBRIST_OFFSET..ZOBRIST_OFFSET + 8], self.zobrist);
        buf[COUNT_OFFSET] = self.moves.len() as u8;
        buf[FLAGS_OFFSET] = self.flags;
        for (i, mv) in self.moves.iter().enumerate() {
            let at = MOVES_OFFSET + i * 2;
            LittleEndian::write_u16(&mut buf[at..at + 2], mv.raw());
        }
        LittleEndian::write_u16(&mut buf[RESULT_OFFSET..RESULT_OFFSET + 2], self.result.code());
        buf
    }

    pub fn decode(buf: &[u8; BLOB_LEN]) -> Result<MoveBlob> {
        let count = buf[COUNT_OFFSET] as usize;
        if count > MOVES_PER_BLOB {
            return Err(Error::InvalidBlob("move count exceeds capacity"));
        }
        let result = GameResult::from_code(LittleEndian::read_u16(
            &buf[RESULT_OFFSET..RESULT_OFFSET + 2],
        ))
        .ok_or(Error::InvalidBlob("result code out of range"))?;

        let mut moves = Vec::with_capacity(count);
        for i in 0..count {
            let at = MOVES_OFFSET + i * 2;
            moves.push(PackedMove::from_raw(LittleEndian::read_u16(&buf[at..at + 2])));
        }

        Ok(MoveBlob {
            parent: LittleEndian::read_u64(&buf[PARENT_OFFSET..PARENT_OFFSET + 8]),
            zobrist: LittleEndian::read_u64(&buf[ZOBRIST_OFFSET..ZOBRIST_OFFSET + 8]),
            flags: buf[FLAGS_OFFSET],
            moves,
            result,
        })
    }

    /// Content hash over the full serialization; the blob's identity and
    /// deduplication key.
    pub fn content_hash(&self, kind: HashKind) -> u64 {
        kind.digest(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use gametree::{GameResult, PackedMove};

    use super::MoveBlob;
    use crate::format::{BLOB_LEN, FLAG_GAME_END, HashKind, MOVES_PER_BLOB};

    fn sample_moves(n: usize) -> Vec<PackedMove> {
        (0..n)
            .map(|i| {
                PackedMove::pack((i % 64) as u8, ((i + 9) % 64) as u8, Default::default())
                    .expect("valid move")
            })
            .collect()
    }

    #[test]
    fn encode_decode_round_trips() {
        for n in [0, 1, 7, MOVES_PER_BLOB] {
            let mut blob = MoveBlob::new(0xfeed, 0xbeef, sample_moves(n), GameResult::Draw);
            blob.flags = FLAG_GAME_END;
            let decoded = MoveBlob::decode(&blob.encode()).expect("decodes");
            assert_eq!(decoded, blob);
        }
    }

    #[test]
    fn rejects_oversized_count() {
        let blob = MoveBlob::new(1, 2, sample_moves(3), GameResult::Unknown);
        let mut buf = blob.encode();
        buf[16] = MOVES_PER_BLOB as u8 + 1;
        assert!(MoveBlob::decode(&buf).is_err());
    }

    #[test]
    fn rejects_bad_result_code() {
        let blob = MoveBlob::new(1, 2, sample_moves(3), GameResult::Unknown);
        let mut buf = blob.encode();
        buf[62] = 9;
        assert!(MoveBlob::decode(&buf).is_err());
    }

    #[test]
    fn flags_change_the_content_hash() {
        let kind = HashKind::Xxh64;
        let plain = MoveBlob::new(1, 2, sample_moves(4), GameResult::Unknown);
        let mut flagged = plain.clone();
        flagged.flags = FLAG_GAME_END;
        assert_ne!(plain.content_hash(kind), flagged.content_hash(kind));
    }

    #[test]
    fn unused_slots_stay_zero() {
        let blob = MoveBlob::new(1, 2, sample_moves(2), GameResult::Unknown);
        let buf = blob.encode();
        assert!(buf[18 + 4..62].iter().all(|&b| b == 0));
        assert_eq!(buf.len(), BLOB_LEN);
    }
}
