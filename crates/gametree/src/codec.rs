//! 16-bit packed move codec.
//!
//! Bit layout (LSB first): bits 0..=5 source square, bits 6..=11
//! destination square, bits 12..=14 promotion piece, bit 15 reserved zero.
//! Squares count a1 = 0, b1 = 1, .., h8 = 63.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoveError {
    #[error("square index {0} out of range")]
    InvalidSquare(u8),
    #[error("promotion code {0} out of range")]
    InvalidPromotion(u8),
    #[error("unparseable move token {0:?}")]
    InvalidToken(String),
}

/// Promotion piece carried in bits 12..=14.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Promotion {
    #[default]
    None = 0,
    Queen = 1,
    Rook = 2,
    Bishop = 3,
    Knight = 4,
}

impl Promotion {
    pub fn from_code(code: u8) -> Result<Promotion, MoveError> {
        match code {
            0 => Ok(Promotion::None),
            1 => Ok(Promotion::Queen),
            2 => Ok(Promotion::Rook),
            3 => Ok(Promotion::Bishop),
            4 => Ok(Promotion::Knight),
            other => Err(MoveError::InvalidPromotion(other)),
        }
    }

    /// Decode without failing; codes 5..=7 collapse to `None` so that
    /// `unpack` stays total.
    pub fn from_code_lossy(code: u8) -> Promotion {
        Promotion::from_code(code).unwrap_or(Promotion::None)
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    const fn suffix(self) -> Option<char> {
        match self {
            Promotion::None => None,
            Promotion::Queen => Some('q'),
            Promotion::Rook => Some('r'),
            Promotion::Bishop => Some('b'),
            Promotion::Knight => Some('n'),
        }
    }

    fn from_suffix(c: char) -> Option<Promotion> {
        match c {
            'q' => Some(Promotion::Queen),
            'r' => Some(Promotion::Rook),
            'b' => Some(Promotion::Bishop),
            'n' => Some(Promotion::Knight),
            _ => None,
        }
    }
}

/// A packed half-move. The codec is position-blind: castling and en passant
/// are whatever from/to coordinates the move producer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PackedMove(u16);

impl PackedMove {
    const SQ_MASK: u16 = 0x003f;
    const TO_SHIFT: u16 = 6;
    const PROMO_SHIFT: u16 = 12;
    const PROMO_MASK: u16 = 0x7000;

    pub fn pack(from: u8, to: u8, promo: Promotion) -> Result<PackedMove, MoveError> {
        if from >= 64 {
            return Err(MoveError::InvalidSquare(from));
        }
        if to >= 64 {
            return Err(MoveError::InvalidSquare(to));
        }
        let raw = (from as u16)
            | ((to as u16) << Self::TO_SHIFT)
            | (((promo.code() as u16) << Self::PROMO_SHIFT) & Self::PROMO_MASK);
        Ok(PackedMove(raw))
    }

    /// Pack from raw wire codes, validating the promotion code as well
    /// as the squares.
    pub fn pack_codes(from: u8, to: u8, promo: u8) -> Result<PackedMove, MoveError> {
        PackedMove::pack(from, to, Promotion::from_code(promo)?)
    }

    /// Reinterpret a raw wire value. The reserved bit is preserved as read;
    /// accessors ignore it.
    pub const fn from_raw(raw: u16) -> PackedMove {
        PackedMove(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn from_square(self) -> u8 {
        (self.0 & Self::SQ_MASK) as u8
    }

    pub const fn to_square(self) -> u8 {
        ((self.0 >> Self::TO_SHIFT) & Self::SQ_MASK) as u8
    }

    pub fn promotion(self) -> Promotion {
        Promotion::from_code_lossy(((self.0 & Self::PROMO_MASK) >> Self::PROMO_SHIFT) as u8)
    }

    pub fn unpack(self) -> (u8, u8, Promotion) {
        (self.from_square(), self.to_square(), self.promotion())
    }
}

impl fmt::Display for PackedMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_square(f, self.from_square())?;
        write_square(f, self.to_square())?;
        if let Some(c) = self.promotion().suffix() {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl FromStr for PackedMove {
    type Err = MoveError;

    /// Parse coordinate ("UCI") text: `e2e4`, `e7e8q`.
    fn from_str(s: &str) -> Result<PackedMove, MoveError> {
        let bad = || MoveError::InvalidToken(s.to_string());
        let chars: Vec<char> = s.chars().collect();
        if chars.len() < 4 || chars.len() > 5 {
            return Err(bad());
        }
        let from = parse_square(chars[0], chars[1]).ok_or_else(bad)?;
        let to = parse_square(chars[2], chars[3]).ok_or_else(bad)?;
        let promo = match chars.get(4) {
            None => Promotion::None,
            Some(&c) => Promotion::from_suffix(c.to_ascii_lowercase()).ok_or_else(bad)?,
        };
        PackedMove::pack(from, to, promo)
    }
}

fn parse_square(file: char, rank: char) -> Option<u8> {
    let file = file.to_ascii_lowercase();
    if !('a'..='h').contains(&file) || !('1'..='8').contains(&rank) {
        return None;
    }
    Some((rank as u8 - b'1') * 8 + (file as u8 - b'a'))
}

fn write_square(f: &mut fmt::Formatter<'_>, sq: u8) -> fmt::Result {
    let file = (b'a' + sq % 8) as char;
    let rank = (b'1' + sq / 8) as char;
    write!(f, "{file}{rank}")
}

#[cfg(test)]
mod tests {
    use super::{MoveError, PackedMove, Promotion};

    #[test]
    fn pack_unpack_is_a_bijection() {
        for from in 0u8..64 {
            for to in 0u8..64 {
                for code in 0u8..5 {
                    let promo = Promotion::from_code(code).expect("valid code");
                    let mv = PackedMove::pack(from, to, promo).expect("valid move");
                    assert_eq!(mv.unpack(), (from, to, promo));
                    assert_eq!(mv.raw() & 0x8000, 0);
                }
            }
        }
    }

    #[test]
    fn rejects_out_of_range_squares() {
        assert_eq!(
            PackedMove::pack(64, 0, Promotion::None),
            Err(MoveError::InvalidSquare(64))
        );
        assert_eq!(
            PackedMove::pack(0, 200, Promotion::None),
            Err(MoveError::InvalidSquare(200))
        );
    }

    #[test]
    fn rejects_out_of_range_promotion() {
        assert_eq!(Promotion::from_code(5), Err(MoveError::InvalidPromotion(5)));
        assert_eq!(Promotion::from_code_lossy(7), Promotion::None);
        assert_eq!(
            PackedMove::pack_codes(8, 0, 6),
            Err(MoveError::InvalidPromotion(6))
        );
        assert_eq!(
            PackedMove::pack_codes(8, 0, 1),
            PackedMove::pack(8, 0, Promotion::Queen)
        );
    }

    #[test]
    fn reserved_bit_is_ignored_on_unpack() {
        let mv = PackedMove::pack(12, 28, Promotion::None).expect("valid move");
        let tainted = PackedMove::from_raw(mv.raw() | 0x8000);
        assert_eq!(tainted.unpack(), mv.unpack());
    }

    #[test]
    fn coordinate_text_round_trips() {
        for text in ["e2e4", "g1f3", "e7e8q", "a7a8n", "h2h1r"] {
            let mv: PackedMove = text.parse().expect("parses");
            assert_eq!(mv.to_string(), text);
        }
    }

    #[test]
    fn rejects_malformed_tokens() {
        for text in ["", "e2", "e2e9", "i2e4", "e2e4x", "Nf3"] {
            assert!(text.parse::<PackedMove>().is_err(), "{text:?} parsed");
        }
    }
}
