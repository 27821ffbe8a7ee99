//! The abstract annotated game tree exchanged with PGN tooling.

use crate::codec::PackedMove;

/// Game outcome as stored in the terminal blob of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum GameResult {
    WhiteWins = 0,
    BlackWins = 1,
    Draw = 2,
    #[default]
    Unknown = 3,
}

impl GameResult {
    pub const fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<GameResult> {
        match code {
            0 => Some(GameResult::WhiteWins),
            1 => Some(GameResult::BlackWins),
            2 => Some(GameResult::Draw),
            3 => Some(GameResult::Unknown),
            _ => None,
        }
    }

    pub fn from_tag(text: &str) -> GameResult {
        match text {
            "1-0" => GameResult::WhiteWins,
            "0-1" => GameResult::BlackWins,
            "1/2-1/2" => GameResult::Draw,
            _ => GameResult::Unknown,
        }
    }

    pub const fn as_tag(self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
            GameResult::Unknown => "*",
        }
    }
}

/// A comment attached to a ply.
///
/// `pre` comments render before the move, `post` after. `semicolon`
/// distinguishes `; rest-of-line` comments from `{ braced }` ones, and
/// `line_break` records a newline emitted right after the comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
    pub pre: bool,
    pub semicolon: bool,
    pub line_break: bool,
}

impl Comment {
    /// A plain post-move brace comment, the common case.
    pub fn post(text: impl Into<String>) -> Comment {
        Comment {
            text: text.into(),
            pre: false,
            semicolon: false,
            line_break: false,
        }
    }
}

/// One annotation on a ply, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    Comment(Comment),
    Nag(u8),
    /// An alternative line replacing this ply; its plies carry their own
    /// notes, nesting arbitrarily.
    Variation(Vec<Ply>),
    /// Layout marker: line break after this move.
    LineBreak,
}

/// A half-move plus everything hanging off it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ply {
    pub mv: PackedMove,
    pub notes: Vec<Note>,
}

impl Ply {
    pub fn new(mv: PackedMove) -> Ply {
        Ply {
            mv,
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mv: PackedMove, notes: Vec<Note>) -> Ply {
        Ply { mv, notes }
    }
}

/// A complete game: header tag pairs plus the annotated mainline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameTree {
    pub tags: Vec<(String, String)>,
    pub plies: Vec<Ply>,
}

impl GameTree {
    pub fn new(tags: Vec<(String, String)>, plies: Vec<Ply>) -> GameTree {
        GameTree { tags, plies }
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Outcome derived from the `Result` tag; `Unknown` when absent.
    pub fn result(&self) -> GameResult {
        self.tag("Result").map(GameResult::from_tag).unwrap_or_default()
    }

    pub fn mainline(&self) -> impl Iterator<Item = PackedMove> + '_ {
        self.plies.iter().map(|p| p.mv)
    }
}

#[cfg(test)]
mod tests {
    use super::{GameResult, GameTree, Ply};

    #[test]
    fn result_codes_round_trip() {
        for code in 0u16..4 {
            let r = GameResult::from_code(code).expect("valid code");
            assert_eq!(r.code(), code);
            assert_eq!(GameResult::from_tag(r.as_tag()), r);
        }
        assert_eq!(GameResult::from_code(4), None);
    }

    #[test]
    fn result_comes_from_the_result_tag() {
        let game = GameTree::new(
            vec![
                ("Event".into(), "Test".into()),
                ("Result".into(), "0-1".into()),
            ],
            vec![Ply::new("e2e4".parse().expect("move"))],
        );
        assert_eq!(game.result(), GameResult::BlackWins);
        assert_eq!(GameTree::default().result(), GameResult::Unknown);
    }
}
