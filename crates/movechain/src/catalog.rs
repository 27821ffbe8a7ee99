//! Opening catalog: named move sequences that guide deduplication.
//!
//! Loaded once at store open from a tab-separated listing of
//! (code, name, movetext). Move tokens are resolved through the rules
//! seam, so a full engine gets SAN support for free; malformed lines are
//! skipped with a warning. A trie keyed by packed move gives prefix
//! matching in O(game length).

use std::collections::HashMap;
use std::path::Path;

use gametree::PackedMove;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::rules::Rules;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpeningEntry {
    pub code: String,
    pub name: String,
    pub moves: Vec<PackedMove>,
}

#[derive(Default)]
struct TrieNode {
    children: HashMap<u16, usize>,
    terminals: Vec<usize>,
}

pub struct Catalog {
    entries: Vec<OpeningEntry>,
    nodes: Vec<TrieNode>,
    min_plies: usize,
}

impl Catalog {
    pub fn empty(min_plies: usize) -> Catalog {
        Catalog {
            entries: Vec::new(),
            nodes: vec![TrieNode::default()],
            min_plies,
        }
    }

    /// Load a catalog file. Entries shorter than `min_plies` are dropped;
    /// unrecognized lines are skipped, not fatal.
    pub fn load(path: impl AsRef<Path>, rules: &dyn Rules, min_plies: usize) -> Result<Catalog> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut catalog = Catalog::empty(min_plies);
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line, rules) {
                Ok(None) => {}
                Ok(Some(entry)) => {
                    if entry.moves.len() >= min_plies {
                        catalog.insert(entry);
                    } else {
                        debug!(code = %entry.code, plies = entry.moves.len(), "opening below ply threshold");
                    }
                }
                Err(e) => {
                    warn!(line = lineno + 1, error = %e, "skipping catalog line");
                }
            }
        }
        info!(
            path = %path.as_ref().display(),
            entries = catalog.entries.len(),
            "opening catalog loaded"
        );
        Ok(catalog)
    }

    fn insert(&mut self, entry: OpeningEntry) {
        let mut node = 0usize;
        for mv in &entry.moves {
            let next = match self.nodes[node].children.get(&mv.raw()) {
                Some(&next) => next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].children.insert(mv.raw(), next);
                    next
                }
            };
            node = next;
        }
        self.nodes[node].terminals.push(self.entries.len());
        self.entries.push(entry);
    }

    /// Every catalog entry whose move sequence is a prefix of `moves`
    /// (the full length included), in increasing prefix length.
    pub fn match_prefixes(&self, moves: &[PackedMove]) -> Vec<&OpeningEntry> {
        let mut out = Vec::new();
        let mut node = 0usize;
        for mv in moves {
            match self.nodes[node].children.get(&mv.raw()) {
                Some(&next) => node = next,
                None => break,
            }
            for &i in &self.nodes[node].terminals {
                out.push(&self.entries[i]);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line: &str, rules: &dyn Rules) -> Result<Option<OpeningEntry>> {
    let mut fields = line.splitn(3, '\t');
    let (Some(code), Some(name), Some(movetext)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(Error::Catalog(
            "expected three tab-separated fields".to_string(),
        ));
    };
    // Column header row of the conventional listing format.
    if code.eq_ignore_ascii_case("eco") {
        return Ok(None);
    }

    let mut replay = rules.replay();
    let mut moves = Vec::new();
    for token in movetext.split_whitespace() {
        if is_movetext_noise(token) {
            continue;
        }
        let mv = replay
            .play_token(token)
            .map_err(|e| Error::Catalog(format!("token {token:?}: {e}")))?;
        moves.push(mv);
    }
    if moves.is_empty() {
        return Err(Error::Catalog("no moves".to_string()));
    }
    Ok(Some(OpeningEntry {
        code: code.to_string(),
        name: name.to_string(),
        moves,
    }))
}

/// Move numbers and result markers interleaved with movetext.
fn is_movetext_noise(token: &str) -> bool {
    if matches!(token, "*" | "1-0" | "0-1" | "1/2-1/2") {
        return true;
    }
    let stripped = token.trim_end_matches('.');
    stripped.len() < token.len() && stripped.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use gametree::PackedMove;
    use tempfile::tempdir;

    use super::Catalog;
    use crate::rules::CoordinateRules;

    fn packed(tokens: &[&str]) -> Vec<PackedMove> {
        tokens.iter().map(|t| t.parse().expect("move")).collect()
    }

    fn write_catalog(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("openings.tsv");
        let mut file = std::fs::File::create(&path).expect("create");
        for line in lines {
            writeln!(file, "{line}").expect("write");
        }
        (tmp, path)
    }

    #[test]
    fn loads_and_matches_in_increasing_length() {
        let (_tmp, path) = write_catalog(&[
            "eco\tname\tpgn",
            "C60\tRuy Lopez\t1. e2e4 e7e5 2. g1f3 b8c6 3. f1b5 a7a6",
            "C68\tRuy Lopez Exchange\t1. e2e4 e7e5 2. g1f3 b8c6 3. f1b5 a7a6 4. b5c6",
            "A00\tToo Short\t1. e2e4",
            "broken line without tabs",
        ]);
        let catalog = Catalog::load(&path, &CoordinateRules, 6).expect("load");
        assert_eq!(catalog.len(), 2);

        let game = packed(&[
            "e2e4", "e7e5", "g1f3", "b8c6", "f1b5", "a7a6", "b5c6", "d7c6",
        ]);
        let matches = catalog.match_prefixes(&game);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].code, "C60");
        assert_eq!(matches[1].code, "C68");
        assert!(matches[0].moves.len() < matches[1].moves.len());
    }

    #[test]
    fn an_opening_may_equal_the_full_game() {
        let (_tmp, path) = write_catalog(&["C60\tRuy Lopez\te2e4 e7e5 g1f3 b8c6 f1b5 a7a6"]);
        let catalog = Catalog::load(&path, &CoordinateRules, 6).expect("load");
        let game = packed(&["e2e4", "e7e5", "g1f3", "b8c6", "f1b5", "a7a6"]);
        assert_eq!(catalog.match_prefixes(&game).len(), 1);
    }

    #[test]
    fn non_matching_games_get_no_entries() {
        let (_tmp, path) = write_catalog(&["C60\tRuy Lopez\te2e4 e7e5 g1f3 b8c6 f1b5 a7a6"]);
        let catalog = Catalog::load(&path, &CoordinateRules, 6).expect("load");
        let game = packed(&["d2d4", "d7d5", "c2c4", "e7e6", "b1c3", "g8f6"]);
        assert!(catalog.match_prefixes(&game).is_empty());
    }

    #[test]
    fn empty_catalog_matches_nothing() {
        let catalog = Catalog::empty(6);
        assert!(catalog.is_empty());
        assert!(catalog.match_prefixes(&packed(&["e2e4"])).is_empty());
    }
}
