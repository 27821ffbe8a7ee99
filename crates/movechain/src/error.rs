use std::fmt;

use gametree::MoveError;
use thiserror::Error;

/// Which store a missing hash failed to resolve in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Metadata,
    Text,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Blob => f.write_str("blob"),
            ObjectKind::Metadata => f.write_str("metadata"),
            ObjectKind::Text => f.write_str("text"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Move(#[from] MoveError),
    #[error("invalid move: {0}")]
    InvalidMove(String),
    #[error("invalid blob: {0}")]
    InvalidBlob(&'static str),
    #[error("invalid magic")]
    InvalidMagic,
    #[error("unsupported store version {0}")]
    UnsupportedVersion(u16),
    #[error("unsupported hash kind {0}")]
    UnsupportedHashKind(u16),
    #[error("rules engine mismatch: marker has initial hash {expected:016x}, engine produced {actual:016x}")]
    RulesMismatch { expected: u64, actual: u64 },
    #[error("{kind} {hash:016x} not found")]
    NotFound { kind: ObjectKind, hash: u64 },
    #[error("game {0:?} not registered")]
    GameNotFound(String),
    #[error("game {0:?} already registered")]
    DuplicateGameId(String),
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("chain error: {0}")]
    Chain(&'static str),
    #[error("catalog error: {0}")]
    Catalog(String),
}

impl Error {
    pub(crate) fn missing(kind: ObjectKind, hash: u64) -> Error {
        Error::NotFound { kind, hash }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
