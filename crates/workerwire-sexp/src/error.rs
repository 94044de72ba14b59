use std::fmt;

/// What went wrong while reading a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadErrorKind {
    /// A `)` or `]` with no matching opener, or closing the wrong kind of sequence.
    UnexpectedClose(char),
    /// Input ended in the middle of a value.
    UnexpectedEof,
    /// Syntax this reader does not accept (dotted pairs, backquote, `#<...>`).
    InvalidSyntax(String),
    /// A string or character escape that does not name a character.
    InvalidEscape(String),
    /// An integer literal that does not fit in 64 bits.
    IntegerOverflow(String),
    /// `#N#` for a label whose value is still being read.
    CircularReference(u64),
    /// `#N#` for a label that was never defined.
    UndefinedLabel(u64),
    /// A string literal whose bytes are not UTF-8.
    InvalidUtf8,
    /// Non-whitespace input after the single expected value.
    TrailingData,
    /// Nesting deeper than the reader's limit.
    TooDeep(usize),
}

impl fmt::Display for ReadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedClose(c) => write!(f, "unexpected '{c}'"),
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
            Self::InvalidSyntax(syntax) => write!(f, "invalid read syntax: {syntax}"),
            Self::InvalidEscape(escape) => write!(f, "invalid escape sequence: {escape}"),
            Self::IntegerOverflow(token) => write!(f, "integer out of range: {token}"),
            Self::CircularReference(label) => write!(f, "circular reference to label #{label}"),
            Self::UndefinedLabel(label) => write!(f, "undefined label #{label}"),
            Self::InvalidUtf8 => write!(f, "string literal is not valid UTF-8"),
            Self::TrailingData => write!(f, "trailing data after value"),
            Self::TooDeep(limit) => write!(f, "nesting deeper than {limit} levels"),
        }
    }
}

/// A read failure, positioned at the byte offset where the offending token starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at offset {offset}")]
pub struct ReadError {
    pub kind: ReadErrorKind,
    pub offset: usize,
}

impl ReadError {
    pub fn new(kind: ReadErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

pub type Result<T> = std::result::Result<T, ReadError>;
