//! Errors produced while parsing a network document.

use std::fmt;

/// A byte offset into a document being parsed, used to report where a
/// parse error occurred.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub struct Pos {
    /// Line number, 1-indexed; 0 if unknown.
    pub line: usize,
}

impl Pos {
    /// Construct a position at `line`.
    pub fn at_line(line: usize) -> Self {
        Pos { line }
    }

    /// An unspecified position.
    pub fn none() -> Self {
        Pos::default()
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "at unknown position")
        } else {
            write!(f, "at line {}", self.line)
        }
    }
}

/// An error produced while parsing a network document.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A required line or keyword was missing.
    #[error("missing {keyword} {pos}")]
    MissingToken {
        /// The keyword that was expected.
        keyword: &'static str,
        /// Where we expected to find it.
        pos: Pos,
    },
    /// A line existed, but its arguments couldn't be parsed.
    #[error("bad argument to {keyword} {pos}: {problem}")]
    BadArgument {
        /// The keyword whose argument was malformed.
        keyword: &'static str,
        /// What was wrong with it.
        problem: String,
        /// Where it occurred.
        pos: Pos,
    },
    /// The document wasn't valid UTF-8.
    #[error("document is not valid UTF-8")]
    NotUtf8,
    /// A base64 or hex blob couldn't be decoded.
    #[error("invalid encoding {pos}: {problem}")]
    BadEncoding {
        /// What went wrong decoding it.
        problem: String,
        /// Where it occurred.
        pos: Pos,
    },
}

/// The result of a parsing operation.
pub type Result<T> = std::result::Result<T, Error>;
