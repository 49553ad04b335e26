//! Provides the unified type-erased error type returned by many (esp.
//! high-level) Tor APIs.
//!
//! This is a reference-pack-local trimmed copy of the real `tor-error`
//! crate: it carries only the surface that `tor-dirmgr` actually needs
//! (`Bug`, the `internal!`/`into_internal!` macros, and `ErrorKind`).
//! Crypto, networking, and the rest of arti are out of scope here.

#![allow(clippy::exhaustive_enums)]

use std::fmt;

/// Classification of the underlying cause of a Tor error, for callers
/// that want to decide how to react without matching on every variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::EnumString, strum::IntoStaticStr)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A bug in this program (or a library it depends on).
    Internal,
    /// A remote party (a directory cache or authority) violated the
    /// protocol.
    TorProtocolViolation,
    /// An I/O error occurred while reading or writing local state.
    CacheCorrupted,
    /// Some other, unclassified failure.
    Other,
}

/// Trait implemented by error types that can report an [`ErrorKind`].
pub trait HasKind {
    /// Return the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// Represents a bug in our code, as opposed to a problem in the
/// environment or from a remote party.
///
/// Construct this with the [`internal!`] macro; never construct it by
/// hand, so that every `Bug` is cheap to trace back to its source.
#[derive(Clone, Debug, thiserror::Error)]
#[error("internal error ({location}): {message}")]
pub struct Bug {
    /// Human-readable description of what went wrong.
    message: String,
    /// `file:line` of the macro invocation that created this bug.
    location: &'static str,
}

impl Bug {
    /// Construct a new `Bug`. Prefer the `internal!` macro, which fills
    /// in `location` for you.
    #[doc(hidden)]
    pub fn new_at(message: String, location: &'static str) -> Self {
        Bug { message, location }
    }
}

impl HasKind for Bug {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Construct a [`Bug`] describing an invariant violation detected at
/// this point in the code.
#[macro_export]
macro_rules! internal {
    ($($fmt:tt)*) => {
        $crate::Bug::new_at(format!($($fmt)*), concat!(file!(), ":", line!()))
    };
}

/// Wrap an existing error as the cause of an internal bug, with an
/// explanatory message.
#[macro_export]
macro_rules! into_internal {
    ($($fmt:tt)*) => {
        |cause| {
            $crate::Bug::new_at(
                format!(
                    "{}: {}",
                    format!($($fmt)*),
                    cause,
                ),
                concat!(file!(), ":", line!()),
            )
        }
    };
}

/// Helper to print an error and the chain of things that caused it.
pub trait ErrorReport {
    /// Return an object that, when `Display`ed, prints this error and
    /// every `source()` behind it, separated by `": "`.
    fn report(&self) -> Report<'_>;
}

impl<E: std::error::Error> ErrorReport for E {
    fn report(&self) -> Report<'_> {
        Report(self)
    }
}

/// Wrapper returned by [`ErrorReport::report`].
pub struct Report<'a>(&'a dyn std::error::Error);

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(e) = source {
            write!(f, ": {}", e)?;
            source = e.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn internal_macro_records_message() {
        let bug: Bug = internal!("{} + {} != {}", 2, 2, 5);
        assert!(bug.to_string().contains("2 + 2 != 5"));
        assert_eq!(bug.kind(), ErrorKind::Internal);
    }
}
