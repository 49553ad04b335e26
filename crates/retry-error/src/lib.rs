//! An error type for an operation that can fail more than once.
//!
//! Many of our directory operations attempt the same request against
//! several different sources (authorities, caches) before giving up.
//! [`RetryError`] collects every failure so a caller sees why each
//! attempt failed, not just the last one.

use std::fmt::{self, Display};

/// An error type for an operation that was retried several times, and
/// failed every time.
#[derive(Debug, Clone)]
pub struct RetryError<E> {
    /// Human-readable description of what we were trying to do.
    doing: String,
    /// One error per failed attempt, in the order they occurred.
    errors: Vec<(String, E)>,
    /// How many attempts we were permitted, if different from
    /// `errors.len()` (e.g. because we gave up early).
    max_attempts: usize,
}

impl<E> RetryError<E> {
    /// Create a new empty `RetryError`, to be filled in with
    /// [`push`](Self::push) as attempts fail.
    pub fn in_attempt_to<D: Display>(doing: D) -> Self {
        RetryError {
            doing: doing.to_string(),
            errors: Vec::new(),
            max_attempts: 0,
        }
    }

    /// Record that an attempt, described by `source`, failed with `error`.
    pub fn push<D: Display>(&mut self, source: D, error: E) {
        self.errors.push((source.to_string(), error));
    }

    /// Set the number of attempts that were permitted.
    pub fn set_max_attempts(&mut self, max_attempts: usize) {
        self.max_attempts = max_attempts;
    }

    /// Return the number of failures recorded so far.
    pub fn n_errors(&self) -> usize {
        self.errors.len()
    }

    /// Return true if no failures have been recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over the recorded `(source, error)` pairs.
    pub fn sources(&self) -> impl Iterator<Item = &(String, E)> {
        self.errors.iter()
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "unable to {}: no attempts were made", self.doing),
            1 => {
                let (source, err) = &self.errors[0];
                write!(f, "unable to {} from {}: {}", self.doing, source, err)
            }
            n => {
                write!(f, "unable to {} after {} attempts", self.doing, n)?;
                for (source, err) in &self.errors {
                    write!(f, "; {}: {}", source, err)?;
                }
                Ok(())
            }
        }
    }
}

impl<E: Display + fmt::Debug> std::error::Error for RetryError<E> {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accumulates_in_order() {
        let mut e: RetryError<&str> = RetryError::in_attempt_to("fetch a consensus");
        assert!(e.is_empty());
        e.push("authority A", "timed out");
        e.push("authority B", "connection refused");
        assert_eq!(e.n_errors(), 2);
        let rendered = e.to_string();
        assert!(rendered.contains("authority A"));
        assert!(rendered.contains("authority B"));
    }
}
