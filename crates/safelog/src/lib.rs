//! Conditionally suppress confidential information from logs.
//!
//! Tor relays and clients log a fair amount of information about the
//! network that, if logged verbatim, would make it easier for an
//! observer to reconstruct who is talking to whom. [`Sensitive`] wraps
//! a value so that its `Display`/`Debug` implementations redact it
//! unless the caller has opted into full logging (e.g. for a `-test`
//! build, or because the operator asked for verbose logs).

use std::fmt;

use fluid_let::fluid_let;

fluid_let! {
    /// Dynamic (thread-local, stack-scoped) override: while set, it takes
    /// precedence over the default redaction behavior for the current
    /// thread. `Some(true)` disables redaction, `Some(false)` forces it.
    static DISABLE_REDACTION: bool;
}

/// Turn safe-logging on or off for the current thread, for the
/// duration of `f`.
///
/// Intended for tests and for commands (like `dump-state`) that need to
/// show real values to a trusted local operator.
pub fn with_safe_logging_suspended<R>(disable_redaction: bool, f: impl FnOnce() -> R) -> R {
    DISABLE_REDACTION.set(&disable_redaction, f)
}

/// Return true if redaction is currently suppressed on this thread.
fn redaction_disabled() -> bool {
    DISABLE_REDACTION.get(|v| v.copied()).flatten().unwrap_or(false)
}

/// Wraps a value that should not appear in logs unless safe-logging has
/// been disabled.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    /// Wrap `value` as sensitive.
    pub fn new(value: T) -> Self {
        Sensitive(value)
    }

    /// Unwrap and return the underlying value.
    pub fn into_inner(self) -> T {
        self.0
    }

    /// Borrow the underlying value without redaction, for code that
    /// needs the real value rather than its log representation.
    pub fn as_inner(&self) -> &T {
        &self.0
    }
}

impl<T: fmt::Display> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if redaction_disabled() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "[scrubbed]")
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if redaction_disabled() {
            write!(f, "{:?}", self.0)
        } else {
            write!(f, "[scrubbed]")
        }
    }
}

impl<T> From<T> for Sensitive<T> {
    fn from(value: T) -> Self {
        Sensitive::new(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn redacts_by_default() {
        let s = Sensitive::new("1.2.3.4");
        assert_eq!(s.to_string(), "[scrubbed]");
        with_safe_logging_suspended(true, || {
            assert_eq!(s.to_string(), "1.2.3.4");
        });
        assert_eq!(s.to_string(), "[scrubbed]");
    }

    #[test]
    fn into_inner_bypasses_redaction() {
        let s = Sensitive::new(42u32);
        assert_eq!(s.into_inner(), 42);
    }
}
