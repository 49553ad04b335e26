//! Time-bound values: things that are only valid during a given window.

use std::time::SystemTime;

/// An error caused by checking an object against a timestamp.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum TimeValidityError {
    /// The object isn't valid yet.
    #[error("object is not yet valid")]
    NotYetValid,
    /// The object has expired.
    #[error("object has expired")]
    Expired,
}

/// A value that is valid only for a given range of time.
///
/// Callers should not use the checked value until they have called
/// [`check_valid_at`](Timebound::check_valid_at) or
/// [`check_valid_now`](Timebound::check_valid_now) to confirm it.
pub trait Timebound<T> {
    /// An error type returned when the value isn't valid at a given time.
    type Error;

    /// Return true if this value is valid at `when`.
    fn is_valid_at(&self, when: &SystemTime) -> Result<(), Self::Error>;

    /// Check that this value is valid at `when`, and unwrap it if so.
    fn check_valid_at(self, when: &SystemTime) -> Result<T, Self::Error>;

    /// Check that this value is valid right now, and unwrap it if so.
    fn check_valid_now(self) -> Result<T, Self::Error>
    where
        Self: Sized,
    {
        self.check_valid_at(&SystemTime::now())
    }

    /// Return this value, not checking whether it is valid.
    fn dangerously_assume_timely(self) -> T;
}

/// A value bounded by `valid_after` and `valid_until`, inclusive of
/// the former and exclusive of the latter.
#[derive(Clone, Debug)]
pub struct TimerangeBound<T> {
    /// The bound value.
    value: T,
    /// Start of the validity window, if any.
    valid_after: Option<SystemTime>,
    /// End of the validity window, if any.
    valid_until: Option<SystemTime>,
}

impl<T> TimerangeBound<T> {
    /// Create a new `TimerangeBound`, unbounded until [`Self::check_valid_at`]
    /// narrows it with [`Self::valid_after`]/[`Self::valid_until`].
    pub fn new(value: T, range: std::ops::Range<SystemTime>) -> Self {
        TimerangeBound {
            value,
            valid_after: Some(range.start),
            valid_until: Some(range.end),
        }
    }

    /// Restrict the earliest time at which this is valid.
    pub fn valid_after(mut self, t: SystemTime) -> Self {
        self.valid_after = Some(t);
        self
    }

    /// Restrict the latest time at which this is valid.
    pub fn valid_until(mut self, t: SystemTime) -> Self {
        self.valid_until = Some(t);
        self
    }
}

impl<T> Timebound<T> for TimerangeBound<T> {
    type Error = TimeValidityError;

    fn is_valid_at(&self, when: &SystemTime) -> Result<(), Self::Error> {
        if let Some(start) = self.valid_after {
            if *when < start {
                return Err(TimeValidityError::NotYetValid);
            }
        }
        if let Some(end) = self.valid_until {
            if *when >= end {
                return Err(TimeValidityError::Expired);
            }
        }
        Ok(())
    }

    fn check_valid_at(self, when: &SystemTime) -> Result<T, Self::Error> {
        self.is_valid_at(when)?;
        Ok(self.value)
    }

    fn dangerously_assume_timely(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rejects_outside_window() {
        let now = SystemTime::now();
        let start = now - Duration::from_secs(100);
        let end = now + Duration::from_secs(100);
        let bound = TimerangeBound::new(42u32, start..end);

        assert_eq!(bound.clone().check_valid_at(&now), Ok(42));
        assert_eq!(
            bound.clone().check_valid_at(&(start - Duration::from_secs(1))),
            Err(TimeValidityError::NotYetValid)
        );
        assert_eq!(
            bound.check_valid_at(&end),
            Err(TimeValidityError::Expired)
        );
    }
}
