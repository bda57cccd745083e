//! Per-operation deadlines.
//!
//! A [`Deadline`] is fixed when an operation starts and checked as it runs.
//! Store drivers pass [`Deadline::remaining`] to the transport as a request
//! timeout; file loops call [`Deadline::check`] between records. There is no
//! partial-result salvage: an expired deadline fails the whole operation with
//! [`TransferError::Timeout`].

use crate::error::{Result, TransferError};
use std::time::{Duration, Instant};

/// How many records a file loop processes between deadline checks.
pub const DEADLINE_CHECK_INTERVAL: usize = 1024;

/// An absolute point in time after which an operation must stop.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// A deadline far enough away to never fire in practice.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::after(Duration::from_secs(60 * 60 * 24 * 365))
    }

    /// The total budget this deadline was created with.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    /// Time left before expiry.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Timeout`] if the deadline has already passed.
    pub fn remaining(&self) -> Result<Duration> {
        self.budget
            .checked_sub(self.started.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(TransferError::Timeout(self.budget))
    }

    /// Fail if the deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Timeout`] if the deadline has already passed.
    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            Err(TransferError::Timeout(self.budget))
        } else {
            Ok(())
        }
    }

    /// Check the deadline only on every [`DEADLINE_CHECK_INTERVAL`]th record.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Timeout`] if the deadline has already passed.
    pub fn check_every(&self, record: usize) -> Result<()> {
        if record % DEADLINE_CHECK_INTERVAL == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn zero_budget_is_expired() {
        let d = Deadline::after(Duration::ZERO);
        assert!(d.is_expired());
        assert_eq!(d.check().unwrap_err().kind(), ErrorKind::Timeout);
        assert!(d.remaining().is_err());
    }

    #[test]
    fn generous_budget_passes() {
        let d = Deadline::after(Duration::from_secs(30));
        assert!(d.check().is_ok());
        assert!(d.remaining().unwrap() <= Duration::from_secs(30));
    }

    #[test]
    fn check_every_skips_between_intervals() {
        let d = Deadline::after(Duration::ZERO);
        assert!(d.check_every(1).is_ok());
        assert!(d.check_every(0).is_err());
        assert!(d.check_every(DEADLINE_CHECK_INTERVAL).is_err());
    }
}
