//! Request counting for proxy identity rotation.

use crate::error::GrabError;

/// Counts requests and signals when the proxy identity should change.
///
/// The counter fires once when the running count reaches the threshold and
/// then starts over from zero. Requests beyond the threshold within the same
/// `record` call are not carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationCounter {
    count: u64,
    threshold: u64,
}

impl RotationCounter {
    /// Create a counter that fires every `threshold` requests.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `threshold` is zero.
    pub fn new(threshold: u64) -> Result<Self, GrabError> {
        if threshold == 0 {
            return Err(GrabError::invalid_argument(
                "requests_per_rotation",
                "must be at least 1",
            ));
        }
        Ok(Self {
            count: 0,
            threshold,
        })
    }

    /// Add `requests` to the count. Returns true when a rotation is due.
    pub fn record(&mut self, requests: u64) -> bool {
        self.count = self.count.saturating_add(requests);
        if self.count >= self.threshold {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Requests left before the next rotation.
    pub fn remaining(&self) -> u64 {
        self.threshold - self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_exactly_on_threshold() {
        let threshold = 5;
        let mut counter = RotationCounter::new(threshold).unwrap();

        for _ in 0..threshold - 1 {
            assert!(!counter.record(1));
        }
        assert_eq!(counter.count(), threshold - 1);
        assert_eq!(counter.remaining(), 1);

        assert!(counter.record(1));
        assert_eq!(counter.count(), 0);

        // The next cycle starts clean
        assert!(!counter.record(1));
    }

    #[test]
    fn test_batch_increment_fires_once() {
        let mut counter = RotationCounter::new(10).unwrap();
        assert!(!counter.record(4));
        assert!(counter.record(25));
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_threshold_of_one_fires_every_request() {
        let mut counter = RotationCounter::new(1).unwrap();
        assert!(counter.record(1));
        assert!(counter.record(1));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert!(matches!(
            RotationCounter::new(0),
            Err(GrabError::InvalidArgument { .. })
        ));
    }
}
