//! Checked reference counting for claim/release bookkeeping.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::key::ResourceKey;

/// Per resource-kind counter that refuses to go below zero.
///
/// An over-release is an invariant violation: `decrement` reports
/// [`Error::ReferenceUnderflow`] and leaves the count untouched.
#[derive(Debug, Default)]
pub struct RefCount {
    value: AtomicUsize,
}

impl RefCount {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> usize {
        self.value.load(Ordering::Acquire)
    }

    /// Increment by one, returning the new value.
    pub fn increment(&self) -> usize {
        self.add(1)
    }

    /// Increment by `n`, returning the new value.
    pub fn add(&self, n: usize) -> usize {
        self.value.fetch_add(n, Ordering::AcqRel) + n
    }

    /// Decrement by one, returning the new value.
    pub fn decrement(&self, key: &ResourceKey) -> Result<usize> {
        self.sub(1, key)
    }

    /// Decrement by `n`, returning the new value.
    ///
    /// Fails without modifying the counter if it holds less than `n`.
    pub fn sub(&self, n: usize, key: &ResourceKey) -> Result<usize> {
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(n)
            })
            .map(|previous| previous - n)
            .map_err(|current| {
                tracing::error!(
                    resource_key = %key,
                    current,
                    requested = n,
                    "Reference count underflow"
                );
                Error::ReferenceUnderflow { key: key.clone() }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ResourceKey {
        ResourceKey::new("fx.spark").unwrap()
    }

    #[test]
    fn increments_and_decrements() {
        let count = RefCount::new();
        assert_eq!(count.increment(), 1);
        assert_eq!(count.add(2), 3);
        assert_eq!(count.decrement(&key()).unwrap(), 2);
        assert_eq!(count.sub(2, &key()).unwrap(), 0);
    }

    #[test]
    fn underflow_is_reported_and_count_unchanged() {
        let count = RefCount::new();
        count.increment();
        let err = count.sub(2, &key()).unwrap_err();
        assert!(matches!(err, Error::ReferenceUnderflow { .. }));
        assert_eq!(count.get(), 1);

        count.decrement(&key()).unwrap();
        assert!(count.decrement(&key()).is_err());
        assert_eq!(count.get(), 0);
    }
}
