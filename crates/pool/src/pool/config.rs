//! Pool configuration types

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration shared by the synchronous and asynchronous pools
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Entries created up front by `prewarm`
    pub initial_size: usize,
    /// Upper bound on pooled (not claimed) entries; releases above it destroy
    /// the entry. `None` means unbounded.
    pub max_pooled: Option<usize>,
    /// Reject releasing an item that is already pooled
    pub check_double_release: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 0,
            max_pooled: None,
            check_double_release: cfg!(debug_assertions),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(max) = self.max_pooled {
            if max == 0 {
                return Err(Error::configuration("max_pooled must be greater than 0"));
            }
            if self.initial_size > max {
                return Err(Error::configuration(format!(
                    "initial_size ({}) must not exceed max_pooled ({max})",
                    self.initial_size
                )));
            }
        }
        Ok(())
    }

    /// Whether a pool holding `pooled` entries can take one more.
    #[must_use]
    pub fn has_room(&self, pooled: usize) -> bool {
        self.max_pooled.is_none_or(|max| pooled < max)
    }
}
