//! Synchronous and asynchronous instance pools.
//!
//! [`SyncPool`] is a plain LIFO pool driven by caller-supplied hooks.
//! [`AsyncPool`] produces entries through the asset loader and hands them
//! out as [`Claimed`](crate::entry::Claimed) handles that return on drop.

mod asynchronous;
mod config;
pub(crate) mod lifo;
mod sync;

pub use asynchronous::AsyncPool;
pub use config::PoolConfig;
pub use sync::{Rejected, SyncPool};

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolStats {
    /// Total successful acquisitions.
    pub total_acquisitions: u64,
    /// Total releases back to the pool.
    pub total_releases: u64,
    /// Current number of entries handed out.
    pub claimed: usize,
    /// Current number of entries waiting in the pool.
    pub pooled: usize,
    /// Total entries ever created.
    pub created: u64,
    /// Total entries ever destroyed.
    pub destroyed: u64,
    /// Total creations that failed.
    pub failed: u64,
}
