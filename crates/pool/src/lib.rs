//! # Stockpile Pool
//!
//! Instance pooling for expensive, asset-backed resource kinds.
//!
//! An [`AssetLoader`] resolves a [`ResourceKey`] to a template and produces
//! instances from it. On top of that this crate provides:
//!
//! - [`SyncPool`]: a hook-driven LIFO pool for synchronously created items.
//! - [`AsyncPool`]: a loader-backed LIFO pool where every miss starts its
//!   own creation.
//! - [`Registry`]: one [`AsyncPool`] per (group, key), created lazily, with
//!   bulk release per group and deterministic shutdown.
//! - [`ContextInventory`]: a single-kind inventory partitioned by owning
//!   context.
//! - [`AdapterTable`]: registered factories that hand an instance out under
//!   a capability view it does not implement itself.
//!
//! Template resolution is single-flight: all pools and inventories built on
//! one registry share a [`TemplateCache`], so a key is resolved at most once
//! while a resolution is pending.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use stockpile_pool::{AssetLoader, GroupId, Registry, RegistryConfig, ResourceKey};
//! # async fn demo<L: AssetLoader>(loader: L) -> stockpile_pool::Result<()> {
//! let registry = Registry::new(Arc::new(loader), RegistryConfig::default())?;
//! let spark = ResourceKey::new("fx.spark")?;
//! if let Some(effect) = registry.get(&GroupId::default(), &spark).await {
//!     // use the instance; dropping the handle returns it to the pool
//!     drop(effect);
//! }
//! registry.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod entry;
pub mod error;
pub mod events;
pub mod inventory;
pub mod key;
pub mod loader;
pub mod pool;
pub mod refcount;
pub mod registry;
pub mod template;

mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{AdapterTable, AsAny, Capability};
pub use entry::{Claimed, PoolEntry, ShimState};
pub use error::{Error, Result};
pub use events::{DestroyReason, EventBus, PoolEvent};
pub use inventory::{ContextInventory, InventoryConfig};
pub use key::{ContextId, EntryId, GroupId, ResourceKey};
pub use loader::{AssetLoader, Placement, PlacementRoot};
pub use pool::{AsyncPool, PoolConfig, PoolStats, Rejected, SyncPool};
pub use refcount::RefCount;
pub use registry::{GroupStats, PoolSnapshot, Registry, RegistryConfig};
pub use template::{TemplateCache, TemplateState};
