//! Pool registry: one asynchronous pool per (group, key).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::capability::{AdapterTable, Capability};
use crate::entry::Claimed;
use crate::error::{Error, Result};
use crate::events::{EventBus, PoolEvent};
use crate::inventory::{ContextInventory, InventoryConfig};
use crate::key::{GroupId, ResourceKey};
use crate::loader::AssetLoader;
use crate::pool::{AsyncPool, PoolConfig, PoolStats};
use crate::services::Services;
use crate::template::TemplateCache;

type Instance<L> = <L as AssetLoader>::Instance;

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`Registry`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegistryConfig {
    /// Settings applied to every pool the registry creates
    pub pool: PoolConfig,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
    /// Default key per category, substituted when a raw key is empty
    pub fallback: HashMap<String, String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            event_buffer: 1024,
            fallback: HashMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Validate registry configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        if self.event_buffer == 0 {
            return Err(Error::configuration("event_buffer must be greater than 0"));
        }
        if let Some((category, _)) = self
            .fallback
            .iter()
            .find(|(_, key)| key.trim().is_empty())
        {
            return Err(Error::configuration(format!(
                "fallback key for category '{category}' must not be empty"
            )));
        }
        Ok(())
    }

    /// Register `key` as the default for `category`.
    #[must_use]
    pub fn with_fallback(mut self, category: impl Into<String>, key: impl Into<String>) -> Self {
        self.fallback.insert(category.into(), key.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Statistics of one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// The owning group.
    pub group: GroupId,
    /// The resource kind.
    pub key: ResourceKey,
    /// Pool counters.
    pub stats: PoolStats,
}

/// Totals across every pool of one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Number of pools in the group.
    pub pools: usize,
    /// Pooled entries across the group.
    pub pooled: usize,
    /// Claimed entries across the group.
    pub claimed: usize,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Owner of every asynchronous pool built on one loader.
///
/// Pools are created lazily on first use and keyed by (group, key). All of
/// them share the registry's template cache, adapter table and event bus.
pub struct Registry<L: AssetLoader> {
    services: Services<L>,
    config: RegistryConfig,
    pools: DashMap<(GroupId, ResourceKey), AsyncPool<L>>,
}

impl<L: AssetLoader> Registry<L> {
    /// Create an empty registry in front of `loader`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `config` is invalid.
    pub fn new(loader: Arc<L>, config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            services: Services::new(loader, config.event_buffer),
            config,
            pools: DashMap::new(),
        })
    }

    /// Registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The shared loader.
    #[must_use]
    pub fn loader(&self) -> &Arc<L> {
        self.services.loader()
    }

    /// Adapter table shared by every pool.
    #[must_use]
    pub fn adapters(&self) -> &Arc<AdapterTable<Instance<L>>> {
        &self.services.adapters
    }

    /// Template cache shared by every pool.
    #[must_use]
    pub fn templates(&self) -> &Arc<TemplateCache<L>> {
        &self.services.templates
    }

    /// Event bus shared by every pool.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.services.events
    }

    /// Subscribe to pool events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.services.events.subscribe()
    }

    /// Number of pools created so far.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Validate a raw key, substituting the category default for an empty one.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKey`] if `raw` is empty and `category` has no
    /// configured fallback.
    pub fn resolve_key(&self, raw: &str, category: Option<&str>) -> Result<ResourceKey> {
        match ResourceKey::new(raw) {
            Ok(key) => Ok(key),
            Err(err) => {
                let Some(default) = category.and_then(|c| self.config.fallback.get(c)) else {
                    tracing::warn!(category = ?category, error = %err, "Rejected resource key");
                    return Err(err);
                };
                tracing::debug!(category = ?category, fallback = %default, "Substituted fallback key");
                ResourceKey::new(default.as_str())
            }
        }
    }

    /// The pool for (group, key), created on first request.
    pub fn get_pool(&self, group: &GroupId, key: &ResourceKey) -> AsyncPool<L> {
        let id = (group.clone(), key.clone());
        if let Some(pool) = self.pools.get(&id) {
            return pool.value().clone();
        }

        self.pools
            .entry(id)
            .or_insert_with(|| {
                tracing::debug!(resource_key = %key, group = %group, "Created pool");
                self.services.events.emit(PoolEvent::PoolCreated {
                    key: key.clone(),
                    group: group.clone(),
                });
                AsyncPool::with_services(
                    key.clone(),
                    group.clone(),
                    self.services.clone(),
                    self.config.pool.clone(),
                )
            })
            .value()
            .clone()
    }

    /// The pool for (group, key), if it exists.
    #[must_use]
    pub fn pool(&self, group: &GroupId, key: &ResourceKey) -> Option<AsyncPool<L>> {
        self.pools
            .get(&(group.clone(), key.clone()))
            .map(|pool| pool.value().clone())
    }

    /// Claim an entry of `key` in `group`.
    pub async fn get(&self, group: &GroupId, key: &ResourceKey) -> Option<Claimed<Instance<L>>> {
        // Clone the pool handle so no shard lock is held across the await.
        let pool = self.get_pool(group, key);
        pool.get().await
    }

    /// Claim an entry of `key` in `group` adapted to view `V`.
    pub async fn get_as<V: Capability>(
        &self,
        group: &GroupId,
        key: &ResourceKey,
    ) -> Option<Claimed<Instance<L>>> {
        let pool = self.get_pool(group, key);
        pool.get_as::<V>().await
    }

    /// Return a claimed entry to the pool recorded on it.
    ///
    /// # Errors
    /// Returns [`Error::ForeignInstance`] if no pool exists for the entry's
    /// (group, key), or if that pool did not issue it. No other pool is
    /// touched; the entry goes back to its own origin.
    pub fn release(&self, claimed: Claimed<Instance<L>>) -> Result<()> {
        let Some(pool) = self.pool(claimed.group(), claimed.key()) else {
            let err = Error::ForeignInstance {
                key: claimed.key().clone(),
                group: claimed.group().clone(),
            };
            tracing::warn!(entry = %claimed.id(), error = %err, "Rejected release");
            self.services.events.emit(PoolEvent::IntegrityViolation {
                key: claimed.key().clone(),
                message: err.to_string(),
            });
            drop(claimed);
            return Err(err);
        };
        pool.release(claimed)
    }

    /// Grow the pool for (group, key) to the configured initial size.
    pub async fn prewarm(&self, group: &GroupId, key: &ResourceKey) -> usize {
        let pool = self.get_pool(group, key);
        let missing = self.config.pool.initial_size.saturating_sub(pool.len());
        pool.add_size(missing).await
    }

    /// Destroy every pooled entry of every pool in `group`.
    ///
    /// Claimed entries are untouched and return to their pools as usual.
    pub fn release_all_pooled_in_all_pools(&self, group: &GroupId) -> usize {
        let drained: usize = self
            .pools_in(group)
            .iter()
            .map(AsyncPool::drain)
            .sum();
        tracing::debug!(group = %group, drained, "Released pooled entries of group");
        drained
    }

    /// Build a context-scoped inventory sharing this registry's loader,
    /// template cache, adapter table and event bus.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `config` is invalid.
    pub fn context_inventory(
        &self,
        key: ResourceKey,
        config: InventoryConfig,
    ) -> Result<ContextInventory<L>> {
        ContextInventory::with_services(key, self.services.clone(), config)
    }

    /// Statistics of every pool, ordered by (group, key).
    #[must_use]
    pub fn stats(&self) -> Vec<PoolSnapshot> {
        let mut snapshots: Vec<_> = self
            .pools
            .iter()
            .map(|pool| PoolSnapshot {
                group: pool.key().0.clone(),
                key: pool.key().1.clone(),
                stats: pool.value().stats(),
            })
            .collect();
        snapshots.sort_by(|a, b| (&a.group, &a.key).cmp(&(&b.group, &b.key)));
        snapshots
    }

    /// Totals across the pools of `group`.
    #[must_use]
    pub fn group_stats(&self, group: &GroupId) -> GroupStats {
        self.pools_in(group)
            .iter()
            .fold(GroupStats::default(), |mut totals, pool| {
                totals.pools += 1;
                totals.pooled += pool.len();
                totals.claimed += pool.claimed();
                totals
            })
    }

    /// Close every pool, destroy every pooled entry and release every cached
    /// template. Returns the number of entries destroyed.
    ///
    /// Claimed entries are destroyed when they come back.
    pub fn shutdown(&self) -> usize {
        let pools: Vec<AsyncPool<L>> = self
            .pools
            .iter()
            .map(|pool| pool.value().clone())
            .collect();
        let destroyed: usize = pools.iter().map(AsyncPool::shutdown).sum();
        self.pools.clear();
        let templates = self.services.templates.clear();
        tracing::debug!(
            pools = pools.len(),
            destroyed,
            templates,
            "Registry shut down"
        );
        destroyed
    }

    fn pools_in(&self, group: &GroupId) -> Vec<AsyncPool<L>> {
        self.pools
            .iter()
            .filter(|pool| &pool.key().0 == group)
            .map(|pool| pool.value().clone())
            .collect()
    }
}

impl<L: AssetLoader> std::fmt::Debug for Registry<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("pool_count", &self.pools.len())
            .field("templates", &self.services.templates)
            .finish()
    }
}
