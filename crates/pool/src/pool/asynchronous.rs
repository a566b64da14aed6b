//! Loader-backed pool for one (group, key) pair.

use std::any::type_name;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;

use crate::capability::{AdapterTable, Capability};
use crate::entry::{Claimed, Origin, PoolEntry};
use crate::error::{Error, Result};
use crate::events::{DestroyReason, EventBus, PoolEvent};
use crate::key::{GroupId, ResourceKey};
use crate::loader::{AssetLoader, Placement};
use crate::pool::PoolStats;
use crate::pool::config::PoolConfig;
use crate::pool::lifo::LifoStack;
use crate::refcount::RefCount;
use crate::services::Services;
use crate::template::TemplateCache;

type Instance<L> = <L as AssetLoader>::Instance;

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

struct PoolInner<L: AssetLoader> {
    key: ResourceKey,
    group: GroupId,
    services: Services<L>,
    config: PoolConfig,
    pooled: Mutex<LifoStack<PoolEntry<Instance<L>>>>,
    stats: Mutex<PoolStats>,
    claimed: RefCount,
    closed: AtomicBool,
}

impl<L: AssetLoader> PoolInner<L> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn events(&self) -> &EventBus {
        &self.services.events
    }

    /// Resolve the template and produce one normalized, unclaimed entry.
    async fn create(&self) -> Option<PoolEntry<Instance<L>>> {
        let loader = self.services.loader();
        let produced = match self.services.templates.resolve(&self.key).await {
            Ok(template) => loader
                .instantiate(&self.key, &template, &Placement::default())
                .await
                .map_err(|e| match e {
                    e @ (Error::Creation { .. } | Error::Loader { .. }) => e,
                    other => Error::Creation {
                        key: self.key.clone(),
                        reason: other.to_string(),
                        source: Some(Box::new(other)),
                    },
                }),
            Err(e) => Err(e),
        };

        let instance = match produced {
            Ok(instance) => instance,
            Err(e) => {
                tracing::error!(
                    resource_key = %self.key,
                    group = %self.group,
                    error = %e,
                    "Instance creation failed"
                );
                self.stats.lock().failed += 1;
                self.events().emit(PoolEvent::CreationFailed {
                    key: self.key.clone(),
                    group: self.group.clone(),
                    error: e.to_string(),
                });
                return None;
            }
        };

        let mut entry = PoolEntry::new(instance, self.key.clone(), self.group.clone(), None);
        entry.on_instantiated();
        entry.release();
        self.stats.lock().created += 1;
        self.events().emit(PoolEvent::Created {
            key: self.key.clone(),
            group: self.group.clone(),
            entry: entry.id(),
        });
        tracing::trace!(resource_key = %self.key, entry = %entry.id(), "Created entry");

        if self.is_closed() {
            self.destroy(entry, DestroyReason::Orphaned);
            return None;
        }
        Some(entry)
    }

    /// Claim `entry` and wrap it in a handle that returns here on drop.
    fn hand_out(self: &Arc<Self>, mut entry: PoolEntry<Instance<L>>) -> Claimed<Instance<L>> {
        entry.claim();
        self.claimed.increment();
        self.stats.lock().total_acquisitions += 1;
        self.events().emit(PoolEvent::Claimed {
            key: self.key.clone(),
            group: self.group.clone(),
            entry: entry.id(),
        });

        let origin: Weak<Self> = Arc::downgrade(self);
        let issuer: Origin = origin.clone();
        let loader = Arc::clone(self.services.loader());
        Claimed::new(entry, Arc::clone(&self.services.adapters), move |entry| {
            match origin.upgrade() {
                Some(pool) => pool.take_back(entry),
                None => {
                    tracing::debug!(
                        resource_key = %entry.key(),
                        entry = %entry.id(),
                        "Pool gone, destroying returned entry"
                    );
                    loader.release_instance(entry.into_instance());
                }
            }
        })
        .with_origin(issuer)
    }

    /// Normalize a returned entry and pool it, or destroy it when the pool is
    /// closed or full.
    fn take_back(&self, mut entry: PoolEntry<Instance<L>>) {
        let held_for = entry.release();
        if let Err(e) = self.claimed.decrement(&self.key) {
            self.events().emit(PoolEvent::IntegrityViolation {
                key: self.key.clone(),
                message: e.to_string(),
            });
        }
        self.stats.lock().total_releases += 1;
        self.events().emit(PoolEvent::Released {
            key: self.key.clone(),
            group: self.group.clone(),
            entry: entry.id(),
            held_for,
        });

        if self.is_closed() {
            self.destroy(entry, DestroyReason::Orphaned);
            return;
        }
        self.stash(entry);
    }

    /// Push an unclaimed entry, destroying it if the pool is closed or full.
    fn stash(&self, entry: PoolEntry<Instance<L>>) -> bool {
        if self.is_closed() {
            self.destroy(entry, DestroyReason::Orphaned);
            return false;
        }
        let rejected = {
            let mut pooled = self.pooled.lock();
            if self.config.has_room(pooled.len()) {
                pooled.push(entry);
                None
            } else {
                Some(entry)
            }
        };
        match rejected {
            Some(entry) => {
                self.destroy(entry, DestroyReason::OverCapacity);
                false
            }
            None => true,
        }
    }

    fn destroy(&self, entry: PoolEntry<Instance<L>>, reason: DestroyReason) {
        let id = entry.id();
        self.services.loader().release_instance(entry.into_instance());
        self.stats.lock().destroyed += 1;
        self.events().emit(PoolEvent::Destroyed {
            key: self.key.clone(),
            group: self.group.clone(),
            entry: id,
            reason,
        });
        tracing::trace!(resource_key = %self.key, entry = %id, ?reason, "Destroyed entry");
    }

    fn destroy_all(&self, entries: Vec<PoolEntry<Instance<L>>>, reason: DestroyReason) -> usize {
        let count = entries.len();
        for entry in entries {
            self.destroy(entry, reason);
        }
        count
    }
}

impl<L: AssetLoader> Drop for PoolInner<L> {
    fn drop(&mut self) {
        let loader = self.services.loader();
        for entry in self.pooled.get_mut().drain() {
            loader.release_instance(entry.into_instance());
        }
    }
}

// ---------------------------------------------------------------------------
// AsyncPool<L>
// ---------------------------------------------------------------------------

/// LIFO pool whose entries are produced by an [`AssetLoader`].
///
/// Every miss starts its own creation; concurrent misses are not coalesced.
/// Template resolution underneath is single-flight through the shared
/// [`TemplateCache`]. Claimed entries return to the pool when their handle is
/// dropped.
pub struct AsyncPool<L: AssetLoader> {
    inner: Arc<PoolInner<L>>,
}

impl<L: AssetLoader> Clone for AsyncPool<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: AssetLoader> std::fmt::Debug for AsyncPool<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPool")
            .field("key", &self.inner.key)
            .field("group", &self.inner.group)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<L: AssetLoader> AsyncPool<L> {
    /// Create a standalone pool for `key` in the default group, with its own
    /// template cache, adapter table and event bus.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `config` is invalid.
    pub fn new(loader: Arc<L>, key: ResourceKey, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_services(
            key,
            GroupId::default(),
            Services::new(loader, 1024),
            config,
        ))
    }

    /// Build a pool on shared services; `config` must already be validated.
    pub(crate) fn with_services(
        key: ResourceKey,
        group: GroupId,
        services: Services<L>,
        config: PoolConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                key,
                group,
                services,
                config,
                pooled: Mutex::new(LifoStack::new()),
                stats: Mutex::new(PoolStats::default()),
                claimed: RefCount::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The resource kind this pool holds.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.inner.key
    }

    /// The lifetime group this pool belongs to.
    #[must_use]
    pub fn group(&self) -> &GroupId {
        &self.inner.group
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Adapter table used for capability views.
    #[must_use]
    pub fn adapters(&self) -> &Arc<AdapterTable<Instance<L>>> {
        &self.inner.services.adapters
    }

    /// Template cache the pool resolves through.
    #[must_use]
    pub fn templates(&self) -> &Arc<TemplateCache<L>> {
        &self.inner.services.templates
    }

    /// Event bus the pool emits on.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.services.events
    }

    /// Number of pooled (unclaimed) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.pooled.lock().len()
    }

    /// Whether no entry is pooled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.pooled.lock().is_empty()
    }

    /// Number of entries currently handed out.
    #[must_use]
    pub fn claimed(&self) -> usize {
        self.inner.claimed.get()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let pooled = self.len();
        PoolStats {
            pooled,
            claimed: self.inner.claimed.get(),
            ..self.inner.stats.lock().clone()
        }
    }

    /// Claim the most recently released entry, or create one on a miss.
    ///
    /// Returns `None` if the pool is closed or creation failed; the failure
    /// is logged and emitted as [`PoolEvent::CreationFailed`].
    pub async fn get(&self) -> Option<Claimed<Instance<L>>> {
        if self.inner.is_closed() {
            let err = Error::Closed {
                key: self.inner.key.clone(),
            };
            tracing::warn!(group = %self.inner.group, error = %err, "Acquire on closed pool");
            return None;
        }

        let reused = self.inner.pooled.lock().pop();
        let entry = match reused {
            Some(entry) => entry,
            None => self.inner.create().await?,
        };
        Some(self.inner.hand_out(entry))
    }

    /// Claim an entry and adapt it to view `V` in the same step.
    ///
    /// Returns `None` if `V` cannot be produced for this key; the claimed
    /// entry, if any, goes straight back to the pool.
    pub async fn get_as<V: Capability>(&self) -> Option<Claimed<Instance<L>>> {
        if !self.adapters().supports::<V>(&self.inner.key) {
            let err = Error::UnsupportedCapability {
                key: self.inner.key.clone(),
                capability: type_name::<V>(),
            };
            tracing::warn!(resource_key = %self.inner.key, error = %err, "Cannot adapt entry");
            return None;
        }
        let mut claimed = self.get().await?;
        claimed.view::<V>()?;
        Some(claimed)
    }

    /// Return a claimed entry to this pool.
    ///
    /// # Errors
    /// Returns [`Error::ForeignInstance`] if the entry was issued by another
    /// pool, even one for the same (group, key). The entry is then returned
    /// to its own origin instead.
    pub fn release(&self, claimed: Claimed<Instance<L>>) -> Result<()> {
        let this: Weak<PoolInner<L>> = Arc::downgrade(&self.inner);
        let this: Origin = this;
        if !claimed.is_from(&this) {
            let err = Error::ForeignInstance {
                key: claimed.key().clone(),
                group: claimed.group().clone(),
            };
            tracing::warn!(resource_key = %self.inner.key, error = %err, "Rejected release");
            self.inner.events().emit(PoolEvent::IntegrityViolation {
                key: self.inner.key.clone(),
                message: err.to_string(),
            });
            drop(claimed);
            return Err(err);
        }
        self.inner.take_back(claimed.into_entry());
        Ok(())
    }

    /// Grow or shrink the pool to `size` pooled entries.
    ///
    /// Growth awaits one independent creation per missing entry; shrinking
    /// destroys the most recently released entries at once.
    pub async fn set_size(&self, size: usize) -> usize {
        let pooled = self.len();
        if size > pooled {
            self.add_size(size - pooled).await
        } else {
            self.shrink(pooled - size)
        }
    }

    /// Create `count` entries and pool each one as it completes.
    ///
    /// Returns the number of entries actually pooled.
    pub async fn add_size(&self, count: usize) -> usize {
        self.add_size_with(count, |_| {}).await
    }

    /// Like [`add_size`](Self::add_size), calling `on_create` on every new
    /// entry before it is pooled.
    pub async fn add_size_with<F>(&self, count: usize, mut on_create: F) -> usize
    where
        F: FnMut(&mut PoolEntry<Instance<L>>),
    {
        let mut pending: FuturesUnordered<_> =
            (0..count).map(|_| self.inner.create()).collect();
        let mut pooled = 0;
        while let Some(created) = pending.next().await {
            if let Some(mut entry) = created {
                on_create(&mut entry);
                if self.inner.stash(entry) {
                    pooled += 1;
                }
            }
        }
        tracing::debug!(
            resource_key = %self.inner.key,
            group = %self.inner.group,
            requested = count,
            pooled,
            "Grew pool"
        );
        pooled
    }

    /// Destroy up to `count` pooled entries, most recently released first.
    pub fn shrink(&self, count: usize) -> usize {
        let entries = self.inner.pooled.lock().pop_many(count);
        self.inner.destroy_all(entries, DestroyReason::Shrink)
    }

    /// Destroy every pooled entry. Claimed entries are untouched.
    pub fn drain(&self) -> usize {
        let entries = self.inner.pooled.lock().drain();
        let drained = self.inner.destroy_all(entries, DestroyReason::Drain);
        if drained > 0 {
            tracing::debug!(
                resource_key = %self.inner.key,
                group = %self.inner.group,
                drained,
                "Drained pool"
            );
        }
        drained
    }

    /// Close the pool and destroy every pooled entry.
    ///
    /// Entries returned or created afterwards are destroyed immediately.
    pub fn shutdown(&self) -> usize {
        self.inner.closed.store(true, Ordering::Release);
        let entries = self.inner.pooled.lock().drain();
        let destroyed = self.inner.destroy_all(entries, DestroyReason::Shutdown);
        tracing::debug!(
            resource_key = %self.inner.key,
            group = %self.inner.group,
            destroyed,
            "Pool shut down"
        );
        destroyed
    }
}
