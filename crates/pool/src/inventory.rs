//! Context-scoped inventory for a single resource kind.
//!
//! A [`ContextInventory`] owns a slot list of entries, each optionally tagged
//! with the [`ContextId`] that owns it. Callers keep a minimum number of
//! entries per context with [`ContextInventory::ensure_instances`], acquire
//! context-local entries with [`ContextInventory::get_context_instance`], and
//! tear a context down with
//! [`ContextInventory::remove_all_instances_with_context`].
//!
//! The reference count tracks live entries (pooled and claimed). It goes up
//! on every creation and down by exactly the number of entries removed.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::capability::AdapterTable;
use crate::entry::{Claimed, PoolEntry};
use crate::error::{Error, Result};
use crate::events::{DestroyReason, EventBus, PoolEvent};
use crate::key::{ContextId, EntryId, GroupId, ResourceKey};
use crate::loader::{AssetLoader, Placement, PlacementRoot};
use crate::refcount::RefCount;
use crate::services::Services;
use crate::template::{TemplateCache, TemplateState};

type Instance<L> = <L as AssetLoader>::Instance;

// ---------------------------------------------------------------------------
// InventoryConfig
// ---------------------------------------------------------------------------

/// Configuration for a context-scoped inventory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InventoryConfig {
    /// Node pooled entries are parked under while not claimed
    pub pool_root: Option<PlacementRoot>,
    /// Group recorded on every entry
    pub group: GroupId,
}

impl InventoryConfig {
    /// Validate inventory configuration.
    pub fn validate(&self) -> Result<()> {
        if self.group.as_str().trim().is_empty() {
            return Err(Error::configuration("group must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

enum SlotState<I> {
    Pooled(PoolEntry<I>),
    Claimed,
}

struct Slot<I> {
    id: EntryId,
    context: Option<ContextId>,
    generation: u64,
    state: SlotState<I>,
}

impl<I> Slot<I> {
    fn is_pooled(&self) -> bool {
        matches!(self.state, SlotState::Pooled(_))
    }
}

struct InventoryState<I> {
    key: ResourceKey,
    generation: u64,
    /// Oldest first.
    slots: Vec<Slot<I>>,
    /// Claimed entries whose slot was removed while they were out.
    detached: HashSet<EntryId>,
}

impl<I> InventoryState<I> {
    fn position(&self, id: EntryId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.id == id)
    }

    fn count(&self, context: Option<ContextId>) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.context == context && slot.generation == self.generation)
            .count()
    }

    /// Remove every slot matching `predicate`, returning the pooled entries
    /// and the number of slots removed. Claimed entries become detached.
    fn remove_where<F>(&mut self, predicate: F) -> (Vec<PoolEntry<I>>, usize)
    where
        F: FnMut(&Slot<I>) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.slots).into_iter().partition(predicate);
        self.slots = kept;

        let count = removed.len();
        let mut pooled = Vec::new();
        for slot in removed {
            match slot.state {
                SlotState::Pooled(entry) => pooled.push(entry),
                SlotState::Claimed => {
                    self.detached.insert(slot.id);
                }
            }
        }
        (pooled, count)
    }
}

// ---------------------------------------------------------------------------
// Inventory internals
// ---------------------------------------------------------------------------

struct InventoryInner<L: AssetLoader> {
    services: Services<L>,
    config: InventoryConfig,
    state: Mutex<InventoryState<Instance<L>>>,
    live: RefCount,
}

impl<L: AssetLoader> InventoryInner<L> {
    fn current(&self) -> (ResourceKey, u64) {
        let state = self.state.lock();
        (state.key.clone(), state.generation)
    }

    async fn produce(
        &self,
        key: &ResourceKey,
        template: &L::Template,
        context: Option<ContextId>,
        placement: &Placement,
    ) -> Option<PoolEntry<Instance<L>>> {
        match self
            .services
            .loader()
            .instantiate(key, template, placement)
            .await
        {
            Ok(instance) => {
                let mut entry =
                    PoolEntry::new(instance, key.clone(), self.config.group.clone(), context);
                entry.on_instantiated();
                entry.release();
                self.services.events.emit(PoolEvent::Created {
                    key: key.clone(),
                    group: self.config.group.clone(),
                    entry: entry.id(),
                });
                Some(entry)
            }
            Err(e) => {
                tracing::error!(resource_key = %key, error = %e, "Inventory instance creation failed");
                self.services.events.emit(PoolEvent::CreationFailed {
                    key: key.clone(),
                    group: self.config.group.clone(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    fn park(&self, instance: &mut Instance<L>) {
        if let Some(root) = self.config.pool_root {
            self.services.loader().place(instance, &Placement::under(root));
        }
    }

    fn hand_out(self: &Arc<Self>, mut entry: PoolEntry<Instance<L>>) -> Claimed<Instance<L>> {
        entry.claim();
        self.services.events.emit(PoolEvent::Claimed {
            key: entry.key().clone(),
            group: entry.group().clone(),
            entry: entry.id(),
        });

        let origin: Weak<Self> = Arc::downgrade(self);
        let loader = Arc::clone(self.services.loader());
        Claimed::new(
            entry,
            Arc::clone(&self.services.adapters),
            move |entry| match origin.upgrade() {
                Some(inventory) => inventory.take_back(entry),
                None => loader.release_instance(entry.into_instance()),
            },
        )
    }

    fn take_back(&self, mut entry: PoolEntry<Instance<L>>) {
        let id = entry.id();
        let held_for = entry.release();
        self.park(entry.instance_mut());
        self.services.events.emit(PoolEvent::Released {
            key: entry.key().clone(),
            group: entry.group().clone(),
            entry: id,
            held_for,
        });

        let reason = {
            let mut state = self.state.lock();
            match state.position(id) {
                Some(index) if state.slots[index].generation != state.generation => {
                    state.slots.remove(index);
                    DestroyReason::Stale
                }
                Some(index) => {
                    state.slots[index].state = SlotState::Pooled(entry);
                    return;
                }
                None if state.detached.remove(&id) => DestroyReason::ContextRemoved,
                None => DestroyReason::Orphaned,
            }
        };

        if reason == DestroyReason::Stale {
            self.forget(1, entry.key());
        }
        self.destroy(entry, reason);
    }

    /// Drop `n` from the live count, reporting an underflow.
    fn forget(&self, n: usize, key: &ResourceKey) {
        if n == 0 {
            return;
        }
        if let Err(e) = self.live.sub(n, key) {
            self.services.events.emit(PoolEvent::IntegrityViolation {
                key: key.clone(),
                message: e.to_string(),
            });
        }
    }

    fn destroy(&self, entry: PoolEntry<Instance<L>>, reason: DestroyReason) {
        let id = entry.id();
        let key = entry.key().clone();
        let group = entry.group().clone();
        self.services.loader().release_instance(entry.into_instance());
        self.services.events.emit(PoolEvent::Destroyed {
            key,
            group,
            entry: id,
            reason,
        });
    }
}

impl<L: AssetLoader> Drop for InventoryInner<L> {
    fn drop(&mut self) {
        let loader = self.services.loader();
        for slot in self.state.get_mut().slots.drain(..) {
            if let SlotState::Pooled(entry) = slot.state {
                loader.release_instance(entry.into_instance());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ContextInventory<L>
// ---------------------------------------------------------------------------

/// Single-kind inventory partitioned by owning context.
pub struct ContextInventory<L: AssetLoader> {
    inner: Arc<InventoryInner<L>>,
}

impl<L: AssetLoader> Clone for ContextInventory<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: AssetLoader> std::fmt::Debug for ContextInventory<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ContextInventory")
            .field("key", &state.key)
            .field("slots", &state.slots.len())
            .field("live", &self.inner.live.get())
            .finish()
    }
}

impl<L: AssetLoader> ContextInventory<L> {
    /// Create a standalone inventory for `key` with its own template cache,
    /// adapter table and event bus.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `config` is invalid.
    pub fn new(loader: Arc<L>, key: ResourceKey, config: InventoryConfig) -> Result<Self> {
        Self::with_services(key, Services::new(loader, 1024), config)
    }

    pub(crate) fn with_services(
        key: ResourceKey,
        services: Services<L>,
        config: InventoryConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(InventoryInner {
                services,
                config,
                state: Mutex::new(InventoryState {
                    key,
                    generation: 0,
                    slots: Vec::new(),
                    detached: HashSet::new(),
                }),
                live: RefCount::new(),
            }),
        })
    }

    /// The resource kind currently served.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        self.inner.state.lock().key.clone()
    }

    /// Inventory configuration.
    #[must_use]
    pub fn config(&self) -> &InventoryConfig {
        &self.inner.config
    }

    /// Adapter table used for capability views.
    #[must_use]
    pub fn adapters(&self) -> &Arc<AdapterTable<Instance<L>>> {
        &self.inner.services.adapters
    }

    /// Template cache the inventory resolves through.
    #[must_use]
    pub fn templates(&self) -> &Arc<TemplateCache<L>> {
        &self.inner.services.templates
    }

    /// Event bus the inventory emits on.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.services.events
    }

    /// Template state of the current key.
    #[must_use]
    pub fn state(&self) -> TemplateState {
        self.inner.services.templates.state(&self.key())
    }

    /// Resolve the current key, or join the resolution already in flight.
    pub async fn resolve(&self) -> Result<Arc<L::Template>> {
        let key = self.key();
        self.inner.services.templates.resolve(&key).await
    }

    /// Switch to another resource kind.
    ///
    /// Pooled entries of the old kind are destroyed now; claimed ones are
    /// destroyed when they come back. The new key resolves on demand.
    pub fn set_key(&self, key: ResourceKey) -> usize {
        let (stale, removed) = {
            let mut state = self.inner.state.lock();
            if state.key == key {
                return 0;
            }
            tracing::debug!(from = %state.key, to = %key, "Inventory key changed");
            state.key = key.clone();
            state.generation += 1;
            let current = state.generation;
            let (stale, _) =
                state.remove_where(|slot| slot.is_pooled() && slot.generation != current);
            let removed = stale.len();
            (stale, removed)
        };
        self.inner.forget(removed, &key);
        for entry in stale {
            self.inner.destroy(entry, DestroyReason::Stale);
        }
        removed
    }

    /// Make `context` own exactly `count` entries, or at least `count` when
    /// `allow_delete` is false.
    ///
    /// Surplus pooled entries are destroyed oldest first. A shortfall is only
    /// filled once the template is resolved; before that the call does
    /// nothing and returns [`Error::Unresolved`]. Returns the resulting count.
    pub async fn ensure_instances(
        &self,
        context: Option<ContextId>,
        count: usize,
        allow_delete: bool,
    ) -> Result<usize> {
        let (key, generation) = self.inner.current();
        let existing = self.count(context);

        if existing > count {
            if allow_delete {
                self.trim(context, existing - count, &key);
            }
            return Ok(self.count(context));
        }
        if existing == count {
            return Ok(existing);
        }

        let Some(template) = self.inner.services.templates.get(&key) else {
            let err = Error::Unresolved { key: key.clone() };
            tracing::error!(resource_key = %key, context = ?context, error = %err, "Cannot fill inventory");
            return Err(err);
        };

        let placement = Placement {
            root: self.inner.config.pool_root,
            ..Placement::default()
        };
        let mut pending: FuturesUnordered<_> = (existing..count)
            .map(|_| self.inner.produce(&key, &template, context, &placement))
            .collect();
        while let Some(created) = pending.next().await {
            let Some(entry) = created else { continue };
            let stale = {
                let mut state = self.inner.state.lock();
                if state.generation == generation {
                    self.inner.live.increment();
                    state.slots.push(Slot {
                        id: entry.id(),
                        context,
                        generation,
                        state: SlotState::Pooled(entry),
                    });
                    None
                } else {
                    Some(entry)
                }
            };
            if let Some(entry) = stale {
                self.inner.destroy(entry, DestroyReason::Stale);
            }
        }

        let total = self.count(context);
        tracing::debug!(resource_key = %key, context = ?context, total, "Ensured inventory");
        Ok(total)
    }

    /// Claim an entry owned by `context`, repositioned to `placement`.
    ///
    /// Pooled entries of the same context are reused first; an entry is
    /// created only on a miss. Returns `None` if creation failed.
    pub async fn get_context_instance(
        &self,
        context: Option<ContextId>,
        placement: Placement,
    ) -> Option<Claimed<Instance<L>>> {
        let reused = {
            let mut state = self.inner.state.lock();
            let generation = state.generation;
            state
                .slots
                .iter_mut()
                .rev()
                .find(|slot| {
                    slot.context == context && slot.generation == generation && slot.is_pooled()
                })
                .and_then(|slot| match std::mem::replace(&mut slot.state, SlotState::Claimed) {
                    SlotState::Pooled(entry) => Some(entry),
                    SlotState::Claimed => None,
                })
        };

        if let Some(mut entry) = reused {
            self.inner
                .services
                .loader()
                .place(entry.instance_mut(), &placement);
            return Some(self.inner.hand_out(entry));
        }

        let (key, generation) = self.inner.current();
        let template = match self.inner.services.templates.resolve(&key).await {
            Ok(template) => template,
            Err(e) => {
                tracing::error!(resource_key = %key, error = %e, "Cannot create context instance");
                return None;
            }
        };
        let entry = self
            .inner
            .produce(&key, &template, context, &placement)
            .await?;

        {
            let mut state = self.inner.state.lock();
            if state.generation == generation {
                self.inner.live.increment();
                state.slots.push(Slot {
                    id: entry.id(),
                    context,
                    generation,
                    state: SlotState::Claimed,
                });
            } else {
                drop(state);
                tracing::debug!(resource_key = %key, "Key changed during creation, discarding");
                self.inner.destroy(entry, DestroyReason::Stale);
                return None;
            }
        }
        Some(self.inner.hand_out(entry))
    }

    /// Return a claimed entry.
    ///
    /// Entries whose context was removed, or whose kind is stale, are
    /// destroyed instead of pooled.
    ///
    /// # Errors
    /// Returns [`Error::ForeignInstance`] if the entry was never issued by
    /// this inventory. It then goes back to its own origin.
    pub fn release(&self, claimed: Claimed<Instance<L>>) -> Result<()> {
        let id = claimed.id();
        let known = {
            let state = self.inner.state.lock();
            state.position(id).is_some() || state.detached.contains(&id)
        };
        if !known {
            let err = Error::ForeignInstance {
                key: claimed.key().clone(),
                group: claimed.group().clone(),
            };
            tracing::warn!(entry = %id, error = %err, "Rejected inventory release");
            self.inner
                .services
                .events
                .emit(PoolEvent::IntegrityViolation {
                    key: claimed.key().clone(),
                    message: err.to_string(),
                });
            drop(claimed);
            return Err(err);
        }
        self.inner.take_back(claimed.into_entry());
        Ok(())
    }

    /// Remove every entry tagged with `context`.
    ///
    /// Pooled entries are destroyed at once; claimed ones are destroyed when
    /// they come back. The reference count drops by the number removed.
    pub fn remove_all_instances_with_context(&self, context: ContextId) -> usize {
        let (key, pooled, removed) = {
            let mut state = self.inner.state.lock();
            let key = state.key.clone();
            let (pooled, removed) = state.remove_where(|slot| slot.context == Some(context));
            (key, pooled, removed)
        };
        self.inner.forget(removed, &key);
        for entry in pooled {
            self.inner.destroy(entry, DestroyReason::ContextRemoved);
        }
        tracing::debug!(resource_key = %key, %context, removed, "Removed context instances");
        self.inner.services.events.emit(PoolEvent::ContextPurged {
            key,
            context,
            removed,
        });
        removed
    }

    /// Remove every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let (key, pooled, removed) = {
            let mut state = self.inner.state.lock();
            let key = state.key.clone();
            let (pooled, removed) = state.remove_where(|_| true);
            (key, pooled, removed)
        };
        self.inner.forget(removed, &key);
        for entry in pooled {
            self.inner.destroy(entry, DestroyReason::Drain);
        }
        removed
    }

    /// Number of current-kind entries owned by `context`.
    #[must_use]
    pub fn count(&self, context: Option<ContextId>) -> usize {
        self.inner.state.lock().count(context)
    }

    /// Number of slots, pooled and claimed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    /// Whether the inventory holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().slots.is_empty()
    }

    /// Number of pooled entries.
    #[must_use]
    pub fn pooled_len(&self) -> usize {
        self.inner
            .state
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.is_pooled())
            .count()
    }

    /// Live entries accounted by the reference count.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.inner.live.get()
    }

    fn trim(&self, context: Option<ContextId>, surplus: usize, key: &ResourceKey) {
        let doomed = {
            let mut state = self.inner.state.lock();
            let generation = state.generation;
            let ids: HashSet<EntryId> = state
                .slots
                .iter()
                .filter(|slot| {
                    slot.context == context && slot.generation == generation && slot.is_pooled()
                })
                .take(surplus)
                .map(|slot| slot.id)
                .collect();
            let (doomed, _) = state.remove_where(|slot| ids.contains(&slot.id));
            doomed
        };
        if doomed.len() < surplus {
            tracing::debug!(
                resource_key = %key,
                context = ?context,
                surplus,
                removed = doomed.len(),
                "Claimed entries kept while trimming"
            );
        }
        self.inner.forget(doomed.len(), key);
        for entry in doomed {
            self.inner.destroy(entry, DestroyReason::Surplus);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLoader;

    fn inventory() -> ContextInventory<MockLoader> {
        ContextInventory::new(
            Arc::new(MockLoader::new()),
            ResourceKey::new("ui.panel").unwrap(),
            InventoryConfig {
                pool_root: Some(PlacementRoot(7)),
                ..InventoryConfig::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ensure_before_resolution_is_noop() {
        let inventory = inventory();
        let owner = ContextId::new();
        let err = inventory
            .ensure_instances(Some(owner), 2, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unresolved { .. }));
        assert_eq!(inventory.count(Some(owner)), 0);
        assert_eq!(inventory.state(), TemplateState::Unresolved);
    }

    #[tokio::test]
    async fn created_entries_are_parked_under_root() {
        let inventory = inventory();
        let owner = ContextId::new();
        inventory.resolve().await.unwrap();
        inventory.ensure_instances(Some(owner), 1, true).await.unwrap();

        let claimed = inventory
            .get_context_instance(Some(owner), Placement::default().at([1.0, 2.0, 3.0]))
            .await
            .unwrap();
        assert_eq!(claimed.root, Some(PlacementRoot(7)));
        assert_eq!(claimed.position, Some([1.0, 2.0, 3.0]));
        drop(claimed);
        assert_eq!(inventory.pooled_len(), 1);
    }

    #[tokio::test]
    async fn stale_claimed_entry_is_destroyed_on_return() {
        let inventory = inventory();
        let claimed = inventory
            .get_context_instance(None, Placement::default())
            .await
            .unwrap();
        inventory.ensure_instances(None, 2, false).await.unwrap();
        assert_eq!(inventory.reference_count(), 2);

        assert_eq!(inventory.set_key(ResourceKey::new("ui.tooltip").unwrap()), 1);
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.reference_count(), 1);

        inventory.release(claimed).unwrap();
        assert!(inventory.is_empty());
        assert_eq!(inventory.reference_count(), 0);
    }

    #[tokio::test]
    async fn trim_keeps_claimed_entries() {
        let inventory = inventory();
        let owner = ContextId::new();
        inventory.resolve().await.unwrap();
        inventory.ensure_instances(Some(owner), 2, true).await.unwrap();
        let a = inventory
            .get_context_instance(Some(owner), Placement::default())
            .await
            .unwrap();
        let b = inventory
            .get_context_instance(Some(owner), Placement::default())
            .await
            .unwrap();

        assert_eq!(
            inventory.ensure_instances(Some(owner), 0, true).await.unwrap(),
            2
        );
        drop((a, b));
        assert_eq!(
            inventory.ensure_instances(Some(owner), 0, true).await.unwrap(),
            0
        );
        assert_eq!(inventory.reference_count(), 0);
    }
}
