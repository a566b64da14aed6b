//! Pool entries, their redirection shim, and the claimed-out handle.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::capability::{AdapterTable, Capability};
use crate::key::{ContextId, EntryId, GroupId, ResourceKey};

/// State shared between an entry and every view adapted from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimState {
    key: ResourceKey,
    group: GroupId,
    context: Option<ContextId>,
    claimed: bool,
}

impl ShimState {
    /// Create unclaimed state for an entry of `key` in `group`.
    pub fn new(key: ResourceKey, group: GroupId, context: Option<ContextId>) -> Self {
        Self {
            key,
            group,
            context,
            claimed: false,
        }
    }

    /// The resource kind.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// The lifetime group.
    #[must_use]
    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// The owning context, if any.
    #[must_use]
    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    /// Whether the entry is currently handed out.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.claimed
    }
}

/// One reusable instance plus its bookkeeping.
///
/// Lifecycle calls made on the entry are forwarded to the instance and to
/// every view adapted from it. Views are built at most once per entry.
pub struct PoolEntry<I> {
    id: EntryId,
    instance: I,
    shim: ShimState,
    redirects: HashMap<TypeId, Box<dyn Capability>>,
    created_at: Instant,
    claimed_at: Option<Instant>,
}

impl<I: Capability> PoolEntry<I> {
    pub(crate) fn new(
        instance: I,
        key: ResourceKey,
        group: GroupId,
        context: Option<ContextId>,
    ) -> Self {
        Self {
            id: EntryId::next(),
            instance,
            shim: ShimState::new(key, group, context),
            redirects: HashMap::new(),
            created_at: Instant::now(),
            claimed_at: None,
        }
    }

    /// Entry identity.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Shared state (claimed flag, key, group, context).
    #[must_use]
    pub fn shim(&self) -> &ShimState {
        &self.shim
    }

    /// The resource kind.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.shim.key
    }

    /// The lifetime group.
    #[must_use]
    pub fn group(&self) -> &GroupId {
        &self.shim.group
    }

    /// The owning context, if any.
    #[must_use]
    pub fn context(&self) -> Option<ContextId> {
        self.shim.context
    }

    /// Whether the entry is currently handed out.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.shim.claimed
    }

    /// When the entry was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Number of views adapted onto this entry.
    #[must_use]
    pub fn adapted_views(&self) -> usize {
        self.redirects.len()
    }

    /// Borrow the raw instance.
    #[must_use]
    pub fn instance(&self) -> &I {
        &self.instance
    }

    /// Mutably borrow the raw instance.
    pub fn instance_mut(&mut self) -> &mut I {
        &mut self.instance
    }

    /// Whether view `V` is already available without running a factory.
    #[must_use]
    pub fn has_view<V: Capability>(&self) -> bool {
        let tag = TypeId::of::<V>();
        tag == TypeId::of::<I>() || self.redirects.contains_key(&tag)
    }

    /// Get view `V`, adapting the instance on first request.
    ///
    /// Returns `None` when `V` is neither the instance type nor registered
    /// in `adapters`.
    pub fn view<V: Capability>(&mut self, adapters: &AdapterTable<I>) -> Option<&mut V> {
        let tag = TypeId::of::<V>();
        if tag == TypeId::of::<I>() {
            return self.instance.as_any_mut().downcast_mut::<V>();
        }

        if !self.redirects.contains_key(&tag) {
            let Some(mut component) =
                adapters.build::<V>(&self.shim.key, &mut self.instance, &self.shim)
            else {
                tracing::warn!(
                    resource_key = %self.shim.key,
                    entry = %self.id,
                    view = type_name::<V>(),
                    "No capability adapter registered"
                );
                return None;
            };
            component.adopt(&self.shim);
            tracing::trace!(
                resource_key = %self.shim.key,
                entry = %self.id,
                view = type_name::<V>(),
                "Adapted entry to capability view"
            );
            self.redirects.insert(tag, component);
        }

        self.redirects
            .get_mut(&tag)
            .and_then(|component| (**component).as_any_mut().downcast_mut::<V>())
    }

    pub(crate) fn on_instantiated(&mut self) {
        self.instance.on_instantiated();
        for component in self.redirects.values_mut() {
            component.on_instantiated();
        }
    }

    pub(crate) fn claim(&mut self) {
        self.shim.claimed = true;
        self.claimed_at = Some(Instant::now());
        self.instance.on_claim();
        for component in self.redirects.values_mut() {
            component.on_claim();
        }
    }

    /// Normalize for pooling and return how long the entry was held.
    pub(crate) fn release(&mut self) -> Duration {
        self.shim.claimed = false;
        self.instance.on_release();
        for component in self.redirects.values_mut() {
            component.on_release();
        }
        self.claimed_at
            .take()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    pub(crate) fn into_instance(self) -> I {
        self.instance
    }
}

impl<I> PartialEq for PoolEntry<I> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<I> std::fmt::Debug for PoolEntry<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("id", &self.id)
            .field("shim", &self.shim)
            .field("adapted_views", &self.redirects.len())
            .finish()
    }
}

type ReturnFn<I> = Box<dyn FnOnce(PoolEntry<I>) + Send>;

/// Identity of the pool a handle was issued by.
pub(crate) type Origin = Weak<dyn Any + Send + Sync>;

/// A claimed entry, exclusively owned by the caller.
///
/// Dropping the handle returns the entry to the pool or inventory it came
/// from. Releasing it explicitly through its pool, the registry or the
/// inventory does the same but reports misuse as an error.
pub struct Claimed<I: Capability> {
    entry: Option<PoolEntry<I>>,
    adapters: Arc<AdapterTable<I>>,
    on_drop: Option<ReturnFn<I>>,
    origin: Option<Origin>,
}

impl<I: Capability> Claimed<I> {
    pub(crate) fn new<F>(entry: PoolEntry<I>, adapters: Arc<AdapterTable<I>>, on_drop: F) -> Self
    where
        F: FnOnce(PoolEntry<I>) + Send + 'static,
    {
        Self {
            entry: Some(entry),
            adapters,
            on_drop: Some(Box::new(on_drop)),
            origin: None,
        }
    }

    /// Stamp the handle with the pool that issued it.
    pub(crate) fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Whether the handle was issued by `origin`.
    pub(crate) fn is_from(&self, origin: &Origin) -> bool {
        self.origin
            .as_ref()
            .is_some_and(|issuer| Weak::ptr_eq(issuer, origin))
    }

    /// The underlying entry.
    #[must_use]
    pub fn entry(&self) -> &PoolEntry<I> {
        self.entry.as_ref().expect("claimed handle used after release")
    }

    fn entry_mut(&mut self) -> &mut PoolEntry<I> {
        self.entry.as_mut().expect("claimed handle used after release")
    }

    /// Entry identity.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.entry().id()
    }

    /// The resource kind.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        self.entry().key()
    }

    /// The lifetime group.
    #[must_use]
    pub fn group(&self) -> &GroupId {
        self.entry().group()
    }

    /// The owning context, if any.
    #[must_use]
    pub fn context(&self) -> Option<ContextId> {
        self.entry().context()
    }

    /// Get view `V`, adapting the instance on first request.
    pub fn view<V: Capability>(&mut self) -> Option<&mut V> {
        let entry = self.entry.as_mut().expect("claimed handle used after release");
        entry.view::<V>(&self.adapters)
    }

    /// Take the entry out without running the return callback.
    pub(crate) fn into_entry(mut self) -> PoolEntry<I> {
        self.on_drop.take();
        self.entry.take().expect("claimed handle used after release")
    }
}

impl<I: Capability> std::ops::Deref for Claimed<I> {
    type Target = I;

    fn deref(&self) -> &I {
        self.entry().instance()
    }
}

impl<I: Capability> std::ops::DerefMut for Claimed<I> {
    fn deref_mut(&mut self) -> &mut I {
        self.entry_mut().instance_mut()
    }
}

impl<I: Capability> Drop for Claimed<I> {
    fn drop(&mut self) {
        if let (Some(entry), Some(on_drop)) = (self.entry.take(), self.on_drop.take()) {
            on_drop(entry);
        }
    }
}

impl<I: Capability> std::fmt::Debug for Claimed<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Claimed")
            .field("entry", &self.entry)
            .finish()
    }
}
