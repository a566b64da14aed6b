//! Capability views and the adapter table.
//!
//! A pool produces one concrete instance type, but consumers may want to
//! handle it through different views (an effect controller, a UI binding, an
//! audio emitter). Views are plain types implementing [`Capability`]. An
//! [`AdapterTable`] maps `(resource key, view type)` to a factory that builds
//! the view from an instance. The first request for a view on an entry runs
//! the factory; the component is then cached on the entry and receives every
//! later lifecycle call (see [`PoolEntry`](crate::entry::PoolEntry)).

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entry::ShimState;
use crate::key::ResourceKey;

/// Upcast to `Any` for downcasting trait objects back to concrete views.
pub trait AsAny: Any {
    /// Borrow as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Borrow as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Lifecycle interface shared by pooled instances and their adapted views.
///
/// All methods default to no-ops.
pub trait Capability: AsAny + Send + Sync {
    /// Called once, right after the instance was produced by the loader.
    fn on_instantiated(&mut self) {}

    /// Called when the entry is handed out.
    fn on_claim(&mut self) {}

    /// Called when the entry goes back to its pool, and once after creation
    /// so new entries are normalized the same way as reused ones.
    fn on_release(&mut self) {}

    /// Called once when an adapted view is attached, with the entry's
    /// current shared state (claimed flag, key, group, context).
    fn adopt(&mut self, _shim: &ShimState) {}
}

type Factory<I> = Arc<dyn Fn(&mut I, &ShimState) -> Box<dyn Capability> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AdapterKey {
    key: Option<ResourceKey>,
    view: TypeId,
}

/// Registered factories turning instances of `I` into capability views.
///
/// Lookups try the key-specific registration first and fall back to the one
/// registered for every key.
pub struct AdapterTable<I> {
    factories: RwLock<HashMap<AdapterKey, Factory<I>>>,
}

impl<I: Capability> AdapterTable<I> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory for view `V` that applies to every resource key.
    ///
    /// The factory may pull an existing component out of the instance or
    /// build a new one. Registering again replaces the previous factory.
    pub fn register<V, F>(&self, factory: F)
    where
        V: Capability,
        F: Fn(&mut I, &ShimState) -> V + Send + Sync + 'static,
    {
        self.insert::<V, F>(None, factory);
    }

    /// Register a factory for view `V` that applies only to `key`.
    pub fn register_for<V, F>(&self, key: ResourceKey, factory: F)
    where
        V: Capability,
        F: Fn(&mut I, &ShimState) -> V + Send + Sync + 'static,
    {
        self.insert::<V, F>(Some(key), factory);
    }

    /// Whether view `V` can be produced for `key`, natively or through a factory.
    #[must_use]
    pub fn supports<V: Capability>(&self, key: &ResourceKey) -> bool {
        TypeId::of::<V>() == TypeId::of::<I>() || self.lookup::<V>(key).is_some()
    }

    /// Number of registered factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    /// Whether no factory is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }

    pub(crate) fn build<V: Capability>(
        &self,
        key: &ResourceKey,
        instance: &mut I,
        shim: &ShimState,
    ) -> Option<Box<dyn Capability>> {
        let factory = self.lookup::<V>(key)?;
        Some(factory(instance, shim))
    }

    fn lookup<V: Capability>(&self, key: &ResourceKey) -> Option<Factory<I>> {
        let view = TypeId::of::<V>();
        let factories = self.factories.read();
        factories
            .get(&AdapterKey {
                key: Some(key.clone()),
                view,
            })
            .or_else(|| factories.get(&AdapterKey { key: None, view }))
            .cloned()
    }

    fn insert<V, F>(&self, key: Option<ResourceKey>, factory: F)
    where
        V: Capability,
        F: Fn(&mut I, &ShimState) -> V + Send + Sync + 'static,
    {
        let erased: Factory<I> = Arc::new(move |instance: &mut I, shim: &ShimState| {
            Box::new(factory(instance, shim)) as Box<dyn Capability>
        });
        tracing::debug!(
            view = type_name::<V>(),
            resource_key = ?key,
            "Registered capability adapter"
        );
        self.factories.write().insert(
            AdapterKey {
                key,
                view: TypeId::of::<V>(),
            },
            erased,
        );
    }
}

impl<I: Capability> Default for AdapterTable<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> std::fmt::Debug for AdapterTable<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterTable")
            .field("factory_count", &self.factories.read().len())
            .finish()
    }
}
