//! Hook-driven LIFO pool for synchronously created items.

use crate::error::{Error, Result};
use crate::key::ResourceKey;
use crate::pool::PoolStats;
use crate::pool::config::PoolConfig;
use crate::pool::lifo::LifoStack;
use crate::refcount::RefCount;

type CreateFn<T> = Box<dyn FnMut() -> T + Send>;
type HookFn<T> = Box<dyn FnMut(&mut T) + Send>;
type DestroyFn<T> = Box<dyn FnMut(T) + Send>;

/// An item [`SyncPool::release`] refused, handed back to the caller.
#[derive(Debug)]
pub struct Rejected<T> {
    /// Why the pool refused the item.
    pub error: Error,
    /// The refused item, untouched by any hook.
    pub item: T,
}

impl<T> From<Rejected<T>> for Error {
    fn from(rejected: Rejected<T>) -> Self {
        rejected.error
    }
}

/// LIFO pool of one item kind.
///
/// New items go through the same path as reused ones: `create`, then the
/// release hook, then the get hook. Items are compared with `PartialEq` for
/// double-release detection.
pub struct SyncPool<T> {
    key: ResourceKey,
    stack: LifoStack<T>,
    create: CreateFn<T>,
    on_get: Option<HookFn<T>>,
    on_release: Option<HookFn<T>>,
    destroy: Option<DestroyFn<T>>,
    config: PoolConfig,
    claimed: RefCount,
    stats: PoolStats,
}

impl<T: PartialEq + Send> SyncPool<T> {
    /// Create an empty pool for `key` that builds items with `create`.
    pub fn new<F>(key: ResourceKey, create: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        Self {
            key,
            stack: LifoStack::new(),
            create: Box::new(create),
            on_get: None,
            on_release: None,
            destroy: None,
            config: PoolConfig::default(),
            claimed: RefCount::new(),
            stats: PoolStats::default(),
        }
    }

    /// Replace the pool configuration.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `config` is invalid.
    pub fn with_config(mut self, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Hook run on every item handed out.
    #[must_use]
    pub fn on_get<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut T) + Send + 'static,
    {
        self.on_get = Some(Box::new(hook));
        self
    }

    /// Hook run on every item going back into the pool.
    #[must_use]
    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut T) + Send + 'static,
    {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// Hook run on items leaving the pool for good.
    #[must_use]
    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        self.destroy = Some(Box::new(hook));
        self
    }

    /// The resource kind this pool holds.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Number of pooled items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Whether the pool holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pooled: self.stack.len(),
            claimed: self.claimed.get(),
            ..self.stats.clone()
        }
    }

    /// Take the most recently released item, creating one if the pool is empty.
    pub fn get(&mut self) -> T {
        let mut item = match self.stack.pop() {
            Some(item) => item,
            None => {
                let item = self.create_released();
                tracing::trace!(resource_key = %self.key, "Pool empty, created item");
                item
            }
        };
        if let Some(hook) = self.on_get.as_mut() {
            hook(&mut item);
        }
        self.stats.total_acquisitions += 1;
        self.claimed.increment();
        item
    }

    /// Return an item to the pool.
    ///
    /// # Errors
    /// The pool is left unchanged and the item comes back in [`Rejected`]
    /// when:
    /// - double-release checking is on and an equal item is already pooled
    ///   ([`Error::DoubleRelease`]);
    /// - more items are released than were handed out
    ///   ([`Error::ReferenceUnderflow`]).
    pub fn release(&mut self, mut item: T) -> std::result::Result<(), Rejected<T>> {
        if self.config.check_double_release && self.stack.contains(&item) {
            let error = Error::DoubleRelease {
                key: self.key.clone(),
                entry: format!("#{}", self.stack.len()),
            };
            tracing::warn!(resource_key = %self.key, error = %error, "Rejected release");
            return Err(Rejected { error, item });
        }
        if let Err(error) = self.claimed.decrement(&self.key) {
            return Err(Rejected { error, item });
        }

        if let Some(hook) = self.on_release.as_mut() {
            hook(&mut item);
        }
        self.stats.total_releases += 1;

        if self.config.has_room(self.stack.len()) {
            self.stack.push(item);
        } else {
            tracing::debug!(resource_key = %self.key, "Pool at capacity, destroying item");
            self.destroy_item(item);
        }
        Ok(())
    }

    /// Grow or shrink the pool to `size` pooled items.
    ///
    /// Growth stops at `max_pooled`. Returns the resulting number of pooled
    /// items.
    pub fn resize(&mut self, size: usize) -> usize {
        let current = self.stack.len();
        if size > current {
            let target = self.config.max_pooled.map_or(size, |max| size.min(max));
            if target < size {
                tracing::debug!(
                    resource_key = %self.key,
                    requested = size,
                    max_pooled = target,
                    "Resize capped at max_pooled"
                );
            }
            for _ in current..target {
                let item = self.create_released();
                self.stack.push(item);
            }
        } else if size < current {
            for item in self.stack.pop_many(current - size) {
                self.destroy_item(item);
            }
        }
        let len = self.stack.len();
        tracing::debug!(resource_key = %self.key, from = current, to = len, "Resized pool");
        len
    }

    /// Destroy every pooled item, returning how many were destroyed.
    pub fn clear(&mut self) -> usize {
        let items = self.stack.drain();
        let count = items.len();
        for item in items {
            self.destroy_item(item);
        }
        count
    }

    fn create_released(&mut self) -> T {
        let mut item = (self.create)();
        if let Some(hook) = self.on_release.as_mut() {
            hook(&mut item);
        }
        self.stats.created += 1;
        item
    }

    fn destroy_item(&mut self, item: T) {
        self.stats.destroyed += 1;
        match self.destroy.as_mut() {
            Some(hook) => hook(item),
            None => drop(item),
        }
    }
}

impl<T> Drop for SyncPool<T> {
    fn drop(&mut self) {
        if let Some(hook) = self.destroy.as_mut() {
            for item in self.stack.drain() {
                hook(item);
            }
        }
    }
}

impl<T> std::fmt::Debug for SyncPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPool")
            .field("key", &self.key)
            .field("pooled", &self.stack.len())
            .field("stats", &self.stats)
            .finish()
    }
}
