//! Single-flight template resolution.
//!
//! Every pool and inventory resolves templates through one shared
//! [`TemplateCache`]. The first request for a key starts the loader call;
//! requests arriving while it is in flight join the same future. A resolved
//! template is cached until [`TemplateCache::invalidate`] is called. A failed
//! resolution leaves the key unresolved so the next request retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::events::{EventBus, PoolEvent};
use crate::key::ResourceKey;
use crate::loader::AssetLoader;

/// Resolution state of one resource key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateState {
    /// Nothing requested yet, or the last attempt failed.
    Unresolved,
    /// One loader call is in flight.
    Resolving,
    /// The template is cached.
    Resolved,
}

type Resolution<T> = Shared<BoxFuture<'static, std::result::Result<Arc<T>, String>>>;

enum Slot<T> {
    Resolving { generation: u64, future: Resolution<T> },
    Resolved(Arc<T>),
}

/// Shared, single-flight cache of resolved templates.
pub struct TemplateCache<L: AssetLoader> {
    loader: Arc<L>,
    events: Arc<EventBus>,
    slots: Mutex<HashMap<ResourceKey, Slot<L::Template>>>,
    generation: AtomicU64,
    loader_calls: AtomicU64,
}

impl<L: AssetLoader> TemplateCache<L> {
    /// Create an empty cache in front of `loader`.
    pub fn new(loader: Arc<L>, events: Arc<EventBus>) -> Self {
        Self {
            loader,
            events,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            loader_calls: AtomicU64::new(0),
        }
    }

    /// The loader behind this cache.
    #[must_use]
    pub fn loader(&self) -> &Arc<L> {
        &self.loader
    }

    /// Resolve `key`, joining an in-flight resolution if there is one.
    pub async fn resolve(&self, key: &ResourceKey) -> Result<Arc<L::Template>> {
        let (generation, future) = {
            let mut slots = self.slots.lock();
            match slots.get(key) {
                Some(Slot::Resolved(template)) => return Ok(Arc::clone(template)),
                Some(Slot::Resolving { generation, future }) => (*generation, future.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let future = self.start(key);
                    slots.insert(
                        key.clone(),
                        Slot::Resolving {
                            generation,
                            future: future.clone(),
                        },
                    );
                    (generation, future)
                }
            }
        };

        let outcome = future.await;

        let mut slots = self.slots.lock();
        let current = matches!(
            slots.get(key),
            Some(Slot::Resolving { generation: g, .. }) if *g == generation
        );
        match outcome {
            Ok(template) => {
                if current {
                    slots.insert(key.clone(), Slot::Resolved(Arc::clone(&template)));
                    drop(slots);
                    tracing::debug!(resource_key = %key, "Template resolved");
                    self.events
                        .emit(PoolEvent::TemplateResolved { key: key.clone() });
                }
                Ok(template)
            }
            Err(reason) => {
                if current {
                    slots.remove(key);
                    drop(slots);
                    tracing::error!(resource_key = %key, error = %reason, "Template resolution failed");
                    self.events.emit(PoolEvent::ResolutionFailed {
                        key: key.clone(),
                        error: reason.clone(),
                    });
                }
                Err(Error::Resolution {
                    key: key.clone(),
                    reason,
                })
            }
        }
    }

    /// The cached template, without starting a resolution.
    #[must_use]
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<L::Template>> {
        match self.slots.lock().get(key) {
            Some(Slot::Resolved(template)) => Some(Arc::clone(template)),
            _ => None,
        }
    }

    /// Resolution state of `key`.
    #[must_use]
    pub fn state(&self, key: &ResourceKey) -> TemplateState {
        match self.slots.lock().get(key) {
            None => TemplateState::Unresolved,
            Some(Slot::Resolving { .. }) => TemplateState::Resolving,
            Some(Slot::Resolved(_)) => TemplateState::Resolved,
        }
    }

    /// Forget `key` so the next request resolves it again.
    ///
    /// A cached template is handed back to the loader. An in-flight
    /// resolution still completes for its current waiters but is not cached.
    pub fn invalidate(&self, key: &ResourceKey) -> bool {
        let removed = self.slots.lock().remove(key);
        match removed {
            Some(Slot::Resolved(template)) => {
                tracing::debug!(resource_key = %key, "Template invalidated");
                self.loader.release_template(key, template);
                true
            }
            Some(Slot::Resolving { .. }) => true,
            None => false,
        }
    }

    /// Release every cached template back to the loader.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.slots.lock().drain().collect();
        let mut released = 0;
        for (key, slot) in drained {
            if let Slot::Resolved(template) = slot {
                self.loader.release_template(&key, template);
                released += 1;
            }
        }
        released
    }

    /// Number of keys currently resolved.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Resolved(_)))
            .count()
    }

    /// Total loader `resolve` calls issued by this cache.
    #[must_use]
    pub fn loader_calls(&self) -> u64 {
        self.loader_calls.load(Ordering::Relaxed)
    }

    fn start(&self, key: &ResourceKey) -> Resolution<L::Template> {
        self.loader_calls.fetch_add(1, Ordering::Relaxed);
        let loader = Arc::clone(&self.loader);
        let key = key.clone();
        async move {
            loader
                .resolve(&key)
                .await
                .map(Arc::new)
                .map_err(|e| e.to_string())
        }
        .boxed()
        .shared()
    }
}

impl<L: AssetLoader> std::fmt::Debug for TemplateCache<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCache")
            .field("keys", &self.slots.lock().len())
            .field("loader_calls", &self.loader_calls())
            .finish()
    }
}
