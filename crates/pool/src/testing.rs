//! In-crate test loader.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::capability::Capability;
use crate::error::{Error, Result};
use crate::key::ResourceKey;
use crate::loader::{AssetLoader, Placement, PlacementRoot};

#[derive(Debug)]
pub(crate) struct EffectTemplate {
    pub(crate) serial: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Effect {
    pub(crate) template: usize,
    pub(crate) instantiated: bool,
    pub(crate) claims: u32,
    pub(crate) releases: u32,
    pub(crate) root: Option<PlacementRoot>,
    pub(crate) position: Option<[f32; 3]>,
}

impl Capability for Effect {
    fn on_instantiated(&mut self) {
        self.instantiated = true;
    }

    fn on_claim(&mut self) {
        self.claims += 1;
    }

    fn on_release(&mut self) {
        self.releases += 1;
    }
}

/// View with no registered adapter.
pub(crate) struct Beacon;

impl Capability for Beacon {}

/// Loader that counts calls and fails on demand.
#[derive(Default)]
pub(crate) struct MockLoader {
    resolves: AtomicUsize,
    instantiations: AtomicUsize,
    released_instances: AtomicUsize,
    released_templates: AtomicUsize,
    resolve_failures: Mutex<HashMap<String, usize>>,
    instantiate_failures: Mutex<HashMap<String, usize>>,
}

impl MockLoader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_resolve(&self, key: &str, times: usize) {
        self.resolve_failures.lock().insert(key.to_string(), times);
    }

    pub(crate) fn fail_instantiate(&self, key: &str, times: usize) {
        self.instantiate_failures
            .lock()
            .insert(key.to_string(), times);
    }

    pub(crate) fn resolve_calls(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub(crate) fn instantiate_calls(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }

    pub(crate) fn released_instances(&self) -> usize {
        self.released_instances.load(Ordering::SeqCst)
    }

    pub(crate) fn released_templates(&self) -> usize {
        self.released_templates.load(Ordering::SeqCst)
    }

    fn should_fail(failures: &Mutex<HashMap<String, usize>>, key: &ResourceKey) -> bool {
        let mut failures = failures.lock();
        match failures.get_mut(key.as_str()) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl AssetLoader for MockLoader {
    type Template = EffectTemplate;
    type Instance = Effect;

    async fn resolve(&self, key: &ResourceKey) -> Result<EffectTemplate> {
        let serial = self.resolves.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        if Self::should_fail(&self.resolve_failures, key) {
            return Err(Error::loader(key, "asset missing"));
        }
        Ok(EffectTemplate { serial })
    }

    async fn instantiate(
        &self,
        key: &ResourceKey,
        template: &EffectTemplate,
        placement: &Placement,
    ) -> Result<Effect> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if Self::should_fail(&self.instantiate_failures, key) {
            return Err(Error::loader(key, "instantiation failed"));
        }
        Ok(Effect {
            template: template.serial,
            root: placement.root,
            position: placement.position,
            ..Effect::default()
        })
    }

    fn place(&self, instance: &mut Effect, placement: &Placement) {
        if placement.root.is_some() {
            instance.root = placement.root;
        }
        if placement.position.is_some() {
            instance.position = placement.position;
        }
    }

    fn release_instance(&self, instance: Effect) {
        self.released_instances.fetch_add(1, Ordering::SeqCst);
        drop(instance);
    }

    fn release_template(&self, _key: &ResourceKey, template: Arc<EffectTemplate>) {
        self.released_templates.fetch_add(1, Ordering::SeqCst);
        drop(template);
    }
}
