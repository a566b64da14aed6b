//! Shared test loader for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use stockpile_pool::{
    AssetLoader, Capability, Error, Placement, PlacementRoot, ResourceKey, Result, ShimState,
};

// ---------------------------------------------------------------------------
// Template and instance
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ProjectileTemplate {
    pub key: ResourceKey,
    pub serial: usize,
}

#[derive(Debug, Default)]
pub struct Projectile {
    pub template: usize,
    pub claims: u32,
    pub releases: u32,
    pub instantiated: bool,
    pub root: Option<PlacementRoot>,
    pub position: Option<[f32; 3]>,
}

impl Capability for Projectile {
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

/// Effect controller view, adapted from a projectile.
#[derive(Debug, Default)]
pub struct EffectView {
    pub intensity: usize,
    pub adopted_claimed: bool,
    pub claims: u32,
    pub releases: u32,
}

impl Capability for EffectView {
    fn on_claim(&mut self) {
        self.claims += 1;
    }

    fn on_release(&mut self) {
        self.releases += 1;
    }

    fn adopt(&mut self, shim: &ShimState) {
        self.adopted_claimed = shim.is_claimed();
    }
}

/// View nobody registers an adapter for.
pub struct AudioView;

impl Capability for AudioView {}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TestLoader {
    resolves: AtomicUsize,
    instantiations: AtomicUsize,
    released: AtomicUsize,
    failing_keys: Mutex<HashMap<String, usize>>,
}

impl TestLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `times` instantiations of `key` fail.
    pub fn fail_instantiation(&self, key: &str, times: usize) {
        self.failing_keys.lock().insert(key.to_string(), times);
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetLoader for TestLoader {
    type Template = ProjectileTemplate;
    type Instance = Projectile;

    async fn resolve(&self, key: &ResourceKey) -> Result<ProjectileTemplate> {
        let serial = self.resolves.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        Ok(ProjectileTemplate {
            key: key.clone(),
            serial,
        })
    }

    async fn instantiate(
        &self,
        key: &ResourceKey,
        template: &ProjectileTemplate,
        placement: &Placement,
    ) -> Result<Projectile> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        {
            let mut failing = self.failing_keys.lock();
            if let Some(remaining) = failing.get_mut(key.as_str()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::loader(key, "instantiation failed"));
                }
            }
        }
        Ok(Projectile {
            template: template.serial,
            root: placement.root,
            position: placement.position,
            ..Projectile::default()
        })
    }

    fn place(&self, instance: &mut Projectile, placement: &Placement) {
        if placement.root.is_some() {
            instance.root = placement.root;
        }
        if placement.position.is_some() {
            instance.position = placement.position;
        }
    }

    fn release_instance(&self, instance: Projectile) {
        self.released.fetch_add(1, Ordering::SeqCst);
        drop(instance);
    }
}

pub fn key(raw: &str) -> ResourceKey {
    ResourceKey::new(raw).unwrap()
}
