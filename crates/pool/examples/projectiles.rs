//! Pooling projectiles and muzzle flashes for a couple of turrets.
//!
//! Run with `STOCKPILE_LOG=debug cargo run -p stockpile-pool --example projectiles`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use stockpile_pool::{
    AssetLoader, Capability, ContextId, GroupId, InventoryConfig, Placement, PlacementRoot,
    PoolConfig, Registry, RegistryConfig, ResourceKey, Result, ShimState,
};

#[derive(Debug)]
struct Prefab {
    name: String,
}

#[derive(Debug, Default)]
struct Projectile {
    prefab: String,
    position: [f32; 3],
    flights: u32,
}

impl Capability for Projectile {
    fn on_claim(&mut self) {
        self.flights += 1;
    }
}

/// Trail renderer bolted onto projectiles that have none of their own.
#[derive(Debug)]
struct Trail {
    length: f32,
    active: bool,
}

impl Capability for Trail {
    fn on_claim(&mut self) {
        self.active = true;
    }

    fn on_release(&mut self) {
        self.active = false;
    }

    fn adopt(&mut self, shim: &ShimState) {
        self.active = shim.is_claimed();
    }
}

#[derive(Default)]
struct PrefabLoader {
    spawned: AtomicUsize,
}

#[async_trait]
impl AssetLoader for PrefabLoader {
    type Template = Prefab;
    type Instance = Projectile;

    async fn resolve(&self, key: &ResourceKey) -> Result<Prefab> {
        tracing::info!(resource_key = %key, "Loading prefab");
        Ok(Prefab {
            name: key.as_str().to_string(),
        })
    }

    async fn instantiate(
        &self,
        _key: &ResourceKey,
        template: &Prefab,
        placement: &Placement,
    ) -> Result<Projectile> {
        self.spawned.fetch_add(1, Ordering::Relaxed);
        Ok(Projectile {
            prefab: template.name.clone(),
            position: placement.position.unwrap_or_default(),
            flights: 0,
        })
    }

    fn place(&self, instance: &mut Projectile, placement: &Placement) {
        if let Some(position) = placement.position {
            instance.position = position;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _guard = stockpile_log::init_with(stockpile_log::Config::development());

    let loader = Arc::new(PrefabLoader::default());
    let config = RegistryConfig {
        pool: PoolConfig {
            initial_size: 4,
            max_pooled: Some(16),
            ..PoolConfig::default()
        },
        ..RegistryConfig::default()
    }
    .with_fallback("projectile", "weapons.bolt");
    let registry = Registry::new(Arc::clone(&loader), config)?;
    registry
        .adapters()
        .register(|projectile: &mut Projectile, shim: &ShimState| Trail {
            length: projectile.prefab.len() as f32 * 0.5,
            active: shim.is_claimed(),
        });

    let level = GroupId::new("level-1");
    let bolt = registry.resolve_key("", Some("projectile"))?;
    registry.prewarm(&level, &bolt).await;

    // one volley: three bolts in flight, then all land
    let mut volley = Vec::new();
    for _ in 0..3 {
        if let Some(mut shot) = registry.get_as::<Trail>(&level, &bolt).await {
            if let Some(trail) = shot.view::<Trail>() {
                tracing::info!(length = trail.length, active = trail.active, "Trail attached");
            }
            volley.push(shot);
        }
    }
    for shot in volley {
        tracing::info!(entry = %shot.id(), flights = shot.flights, "Bolt landed");
        registry.release(shot)?;
    }

    // muzzle flashes follow the turret that fired them
    let flashes = registry.context_inventory(
        ResourceKey::new("fx.muzzle_flash")?,
        InventoryConfig {
            pool_root: Some(PlacementRoot(0)),
            group: level.clone(),
        },
    )?;
    flashes.resolve().await?;
    let (north, south) = (ContextId::new(), ContextId::new());
    flashes.ensure_instances(Some(north), 2, false).await?;
    flashes.ensure_instances(Some(south), 1, false).await?;

    if let Some(flash) = flashes
        .get_context_instance(Some(north), Placement::default().at([0.0, 2.0, 5.0]))
        .await
    {
        tracing::info!(position = ?flash.position, "Muzzle flash");
        flashes.release(flash)?;
    }
    let removed = flashes.remove_all_instances_with_context(south);
    tracing::info!(removed, remaining = flashes.len(), "Turret destroyed");

    for snapshot in registry.stats() {
        tracing::info!(
            group = %snapshot.group,
            resource_key = %snapshot.key,
            pooled = snapshot.stats.pooled,
            created = snapshot.stats.created,
            "Pool"
        );
    }
    let drained = registry.release_all_pooled_in_all_pools(&level);
    let destroyed = registry.shutdown();
    tracing::info!(
        drained,
        destroyed,
        spawned = loader.spawned.load(Ordering::Relaxed),
        "Level unloaded"
    );
    Ok(())
}
