//! Registry behaviour: template sharing, per-group pools, release routing,
//! bulk drain and diagnostics.

mod common;

use std::sync::Arc;

use common::{TestLoader, key};
use pretty_assertions::assert_eq;
use stockpile_pool::{
    AsyncPool, Error, GroupId, GroupStats, InventoryConfig, PoolConfig, PoolEvent, Registry,
    RegistryConfig, TemplateState,
};

fn new_registry(loader: &Arc<TestLoader>) -> Registry<TestLoader> {
    Registry::new(Arc::clone(loader), RegistryConfig::default()).unwrap()
}

// ---------------------------------------------------------------------------
// Template sharing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_resolution_is_shared_by_all_requesters() {
    stockpile_log::init_test();
    let loader = TestLoader::new();
    let registry = new_registry(&loader);
    let spark = key("fx.spark");
    let inventory = registry
        .context_inventory(spark.clone(), InventoryConfig::default())
        .unwrap();
    let (default, menu) = (GroupId::default(), GroupId::new("menu"));

    let (a, b, template) = tokio::join!(
        registry.get(&default, &spark),
        registry.get(&menu, &spark),
        inventory.resolve(),
    );

    assert_eq!(loader.resolves(), 1);
    let template = template.unwrap();
    let cached = registry.templates().get(&spark).unwrap();
    assert!(Arc::ptr_eq(&template, &cached));
    assert_eq!(a.unwrap().template, template.serial);
    assert_eq!(b.unwrap().template, template.serial);
    assert_eq!(inventory.state(), TemplateState::Resolved);
}

#[tokio::test]
async fn distinct_keys_resolve_separately() {
    let loader = TestLoader::new();
    let registry = new_registry(&loader);
    let group = GroupId::default();

    let spark_key = key("fx.spark");
    let smoke_key = key("fx.smoke");
    let (spark, smoke) = tokio::join!(
        registry.get(&group, &spark_key),
        registry.get(&group, &smoke_key),
    );

    assert_eq!(loader.resolves(), 2);
    assert_ne!(spark.unwrap().template, smoke.unwrap().template);
}

// ---------------------------------------------------------------------------
// Release routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_routes_to_recorded_pool() {
    let loader = TestLoader::new();
    let registry = new_registry(&loader);
    let menu = GroupId::new("menu");

    let claimed = registry.get(&menu, &key("fx.spark")).await.unwrap();
    registry.release(claimed).unwrap();

    let pool = registry.pool(&menu, &key("fx.spark")).unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.claimed(), 0);
}

#[tokio::test]
async fn release_without_matching_pool_is_foreign() {
    let loader = TestLoader::new();
    let registry = new_registry(&loader);
    let other = new_registry(&loader);
    let mut events = registry.subscribe();

    let claimed = other.get(&GroupId::default(), &key("fx.spark")).await.unwrap();
    let err = registry.release(claimed).unwrap_err();

    assert!(matches!(err, Error::ForeignInstance { .. }));
    assert_eq!(registry.pool_count(), 0);
    let origin = other.pool(&GroupId::default(), &key("fx.spark")).unwrap();
    assert_eq!(origin.len(), 1);
    assert!(matches!(
        events.try_recv().unwrap(),
        PoolEvent::IntegrityViolation { .. }
    ));
}

#[tokio::test]
async fn release_into_other_registry_with_same_pool_is_foreign() {
    let loader = TestLoader::new();
    let origin = new_registry(&loader);
    let other = new_registry(&loader);
    let (group, spark) = (GroupId::default(), key("fx.spark"));
    other.get_pool(&group, &spark);

    let claimed = origin.get(&group, &spark).await.unwrap();
    let err = other.release(claimed).unwrap_err();
    assert!(matches!(err, Error::ForeignInstance { .. }));

    let untouched = other.pool(&group, &spark).unwrap();
    assert_eq!(untouched.len(), 0);
    assert_eq!(untouched.claimed(), 0);
    assert_eq!(untouched.stats().total_releases, 0);
    let home = origin.pool(&group, &spark).unwrap();
    assert_eq!(home.len(), 1);
    assert_eq!(home.claimed(), 0);
}

// ---------------------------------------------------------------------------
// Group drain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn releasing_a_group_leaves_other_groups_alone() {
    let loader = TestLoader::new();
    let registry = new_registry(&loader);
    let (level, menu) = (GroupId::new("level"), GroupId::new("menu"));

    registry.get_pool(&level, &key("fx.spark")).add_size(3).await;
    registry.get_pool(&level, &key("fx.smoke")).add_size(2).await;
    registry.get_pool(&menu, &key("fx.spark")).add_size(4).await;
    let held = registry.get(&level, &key("fx.smoke")).await.unwrap();

    assert_eq!(registry.release_all_pooled_in_all_pools(&level), 4);
    assert_eq!(
        registry.group_stats(&level),
        GroupStats {
            pools: 2,
            pooled: 0,
            claimed: 1,
        }
    );
    assert_eq!(registry.group_stats(&menu).pooled, 4);

    drop(held);
    assert_eq!(registry.group_stats(&level).pooled, 1);
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_are_sorted_by_group_then_key() {
    let loader = TestLoader::new();
    let registry = new_registry(&loader);
    let (b, a) = (GroupId::new("b"), GroupId::new("a"));
    registry.get_pool(&b, &key("fx.spark")).add_size(1).await;
    registry.get_pool(&a, &key("fx.smoke")).add_size(2).await;
    registry.get_pool(&a, &key("fx.bolt"));

    let order: Vec<(String, String, usize)> = registry
        .stats()
        .into_iter()
        .map(|s| (s.group.to_string(), s.key.to_string(), s.stats.pooled))
        .collect();
    assert_eq!(
        order,
        vec![
            ("a".to_string(), "fx.bolt".to_string(), 0),
            ("a".to_string(), "fx.smoke".to_string(), 2),
            ("b".to_string(), "fx.spark".to_string(), 1),
        ]
    );
}

#[tokio::test]
async fn pool_creation_is_announced_once() {
    let loader = TestLoader::new();
    let registry = new_registry(&loader);
    let mut events = registry.subscribe();

    registry.get_pool(&GroupId::default(), &key("fx.spark"));
    registry.get_pool(&GroupId::default(), &key("fx.spark"));

    let created = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, PoolEvent::PoolCreated { .. }))
        .count();
    assert_eq!(created, 1);
}

#[tokio::test]
async fn pools_use_registry_pool_config() {
    let loader = TestLoader::new();
    let registry = Registry::new(
        Arc::clone(&loader),
        RegistryConfig {
            pool: PoolConfig {
                max_pooled: Some(2),
                ..PoolConfig::default()
            },
            ..RegistryConfig::default()
        },
    )
    .unwrap();

    let pool: AsyncPool<TestLoader> = registry.get_pool(&GroupId::default(), &key("fx.spark"));
    assert_eq!(pool.add_size(4).await, 2);
    assert_eq!(loader.released(), 2);
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_is_deterministic() {
    let loader = TestLoader::new();
    let registry = new_registry(&loader);
    let group = GroupId::default();
    registry.get_pool(&group, &key("fx.spark")).add_size(2).await;
    let held = registry.get(&group, &key("fx.smoke")).await.unwrap();

    assert_eq!(registry.shutdown(), 2);
    assert_eq!(registry.pool_count(), 0);
    assert_eq!(registry.templates().resolved_count(), 0);

    drop(held);
    assert_eq!(loader.released(), 3);
}
