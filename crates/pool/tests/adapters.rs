//! Capability adaptation through the registry.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{AudioView, EffectView, Projectile, TestLoader, key};
use stockpile_pool::{GroupId, Registry, RegistryConfig, ShimState};

fn registry_with_effect_adapter() -> (Registry<TestLoader>, Arc<AtomicUsize>) {
    let registry = Registry::new(TestLoader::new(), RegistryConfig::default()).unwrap();
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    registry
        .adapters()
        .register(move |projectile: &mut Projectile, _: &ShimState| {
            counter.fetch_add(1, Ordering::SeqCst);
            EffectView {
                intensity: projectile.template * 10,
                ..EffectView::default()
            }
        });
    (registry, built)
}

#[tokio::test]
async fn same_view_twice_builds_one_component() {
    let (registry, built) = registry_with_effect_adapter();
    let mut claimed = registry
        .get_as::<EffectView>(&GroupId::default(), &key("fx.spark"))
        .await
        .unwrap();

    assert_eq!(built.load(Ordering::SeqCst), 1);
    let view = claimed.view::<EffectView>().unwrap();
    assert_eq!(view.intensity, 10);
    assert!(view.adopted_claimed);
    claimed.view::<EffectView>().unwrap().intensity = 99;

    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(claimed.view::<EffectView>().unwrap().intensity, 99);
}

#[tokio::test]
async fn adapted_view_survives_reuse_and_sees_lifecycle() {
    let (registry, built) = registry_with_effect_adapter();
    let group = GroupId::default();
    let spark = key("fx.spark");

    let claimed = registry.get_as::<EffectView>(&group, &spark).await.unwrap();
    let id = claimed.id();
    drop(claimed);

    let mut again = registry.get_as::<EffectView>(&group, &spark).await.unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(built.load(Ordering::SeqCst), 1);

    let view = again.view::<EffectView>().unwrap();
    assert_eq!(view.releases, 1);
    assert_eq!(view.claims, 1);
    assert_eq!(again.entry().adapted_views(), 1);
}

#[tokio::test]
async fn native_view_needs_no_adapter() {
    let (registry, built) = registry_with_effect_adapter();
    let mut claimed = registry
        .get_as::<Projectile>(&GroupId::default(), &key("fx.spark"))
        .await
        .unwrap();
    assert!(claimed.view::<Projectile>().is_some());
    assert_eq!(built.load(Ordering::SeqCst), 0);
    assert_eq!(claimed.entry().adapted_views(), 0);
}

#[tokio::test]
async fn key_specific_adapter_overrides_generic() {
    let (registry, _) = registry_with_effect_adapter();
    registry
        .adapters()
        .register_for(key("fx.smoke"), |_: &mut Projectile, _: &ShimState| EffectView {
            intensity: 1,
            ..EffectView::default()
        });
    let group = GroupId::default();

    let mut smoke = registry.get_as::<EffectView>(&group, &key("fx.smoke")).await.unwrap();
    let mut spark = registry.get_as::<EffectView>(&group, &key("fx.spark")).await.unwrap();
    assert_eq!(smoke.view::<EffectView>().unwrap().intensity, 1);
    assert_ne!(spark.view::<EffectView>().unwrap().intensity, 1);
}

#[tokio::test]
async fn unsupported_view_is_none_without_creating() {
    let loader = TestLoader::new();
    let registry = Registry::new(Arc::clone(&loader), RegistryConfig::default()).unwrap();

    let claimed = registry
        .get_as::<AudioView>(&GroupId::default(), &key("fx.spark"))
        .await;

    assert!(claimed.is_none());
    assert_eq!(loader.instantiations(), 0);
}
