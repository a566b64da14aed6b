//! Boundary to the external asset loader.
//!
//! The loader resolves a [`ResourceKey`] to a template and produces instances
//! from it. Everything the loader does (downloads, versioning, content
//! production) is outside this crate; pools only see the operations below.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::Capability;
use crate::error::Result;
use crate::key::ResourceKey;

/// Opaque handle of a scene node that instances are parented under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlacementRoot(pub u64);

/// Where a new or reused instance should be placed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Placement {
    /// Parent node, if any.
    pub root: Option<PlacementRoot>,
    /// World position.
    pub position: Option<[f32; 3]>,
    /// Rotation quaternion (x, y, z, w).
    pub rotation: Option<[f32; 4]>,
}

impl Placement {
    /// Place under the given parent node.
    #[must_use]
    pub fn under(root: PlacementRoot) -> Self {
        Self {
            root: Some(root),
            ..Self::default()
        }
    }

    /// Set the position.
    #[must_use]
    pub fn at(mut self, position: [f32; 3]) -> Self {
        self.position = Some(position);
        self
    }

    /// Set the rotation.
    #[must_use]
    pub fn rotated(mut self, rotation: [f32; 4]) -> Self {
        self.rotation = Some(rotation);
        self
    }
}

/// External asset loader consumed by pools, the registry and inventories.
///
/// `resolve` and `instantiate` complete exactly once, with a value or an
/// error. They are never cancelled by the pooling engine.
#[async_trait]
pub trait AssetLoader: Send + Sync + 'static {
    /// Resolved blueprint of a resource kind.
    type Template: Send + Sync + 'static;

    /// Instance produced from a template.
    type Instance: Capability;

    /// Resolve a key to its template.
    async fn resolve(&self, key: &ResourceKey) -> Result<Self::Template>;

    /// Produce a new instance from a resolved template.
    async fn instantiate(
        &self,
        key: &ResourceKey,
        template: &Self::Template,
        placement: &Placement,
    ) -> Result<Self::Instance>;

    /// Move a reused instance to a new placement.
    fn place(&self, _instance: &mut Self::Instance, _placement: &Placement) {}

    /// Destroy an instance permanently.
    fn release_instance(&self, instance: Self::Instance) {
        drop(instance);
    }

    /// Give a template back to the loader once nothing will instantiate it again.
    fn release_template(&self, _key: &ResourceKey, template: Arc<Self::Template>) {
        drop(template);
    }
}
