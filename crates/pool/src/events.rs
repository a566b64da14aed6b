//! Event broadcasting for pool diagnostics.
//!
//! Provides [`PoolEvent`] variants emitted by pools, the registry and
//! inventories, and an [`EventBus`] backed by `tokio::sync::broadcast`.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::key::{ContextId, EntryId, GroupId, ResourceKey};

// ---------------------------------------------------------------------------
// PoolEvent
// ---------------------------------------------------------------------------

/// Events emitted during pool lifecycle operations.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A pool was created for a (group, key) pair.
    PoolCreated {
        /// The resource key.
        key: ResourceKey,
        /// The owning group.
        group: GroupId,
    },
    /// A template finished resolving.
    TemplateResolved {
        /// The resource key.
        key: ResourceKey,
    },
    /// The loader failed to resolve a template.
    ResolutionFailed {
        /// The resource key.
        key: ResourceKey,
        /// Human-readable error description.
        error: String,
    },
    /// A new entry was produced by the loader.
    Created {
        /// The resource key.
        key: ResourceKey,
        /// The owning group.
        group: GroupId,
        /// The new entry.
        entry: EntryId,
    },
    /// Instance creation failed.
    CreationFailed {
        /// The resource key.
        key: ResourceKey,
        /// The owning group.
        group: GroupId,
        /// Human-readable error description.
        error: String,
    },
    /// An entry was handed out.
    Claimed {
        /// The resource key.
        key: ResourceKey,
        /// The owning group.
        group: GroupId,
        /// The claimed entry.
        entry: EntryId,
    },
    /// An entry came back.
    Released {
        /// The resource key.
        key: ResourceKey,
        /// The owning group.
        group: GroupId,
        /// The released entry.
        entry: EntryId,
        /// How long the caller held it.
        held_for: Duration,
    },
    /// An entry was permanently destroyed.
    Destroyed {
        /// The resource key.
        key: ResourceKey,
        /// The owning group.
        group: GroupId,
        /// The destroyed entry.
        entry: EntryId,
        /// Why it was destroyed.
        reason: DestroyReason,
    },
    /// All entries of a context were removed from an inventory.
    ContextPurged {
        /// The resource key.
        key: ResourceKey,
        /// The removed context.
        context: ContextId,
        /// Number of entries removed.
        removed: usize,
    },
    /// Bookkeeping detected misuse (double release, foreign release,
    /// reference underflow).
    IntegrityViolation {
        /// The resource key.
        key: ResourceKey,
        /// Human-readable description.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// DestroyReason
// ---------------------------------------------------------------------------

/// Reason an entry was permanently destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// The pool was resized down.
    Shrink,
    /// The pool was drained (bulk release of a group).
    Drain,
    /// The pool or registry is shutting down.
    Shutdown,
    /// The pool already held `max_pooled` entries.
    OverCapacity,
    /// The owning context was removed.
    ContextRemoved,
    /// `ensure_instances` removed a surplus entry.
    Surplus,
    /// The entry came back after its slot or pool was gone.
    Orphaned,
    /// The entry was built from a template that has since been replaced.
    Stale,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for pool events.
///
/// Emission is fire-and-forget: if no subscribers are listening or the
/// channel is full, events are dropped (no backpressure on the emitter).
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    ///
    /// Slow subscribers that fall more than `buffer_size` events behind get
    /// a `Lagged` error and skip to the latest.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: PoolEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ResourceKey {
        ResourceKey::new("fx.spark").unwrap()
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(PoolEvent::TemplateResolved { key: key() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn zero_buffer_is_bumped_to_one() {
        let bus = EventBus::new(0);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(PoolEvent::PoolCreated {
            key: key(),
            group: GroupId::default(),
        });

        match rx.recv().await.expect("should receive event") {
            PoolEvent::PoolCreated { key, group } => {
                assert_eq!(key.as_str(), "fx.spark");
                assert_eq!(group.as_str(), "default");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(PoolEvent::ResolutionFailed {
            key: key(),
            error: "asset missing".to_string(),
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            PoolEvent::ResolutionFailed { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            PoolEvent::ResolutionFailed { .. }
        ));
    }
}
