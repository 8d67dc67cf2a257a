//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging custom handlers into the
//! local observability plane. Each subscriber is driven by a dedicated worker
//! loop fed by a bounded queue owned by the [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching): they do **not** block the
//!   publisher nor other subscribers.
//! - Each subscriber declares its preferred queue capacity via
//!   [`Subscribe::queue_capacity`]. On overflow, events for that subscriber are
//!   **dropped** and a `SubscriberOverflow` event is published.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
///
/// ## Example
/// ```rust
/// use async_trait::async_trait;
/// use devicevisor::{Event, EventKind, Subscribe};
///
/// struct FaultCounter(std::sync::atomic::AtomicU64);
///
/// #[async_trait]
/// impl Subscribe for FaultCounter {
///     async fn on_event(&self, ev: &Event) {
///         if ev.kind == EventKind::ErrorPublished {
///             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///         }
///     }
///     fn name(&self) -> &'static str { "fault-counter" }
/// }
/// ```
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
