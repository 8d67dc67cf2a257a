//! # Runtime events emitted by the orchestrator, transport and device tasks.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Connection events**: broker session state and reconnect scheduling
//! - **Device events**: task lifecycle, fault deduplication and recovery
//! - **Lifecycle events**: orchestrator phases and shutdown outcome
//! - **Subscriber events**: overflow/panic inside event subscribers
//!
//! Events are the local observability plane. They are never sent to the broker;
//! the built-in [`LogWriter`](crate::LogWriter) renders them through `tracing`.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use devicevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::GraceExceeded)
//!     .with_reason("fan")
//!     .with_delay(Duration::from_secs(8));
//!
//! assert_eq!(ev.kind, EventKind::GraceExceeded);
//! assert_eq!(ev.delay_ms, Some(8_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `device` (subscriber name) and `reason` (panic info).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `device` (subscriber name) and `reason` (`"full"` / `"closed"`).
    SubscriberOverflow,

    // === Connection events ===
    /// Broker session state changed.
    ///
    /// Sets `reason` (new state label).
    ConnectionStateChanged,

    /// A message could not be sent and was dropped.
    ///
    /// Sets `device` (if any), `reason` (topic and transport error).
    PublishDropped,

    // === Device events ===
    /// Device task started.
    DeviceStarting,

    /// Device task exited (gracefully or after cancellation).
    DeviceStopped,

    /// Device task ended with an unrecoverable failure.
    ///
    /// Sets `reason`.
    DeviceFailed,

    /// A device fault was published to the error topics.
    ///
    /// Sets `device`, `reason` (classification).
    ErrorPublished,

    /// A device fault repeated the last published classification and was not published.
    ///
    /// Sets `device`, `reason` (classification), `attempt` (consecutive suppressions).
    ErrorSuppressed,

    /// A device produced a good result after a reported fault.
    ///
    /// Sets `device`, `reason` (cleared classification).
    DeviceRecovered,

    /// Publishing an error event, availability flag or heartbeat failed.
    ///
    /// Sets `device` (if any), `reason`.
    ObservabilityFailed,

    // === Lifecycle events ===
    /// Orchestrator entered a new phase.
    ///
    /// Sets `reason` (phase label).
    PhaseChanged,

    /// A start or shutdown hook failed.
    ///
    /// Sets `device` (hook name), `reason`.
    HookFailed,

    /// Shutdown requested (OS signal or injected token).
    ShutdownRequested,

    /// All device tasks stopped within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; remaining device tasks were aborted.
    ///
    /// Sets `reason` (stuck device names), `delay_ms` (grace period).
    GraceExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Device (or subscriber/hook) label, if applicable.
    pub device: Option<Arc<str>>,
    /// Human-readable reason (errors, classifications, state labels).
    pub reason: Option<Arc<str>>,
    /// Attempt or repetition count.
    pub attempt: Option<u32>,
    /// Delay before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            device: None,
            reason: None,
            attempt: None,
            delay_ms: None,
        }
    }

    /// Attaches a device label.
    #[inline]
    pub fn with_device(mut self, device: impl Into<Arc<str>>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_device(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_device(subscriber)
            .with_reason(info)
    }
}
