//! # Per-device error deduplication state.
//!
//! Each device keeps at most one "last published classification":
//!
//! ```text
//! fault(kind)  ── stored == kind ──► Suppress { repeats }
//!              └─ stored != kind ──► Publish, stored = kind
//! success      ── stored.is_some ──► Cleared { kind, suppressed }, stored = none
//! ```
//!
//! The tracker is owned by the device's own task and never shared.

/// What to do with a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// New classification: publish it.
    Publish,
    /// Same classification as the last published one.
    Suppress {
        /// Consecutive suppressions so far, including this one.
        repeats: u32,
    },
}

/// Classification cleared by a successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleared {
    /// Classification that was active.
    pub kind: String,
    /// How many repeats were suppressed while it was active.
    pub suppressed: u32,
}

/// Dedup state of one device.
#[derive(Debug, Default, Clone)]
pub struct ErrorTracker {
    last: Option<String>,
    suppressed: u32,
}

impl ErrorTracker {
    /// Creates a tracker with nothing stored.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fault and decides whether it is published.
    pub fn observe(&mut self, kind: &str) -> Verdict {
        if self.last.as_deref() == Some(kind) {
            self.suppressed = self.suppressed.saturating_add(1);
            return Verdict::Suppress {
                repeats: self.suppressed,
            };
        }
        self.last = Some(kind.to_string());
        self.suppressed = 0;
        Verdict::Publish
    }

    /// Records a success; returns the classification it clears, if any.
    pub fn clear(&mut self) -> Option<Cleared> {
        let kind = self.last.take()?;
        let suppressed = std::mem::take(&mut self.suppressed);
        Some(Cleared { kind, suppressed })
    }

    /// Currently stored classification.
    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }
}
