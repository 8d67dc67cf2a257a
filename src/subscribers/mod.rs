//! # Event subscribers.
//!
//! ## Architecture
//! ```text
//! Device task ── publish(Event) ──► Bus ──► orchestrator listener ──► SubscriberSet
//!                                                                       │
//!                                                          ┌────────────┼──────────┐
//!                                                          ▼            ▼          ▼
//!                                                       LogWriter    Metrics    Custom
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
