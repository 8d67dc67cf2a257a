//! Reconnection policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how reconnect delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization to avoid a thundering herd of reconnects
//!
//! ## Quick wiring
//! ```text
//! RuntimeConfig { reconnect: BackoffPolicy }
//!      └─► transport::Reconnector uses:
//!           - backoff.next(attempt) after every failed connect attempt
//!           - attempt resets to zero on the next success
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
