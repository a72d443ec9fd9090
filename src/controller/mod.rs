//! Reconciliation subsystem.
//!
//! # Data Flow
//! ```text
//! mirror change ──┐
//! resync ticker ──┼→ RateLimitingQueue (one key, deduplicated)
//! failed pass ────┘        │ (after backoff)
//!                          ↓
//!                  worker: list_membership → BackendSync::sync
//!                          │
//!                  ok → forget backoff, err → add_rate_limited
//! ```

pub mod queue;
pub mod rate_limiter;
pub mod reconciler;

pub use queue::RateLimitingQueue;
pub use rate_limiter::{calculate_backoff, RateLimiter};
pub use reconciler::{Controller, ControllerError, ControllerSettings, RECONCILE_KEY};
