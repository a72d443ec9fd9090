//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → metrics + probes → Data Plane client → watches → controller
//!
//! Shutdown (shutdown.rs):
//!     Signal received → queue stops handing out work → in-flight pass
//!     cancelled → workers joined → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
