//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Metrics → Breakers → Rehydrate → Background tasks
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Trigger → Checkpointer flushes → Tasks joined → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then background tasks
//! - Shutdown has timeout: abandoned tasks after the deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{next_signal, SignalEvent};
pub use startup::{start, Services, StartupError};
