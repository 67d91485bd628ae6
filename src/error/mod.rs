//! Error taxonomy subsystem.
//!
//! # Data Flow
//! ```text
//! Operation fails with any error (Box<dyn Error>)
//!     → classify.rs (downcast known types, then match on message)
//!     → ErrorRecord (kind, status, retryability, retry hint)
//!     → sanitize.rs (redact sensitive context before it is stored)
//!     → consumed by retries, recovery, degradation
//! ```
//!
//! # Design Decisions
//! - The set of kinds is closed; everything unknown is `Internal`
//! - Records are built once and then only read
//! - Context is redacted on insertion, so a record can always be logged

pub mod classify;
pub mod kind;
pub mod record;
pub mod sanitize;

pub use classify::{classify, classify_boxed};
pub use kind::ErrorKind;
pub use record::ErrorRecord;

/// Error type produced by wrapped operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
