//! Graceful degradation subsystem.
//!
//! # Data Flow
//! ```text
//! Recovery did not produce a value
//!     → handler.rs picks a strategy from the error kind
//!         cache_fallback   → cache → fallback provider → synthetic
//!         data_fallback    → fallback provider → synthetic
//!         minimal_response → no data
//!         service_fallback → synthetic service status
//!     → response.rs FallbackResponse with a provenance confidence
//! ```
//!
//! # Design Decisions
//! - Confidence follows provenance: cache 0.8, provider 0.4, synthetic 0.2
//! - Degradation never fails; any error or panic yields the emergency response

pub mod handler;
pub mod response;

pub use handler::{DegradationHandler, DegradationStrategy};
pub use response::{FallbackResponse, EMERGENCY_SOURCE};
