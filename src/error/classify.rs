//! Error classification.
//!
//! Walks the source chain of an error, recognizing typed errors first and
//! falling back to message heuristics. Unrecognized errors are `Internal`.

use std::error::Error;
use std::io;

use crate::error::kind::ErrorKind;
use crate::error::record::ErrorRecord;
use crate::error::BoxError;
use crate::resilience::circuit_breaker::BreakerError;
use crate::resilience::timeouts::DeadlineExceeded;

/// Message fragments checked in order; the first match decides the kind.
const MESSAGE_RULES: &[(ErrorKind, &[&str])] = &[
    (ErrorKind::CircuitOpen, &["circuit breaker is open", "circuit open"]),
    (ErrorKind::RateLimit, &["rate limit", "too many requests", "throttl"]),
    (ErrorKind::Timeout, &["timed out", "timeout", "deadline exceeded"]),
    (
        ErrorKind::ResourceExhausted,
        &["pool exhausted", "out of memory", "quota exceeded", "resource exhausted", "too many connections"],
    ),
    (
        ErrorKind::Database,
        &["database", "sql", "deadlock", "constraint", "connection pool"],
    ),
    (
        ErrorKind::Network,
        &["connection refused", "connection reset", "broken pipe", "dns", "network", "unreachable", "econn"],
    ),
    (ErrorKind::Authentication, &["unauthenticated", "invalid token", "not authenticated", "unauthorized"]),
    (ErrorKind::Authorization, &["forbidden", "permission denied", "access denied"]),
    (ErrorKind::NotFound, &["not found", "no such"]),
    (ErrorKind::Validation, &["invalid", "validation", "malformed", "missing field"]),
];

/// Classify any error into an [`ErrorRecord`].
pub fn classify(err: &(dyn Error + 'static)) -> ErrorRecord {
    let mut current: Option<&(dyn Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(record) = classify_typed(e) {
            return record;
        }
        current = e.source();
    }

    let message = err.to_string();
    ErrorRecord::new(classify_message(&message), message)
}

/// [`classify`] for the boxed errors returned by wrapped operations.
pub fn classify_boxed(err: &BoxError) -> ErrorRecord {
    classify(err.as_ref())
}

/// Kind suggested by an error message alone.
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();
    MESSAGE_RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Internal)
}

fn classify_typed(err: &(dyn Error + 'static)) -> Option<ErrorRecord> {
    if let Some(record) = err.downcast_ref::<ErrorRecord>() {
        return Some(record.clone());
    }

    if let Some(breaker) = err.downcast_ref::<BreakerError>() {
        return match breaker {
            BreakerError::Open { name, retry_after, .. } => Some(
                ErrorRecord::new(ErrorKind::CircuitOpen, breaker.to_string())
                    .with_retry_after(*retry_after)
                    .with_context("circuit", name.clone()),
            ),
            BreakerError::Timeout { name, .. } => Some(
                ErrorRecord::new(ErrorKind::Timeout, breaker.to_string()).with_context("circuit", name.clone()),
            ),
            // Classify the wrapped operation's own error.
            BreakerError::Failed { source, .. } => Some(classify(source.as_ref())),
        };
    }

    if err.downcast_ref::<DeadlineExceeded>().is_some() || err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return Some(ErrorRecord::new(ErrorKind::Timeout, err.to_string()));
    }

    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        return Some(ErrorRecord::new(io_kind(io_err.kind()), io_err.to_string()));
    }

    if err.downcast_ref::<serde_json::Error>().is_some() {
        return Some(ErrorRecord::new(ErrorKind::Validation, err.to_string()));
    }

    None
}

fn io_kind(kind: io::ErrorKind) -> ErrorKind {
    match kind {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Authorization,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::Validation,
        io::ErrorKind::OutOfMemory => ErrorKind::ResourceExhausted,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ErrorKind::Network,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_message_heuristics() {
        assert_eq!(classify_message("Database connection lost"), ErrorKind::Database);
        assert_eq!(classify_message("Request timed out"), ErrorKind::Timeout);
        assert_eq!(classify_message("429 Too Many Requests"), ErrorKind::RateLimit);
        assert_eq!(classify_message("connection refused"), ErrorKind::Network);
        assert_eq!(classify_message("Invalid phone number"), ErrorKind::Validation);
        assert_eq!(classify_message("user not found"), ErrorKind::NotFound);
        assert_eq!(classify_message("something odd"), ErrorKind::Internal);
    }

    #[test]
    fn test_io_errors() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "peer went away");
        assert_eq!(classify(&err).kind(), ErrorKind::Network);

        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(classify(&err).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_breaker_open_carries_remaining_time() {
        let err: BoxError = Box::new(BreakerError::Open {
            name: "db".into(),
            state: crate::resilience::circuit_breaker::CircuitState::Open,
            retry_after: Duration::from_millis(1234),
        });
        let record = classify_boxed(&err);
        assert_eq!(record.kind(), ErrorKind::CircuitOpen);
        assert_eq!(record.retry_after(), Some(Duration::from_millis(1234)));
        assert_eq!(record.context()["circuit"], "db");
    }

    #[test]
    fn test_breaker_failure_classifies_inner() {
        let err = BreakerError::Failed {
            name: "db".into(),
            source: Box::new(io::Error::new(io::ErrorKind::PermissionDenied, "nope")),
        };
        assert_eq!(classify(&err).kind(), ErrorKind::Authorization);
    }

    #[test]
    fn test_record_passes_through() {
        let original = ErrorRecord::new(ErrorKind::RateLimit, "slow down").with_retry_after(Duration::from_secs(2));
        let boxed: BoxError = Box::new(original.clone());
        assert_eq!(classify_boxed(&boxed), original);
    }

    #[test]
    fn test_plain_string_error() {
        let boxed: BoxError = "database deadlock detected".into();
        let record = classify_boxed(&boxed);
        assert_eq!(record.kind(), ErrorKind::Database);
        assert_eq!(record.message(), "database deadlock detected");
    }
}
