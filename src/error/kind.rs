//! Error kinds and their default handling properties.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Closed set of failure classes understood by the resilience core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller supplied bad input.
    Validation,
    /// Caller is not authenticated.
    Authentication,
    /// Caller is authenticated but not allowed.
    Authorization,
    /// Target entity does not exist.
    NotFound,
    /// Operation did not finish in time.
    Timeout,
    /// Database query or connection failure.
    Database,
    /// Pool, quota or memory exhaustion.
    ResourceExhausted,
    /// Rejected by an open circuit breaker.
    CircuitOpen,
    /// Remote side is throttling us.
    RateLimit,
    /// Connection-level failure talking to a remote.
    Network,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::Validation,
        ErrorKind::Authentication,
        ErrorKind::Authorization,
        ErrorKind::NotFound,
        ErrorKind::Timeout,
        ErrorKind::Database,
        ErrorKind::ResourceExhausted,
        ErrorKind::CircuitOpen,
        ErrorKind::RateLimit,
        ErrorKind::Network,
        ErrorKind::Internal,
    ];

    /// Whether failures of this kind are worth retrying by default.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Database
                | ErrorKind::ResourceExhausted
                | ErrorKind::CircuitOpen
                | ErrorKind::RateLimit
                | ErrorKind::Network
        )
    }

    /// HTTP-like status reported to callers.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 408,
            ErrorKind::Database | ErrorKind::ResourceExhausted | ErrorKind::CircuitOpen => 503,
            ErrorKind::RateLimit => 429,
            ErrorKind::Network => 502,
            ErrorKind::Internal => 500,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::Authorization => "AUTHORIZATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Database => "DATABASE_ERROR",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::RateLimit => "RATE_LIMIT_EXCEEDED",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// Suggested wait before trying again, for retryable kinds.
    ///
    /// Circuit-open records carry the breaker's remaining recovery time
    /// instead; the value here is only used when that is unknown.
    pub fn default_retry_after(self) -> Option<Duration> {
        match self {
            ErrorKind::Timeout | ErrorKind::Network => Some(Duration::from_secs(5)),
            ErrorKind::Database | ErrorKind::ResourceExhausted => Some(Duration::from_secs(10)),
            ErrorKind::CircuitOpen => Some(Duration::from_secs(30)),
            ErrorKind::RateLimit => Some(Duration::from_secs(60)),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Database => "database",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Network => "network",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown error kind '{0}'")]
pub struct UnknownErrorKind(pub String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ErrorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownErrorKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        assert!(!ErrorKind::Validation.is_retryable());
        assert_eq!(ErrorKind::Validation.http_status(), 400);
        assert_eq!(ErrorKind::Authorization.http_status(), 403);
        assert!(ErrorKind::Timeout.is_retryable());
        assert_eq!(ErrorKind::Timeout.http_status(), 408);
        assert_eq!(ErrorKind::RateLimit.http_status(), 429);
        assert_eq!(ErrorKind::Network.http_status(), 502);
        assert!(!ErrorKind::Internal.is_retryable());
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn test_retry_hints_only_for_retryable() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.default_retry_after().is_some(), kind.is_retryable(), "{kind}");
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("rate-limit".parse::<ErrorKind>(), Ok(ErrorKind::RateLimit));
        assert_eq!(" Database ".parse::<ErrorKind>(), Ok(ErrorKind::Database));
        assert!("teapot".parse::<ErrorKind>().is_err());
    }
}
