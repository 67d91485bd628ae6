//! Request spans.
//!
//! Every resilient call runs inside a span carrying the request's
//! correlation fields, so nested breaker, retry and recovery events can be
//! joined back to the request.

use tracing::Span;

use crate::context::RequestContext;

/// Span for one resilient call against `resource`.
pub fn request_span(resource: &str, ctx: &RequestContext) -> Span {
    tracing::info_span!(
        "resilient_call",
        resource = %resource,
        request_id = %ctx.request_id,
        endpoint = %ctx.endpoint,
        method = %ctx.method,
    )
}
