use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Admin payloads.
pub mod admin;
/// Group, vote and message payloads.
pub mod groups;
/// Guard inspection payloads.
pub mod guards;
/// Health payloads.
pub mod health;
/// SSE frames.
pub mod sse;
/// Custom validators.
pub mod validation;

/// Render `value` as RFC 3339 for API payloads.
pub(crate) fn format_timestamp(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
