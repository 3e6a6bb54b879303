//! SQLite implementations of the workflow storage ports. The port traits
//! themselves live in `greenlight_core::workflow::ports` next to the engine
//! that calls them; this crate only supplies the `Sql*` adapters.

use chrono::{DateTime, Utc};

use greenlight_core::workflow::StoreError;

pub mod approval;
pub mod quotation;
pub mod timeline;
pub mod user;

pub use approval::SqlApprovalStore;
pub use quotation::SqlQuotationStore;
pub use timeline::SqlTimelineStore;
pub use user::SqlUserDirectory;

pub(crate) fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

pub(crate) fn decode(context: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Decode(format!("{context}: {detail}"))
}

/// Timestamps are persisted as RFC 3339 text; a row that fails to parse is
/// corrupt and surfaces as a decode error rather than a silent default.
pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode(column, e))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|s| parse_timestamp(column, &s)).transpose()
}
