//! Helpers shared across models.

use chrono::{NaiveDate, Utc};

/// Current time in the RFC 3339 form stored in `*_at` columns
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Today's date in the `YYYY-MM-DD` form stored in date columns
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Trimmed, lowercased form used when matching preference attributes
pub fn normalize_attr(value: &str) -> String {
    value.trim().to_lowercase()
}
