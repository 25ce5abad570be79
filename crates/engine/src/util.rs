//! Internal helpers for input validation and normalization.
//!
//! These utilities are **not** part of the public API. They centralize
//! validation so the engine enforces consistent invariants on every write
//! and on every filter before it reaches the database.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{EngineError, ResultEngine};

/// Fixed calendar format for record dates and filter bounds.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` date. The fixed width is required so stored dates
/// compare correctly as strings.
pub(crate) fn parse_date(value: &str, label: &str) -> ResultEngine<NaiveDate> {
    let value = value.trim();
    if value.len() != 10 {
        return Err(EngineError::InvalidDate(format!(
            "{label} must use the YYYY-MM-DD format, got '{value}'"
        )));
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| {
        EngineError::InvalidDate(format!(
            "{label} must use the YYYY-MM-DD format, got '{value}'"
        ))
    })
}

/// Validate an optional date bound and return it in canonical form.
pub(crate) fn normalize_optional_date(
    value: Option<&str>,
    label: &str,
) -> ResultEngine<Option<String>> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => Ok(Some(parse_date(value, label)?.format(DATE_FORMAT).to_string())),
        None => Ok(None),
    }
}

/// Currency codes are three ASCII letters, stored uppercase.
pub(crate) fn normalize_currency(value: &str) -> ResultEngine<String> {
    let code = value.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(EngineError::InvalidInput(format!(
            "invalid currency code: '{}'",
            value.trim()
        )));
    }
    Ok(code)
}

/// Type tags are stored trimmed and lowercase.
pub(crate) fn normalize_tag(value: &str) -> String {
    value.trim().to_lowercase()
}

pub(crate) fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

pub(crate) fn normalize_required(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidInput(format!("{label} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Opaque 64 hex char token for email verification and password reset links.
pub(crate) fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}
