//! Canonical profile record and lookup verdict.

use serde::{Deserialize, Serialize};

use crate::error::LookupError;

/// Placeholder for fields the provider did not return.
pub const FIELD_UNAVAILABLE: &str = "N/A";

/// Canonical profile shape produced by the lookup layer.
///
/// Numeric fields are carried as strings because the upstream providers return
/// a mix of numbers, strings, and nothing at all; absent values normalize to
/// `"N/A"`. Digit content is preserved exactly so display formatting
/// (`format_count`) stays lossless.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub handle: String,
    pub display_name: String,
    pub numeric_id: String,
    pub followers: String,
    pub following: String,
    pub posts: String,
    pub is_private: bool,
    pub is_verified: bool,
    /// Bio text, truncated to 100 chars with an ellipsis marker.
    pub bio: String,
    /// Derived age estimate, e.g. "12 years old (2013)", or "Unknown".
    pub account_age: String,
}

impl Profile {
    /// A record with every field unavailable, used as a normalization base
    /// and by tests that only care about identity.
    pub fn placeholder(handle: &str) -> Self {
        Self {
            handle: handle.to_string(),
            display_name: FIELD_UNAVAILABLE.to_string(),
            numeric_id: FIELD_UNAVAILABLE.to_string(),
            followers: FIELD_UNAVAILABLE.to_string(),
            following: FIELD_UNAVAILABLE.to_string(),
            posts: FIELD_UNAVAILABLE.to_string(),
            is_private: false,
            is_verified: false,
            bio: FIELD_UNAVAILABLE.to_string(),
            account_age: FIELD_UNAVAILABLE.to_string(),
        }
    }
}

/// Classified outcome of one profile lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Verdict {
    /// The profile is reachable.
    Found(Profile),
    /// Definitive not-found (HTTP 404 or provider-level "no such user").
    NotFound,
    /// The lookup failed; the identity's state is unknown.
    Failed(LookupError),
}

impl Verdict {
    /// Short status label for event logging.
    pub fn status_label(&self) -> &'static str {
        match self {
            Verdict::Found(_) => "ok",
            Verdict::NotFound => "not_found",
            Verdict::Failed(_) => "error",
        }
    }
}

/// Group an all-digit count string with thousands separators.
///
/// Non-numeric values (including "N/A") pass through unchanged, preserving
/// the digit content of whatever the provider sent.
pub fn format_count(raw: &str) -> String {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len() + raw.len() / 3);
    let offset = raw.len() % 3;
    for (i, c) in raw.chars().enumerate() {
        if i > 0 && (i + 3 - offset) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_count_groups_digits() {
        assert_eq!(format_count("12345"), "12,345");
        assert_eq!(format_count("1234567"), "1,234,567");
        assert_eq!(format_count("999"), "999");
        assert_eq!(format_count("0"), "0");
    }

    #[test]
    fn test_format_count_passes_non_numeric() {
        assert_eq!(format_count("N/A"), "N/A");
        assert_eq!(format_count(""), "");
        assert_eq!(format_count("12a45"), "12a45");
    }

    #[test]
    fn test_format_count_preserves_digit_content() {
        let raw = "987654321";
        let formatted = format_count(raw);
        let digits: String = formatted.chars().filter(|c| c.is_ascii_digit()).collect();
        assert_eq!(digits, raw);
    }

    #[test]
    fn test_verdict_status_labels() {
        assert_eq!(Verdict::NotFound.status_label(), "not_found");
        assert_eq!(
            Verdict::Failed(LookupError::NoEndpoints).status_label(),
            "error"
        );
    }
}
