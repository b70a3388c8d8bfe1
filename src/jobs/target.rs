//! Target locator parsing.
//!
//! Callers reference the target resource by full URL, by a bare
//! `/status/<id>` path fragment, or by the numeric id itself. The rules
//! are ordered most specific first; the first match wins.

use std::sync::LazyLock;

use regex::Regex;

/// Ordered extraction rules. Index order is match priority.
static TARGET_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // Full URL with a /status/<id> segment, any host
        Regex::new(r"^https?://[^\s/]+/.+/status/(\d+)").unwrap(),
        // Bare path fragment
        Regex::new(r"/status/(\d+)").unwrap(),
        // Bare numeric id (snowflake-sized, so short numbers don't match)
        Regex::new(r"(\d{15,})").unwrap(),
    ]
});

/// Extract the canonical target id from a locator string.
///
/// Returns `None` when no rule matches; callers surface that as
/// `JobError::InvalidTarget`.
pub fn extract_target_id(locator: &str) -> Option<String> {
    for rule in TARGET_RULES.iter() {
        if let Some(caps) = rule.captures(locator) {
            return Some(caps[1].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_full_url() {
        assert_eq!(
            extract_target_id("https://example.com/someuser/status/12345").as_deref(),
            Some("12345")
        );
    }

    #[test]
    fn extracts_from_mobile_and_www_hosts() {
        assert_eq!(
            extract_target_id("http://www.example.com/a/b/status/987654321").as_deref(),
            Some("987654321")
        );
        assert_eq!(
            extract_target_id("https://mobile.example.com/u/status/42").as_deref(),
            Some("42")
        );
    }

    #[test]
    fn extracts_from_path_fragment() {
        assert_eq!(
            extract_target_id("/status/5550001").as_deref(),
            Some("5550001")
        );
    }

    #[test]
    fn bare_long_numeric_id_hits_fallback_rule() {
        assert_eq!(
            extract_target_id("99999999999999999").as_deref(),
            Some("99999999999999999")
        );
    }

    #[test]
    fn short_bare_number_does_not_match() {
        assert_eq!(extract_target_id("12345"), None);
    }

    #[test]
    fn garbage_does_not_match() {
        assert_eq!(extract_target_id("not a locator"), None);
        assert_eq!(extract_target_id(""), None);
    }

    #[test]
    fn url_rule_wins_over_fallback() {
        // The URL also contains a 15+ digit run; the URL rule must take it
        // from the /status/ segment, not wherever the fallback would land.
        let id = extract_target_id("https://example.com/123456789012345678/status/777");
        assert_eq!(id.as_deref(), Some("777"));
    }
}
