//! Deterministic, path-safe feature identifiers derived from work item titles.

/// Used when a title has no ASCII alphanumerics at all.
pub const FALLBACK_FEATURE_ID: &str = "untitled";

/// Shortest `max_len` that still fits [`FALLBACK_FEATURE_ID`].
pub const MIN_FEATURE_ID_LEN: usize = FALLBACK_FEATURE_ID.len();

const SEPARATOR: char = '-';

/// Slugify a title into a feature id.
///
/// Lower-cases ASCII letters, collapses every run of other characters into a
/// single `-`, trims separators at both ends and caps the result at `max_len`
/// bytes (trailing separators left by the cut are trimmed again). Total: a
/// title with nothing usable maps to [`FALLBACK_FEATURE_ID`]. Idempotent:
/// re-slugifying a feature id returns it unchanged.
pub fn feature_id(title: &str, max_len: usize) -> String {
    let max_len = max_len.max(MIN_FEATURE_ID_LEN);
    let mut slug = String::with_capacity(title.len().min(max_len));
    let mut pending_separator = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push(SEPARATOR);
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    if slug.len() > max_len {
        // ASCII only, so any byte offset is a char boundary.
        slug.truncate(max_len);
        let kept = slug.trim_end_matches(SEPARATOR).len();
        slug.truncate(kept);
    }

    if slug.is_empty() {
        return FALLBACK_FEATURE_ID.to_string();
    }
    slug
}

/// True if `candidate` has the exact shape [`feature_id`] produces.
pub fn is_feature_id(candidate: &str) -> bool {
    !candidate.is_empty()
        && !candidate.starts_with(SEPARATOR)
        && !candidate.ends_with(SEPARATOR)
        && !candidate.contains("--")
        && candidate
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn slugifies_plain_title() {
        assert_eq!(
            feature_id("Add rate limiting to API endpoints", 60),
            "add-rate-limiting-to-api-endpoints"
        );
    }

    #[test]
    fn collapses_punctuation_runs_and_trims() {
        assert_eq!(
            feature_id("  [Bug]: crash -- on /login!! ", 60),
            "bug-crash-on-login"
        );
    }

    #[test]
    fn non_ascii_only_title_falls_back() {
        assert_eq!(feature_id("🚀 ✨", 60), FALLBACK_FEATURE_ID);
        assert_eq!(feature_id("", 60), FALLBACK_FEATURE_ID);
    }

    #[test]
    fn truncation_does_not_leave_trailing_separator() {
        let id = feature_id("abcdefg hijk", 8);
        assert_eq!(id, "abcdefg");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(is_feature_id("add-rate-limiting"));
        assert!(!is_feature_id("-lead"));
        assert!(!is_feature_id("double--sep"));
        assert!(!is_feature_id("Upper"));
        assert!(!is_feature_id("../escape"));
        assert!(!is_feature_id(""));
    }

    proptest! {
        #[test]
        fn derived_ids_are_path_safe(title in any::<String>(), max_len in 8usize..120) {
            let id = feature_id(&title, max_len);
            prop_assert!(is_feature_id(&id));
            prop_assert!(id.len() <= max_len);
        }

        #[test]
        fn derivation_is_idempotent(title in any::<String>(), max_len in 8usize..120) {
            let once = feature_id(&title, max_len);
            prop_assert_eq!(feature_id(&once, max_len), once.clone());
        }

        #[test]
        fn derivation_is_deterministic(title in "[ -~]{0,80}") {
            prop_assert_eq!(feature_id(&title, 60), feature_id(&title, 60));
        }
    }
}
