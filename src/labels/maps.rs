//! Pure helpers over label maps
//!
//! None of these functions mutate their inputs. Machine sets are processed
//! one after another within a pass and share selector maps, so every helper
//! returns a fresh map instead of editing a borrowed one.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::Labels;

/// Errors for malformed label keys or values
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LabelError {
    #[error("Invalid label key '{0}': {1}")]
    InvalidKey(String, String),

    #[error("Invalid label value '{0}' for key '{1}'")]
    InvalidValue(String, String),
}

/// Merge `overrides` on top of `base`. Keys in `overrides` win.
pub fn merge_string_maps(base: &Labels, overrides: &Labels) -> Labels {
    let mut merged = base.clone();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Re-target a machine's labels from the old machine set selector to the new one.
///
/// Precedence:
/// - keys of `old_selector` take the value from `new_selector`, or are
///   dropped when `new_selector` does not have them
/// - keys of `new_selector` are always present with the new value
/// - every other key of `current` is kept as is
///
/// The result no longer matches `old_selector` unless both selectors agree,
/// and user labels are never touched.
pub fn merge_with_overwrite_and_filter(
    current: &Labels,
    old_selector: &Labels,
    new_selector: &Labels,
) -> Labels {
    let mut result: Labels = current
        .iter()
        .filter(|(k, _)| !old_selector.contains_key(*k) || new_selector.contains_key(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (k, v) in new_selector {
        result.insert(k.clone(), v.clone());
    }

    result
}

/// Render labels as `k1=v1,k2=v2` (sorted) for logs
pub fn format_labels(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("valid label name regex")
    })
}

fn prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("valid label prefix regex")
    })
}

/// Validate a label key: optional DNS-subdomain prefix, a slash, and a name of up to 63 chars
pub fn validate_label_key(key: &str) -> Result<(), LabelError> {
    let invalid = |reason: &str| LabelError::InvalidKey(key.to_string(), reason.to_string());

    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > 253 {
            return Err(invalid("prefix must be 1-253 characters"));
        }
        if !prefix_pattern().is_match(prefix) {
            return Err(invalid("prefix must be a DNS subdomain"));
        }
    }

    if name.is_empty() || name.len() > 63 {
        return Err(invalid("name must be 1-63 characters"));
    }
    if !name_pattern().is_match(name) {
        return Err(invalid(
            "name must start and end with an alphanumeric character",
        ));
    }

    Ok(())
}

/// Validate a label value: empty, or up to 63 chars of the label-name alphabet
pub fn validate_label_value(key: &str, value: &str) -> Result<(), LabelError> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > 63 || !name_pattern().is_match(value) {
        return Err(LabelError::InvalidValue(value.to_string(), key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{CANDIDATE_FOR_UPDATE, SELECTED_FOR_UPDATE};

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_string_maps_override_wins() {
        let base = labels(&[("a", "1"), ("b", "2")]);
        let overrides = labels(&[("b", "3"), ("c", "4")]);

        let merged = merge_string_maps(&base, &overrides);

        assert_eq!(merged, labels(&[("a", "1"), ("b", "3"), ("c", "4")]));
        // inputs untouched
        assert_eq!(base.get("b").unwrap(), "2");
    }

    #[test]
    fn test_merge_with_overwrite_and_filter() {
        let current = labels(&[
            ("pool", "workers"),
            ("hash", "old"),
            ("team", "infra"),
            (CANDIDATE_FOR_UPDATE, "true"),
        ]);
        let old_selector = labels(&[("pool", "workers"), ("hash", "old")]);
        let new_selector = labels(&[("pool", "workers"), ("hash", "new")]);

        let result = merge_with_overwrite_and_filter(&current, &old_selector, &new_selector);

        assert_eq!(result.get("hash").unwrap(), "new");
        assert_eq!(result.get("team").unwrap(), "infra");
        assert_eq!(result.get(CANDIDATE_FOR_UPDATE).unwrap(), "true");
    }

    #[test]
    fn test_merge_drops_old_only_selector_keys() {
        let current = labels(&[("gen", "1"), ("team", "infra")]);
        let old_selector = labels(&[("gen", "1")]);
        let new_selector = labels(&[("rev", "2")]);

        let result = merge_with_overwrite_and_filter(&current, &old_selector, &new_selector);

        assert!(!result.contains_key("gen"));
        assert_eq!(result.get("rev").unwrap(), "2");
        assert_eq!(result.get("team").unwrap(), "infra");
    }

    #[test]
    fn test_format_labels_sorted() {
        let l = labels(&[("b", "2"), ("a", "1")]);
        assert_eq!(format_labels(&l), "a=1,b=2");
    }

    #[test]
    fn test_validate_label_key() {
        assert!(validate_label_key("node").is_ok());
        assert!(validate_label_key(SELECTED_FOR_UPDATE).is_ok());
        assert!(validate_label_key("app.kubernetes.io/name").is_ok());

        assert!(validate_label_key("").is_err());
        assert!(validate_label_key("/name").is_err());
        assert!(validate_label_key("Bad_Prefix/name").is_err());
        assert!(validate_label_key("-leading").is_err());
        assert!(validate_label_key(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_label_value() {
        assert!(validate_label_value("k", "").is_ok());
        assert!(validate_label_value("k", "true").is_ok());
        assert!(validate_label_value("k", "v1.2-rc_3").is_ok());
        assert!(validate_label_value("k", "has space").is_err());
    }
}
