//! Label Utilities
//!
//! Pure helpers for parsing `key=value` label arguments and maintaining the
//! recorded tag history stored in the bookkeeping label

use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Result};

/// Label recording every tag an image has been seen with
pub const ALTERNATE_TAGS_LABEL: &str = "com.dokku.docker-image-labeler/alternate-tags";

/// Label key used by earlier releases for the same purpose
pub const ORIGINAL_TAGS_LABEL: &str = "com.dokku.docker-image-labeler/original-tags";

/// Parse `key=value` label arguments into a map
///
/// The split happens on the first `=` only, so values may contain `=`.
/// An argument without `=` yields an empty value. Later duplicates win.
///
/// # Arguments
/// - `labels`: Label arguments in the order they were given
///
/// # Errors
/// Returns `InvalidLabel` if an argument has an empty key
pub fn parse_labels<S: AsRef<str>>(labels: &[S]) -> Result<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();

    for label in labels {
        let label = label.as_ref();
        let (key, value) = label.split_once('=').unwrap_or((label, ""));

        if key.is_empty() {
            return Err(Error::InvalidLabel(label.to_string()));
        }

        parsed.insert(key.to_string(), value.to_string());
    }

    Ok(parsed)
}

/// Remove duplicate tags, keeping the first occurrence of each
pub fn unique_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    tags.iter()
        .map(|tag| tag.as_ref())
        .filter(|tag| seen.insert(*tag))
        .map(str::to_string)
        .collect()
}

/// Merge the recorded tag history with the tags currently pointing at an image
///
/// Recorded tags keep their position and newly observed tags are appended, so
/// the history only ever grows. A recorded `null` counts as an empty history.
///
/// # Arguments
/// - `recorded`: Current value of the bookkeeping label, if any
/// - `observed`: Repository tags reported by the engine
///
/// # Returns
/// JSON-encoded tag list, or `None` when the recorded history already holds
/// every observed tag
///
/// # Errors
/// Returns `TagDecode` if the recorded value is not a JSON array of strings
pub fn merge_tags(recorded: Option<&str>, observed: &[String]) -> Result<Option<String>> {
    let history: Vec<String> = match recorded {
        Some(value) if !value.is_empty() => {
            serde_json::from_str::<Option<Vec<String>>>(value)
                .map_err(Error::TagDecode)?
                .unwrap_or_default()
        }
        _ => Vec::new(),
    };
    let history = unique_tags(&history);

    let mut tags = history.clone();
    tags.extend(observed.iter().cloned());
    let tags = unique_tags(&tags);
    if tags == history {
        return Ok(None);
    }

    Ok(Some(serde_json::to_string(&tags)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels(&["tier=web", "empty=", "flag"]).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels["tier"], "web");
        assert_eq!(labels["empty"], "");
        assert_eq!(labels["flag"], "");
    }

    #[test]
    fn test_parse_labels_keeps_extra_equals_in_value() {
        let labels = parse_labels(&["url=http://host/?a=b=c"]).unwrap();
        assert_eq!(labels["url"], "http://host/?a=b=c");
    }

    #[test]
    fn test_parse_labels_last_write_wins() {
        let labels = parse_labels(&["a=1", "a=2"]).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels["a"], "2");
    }

    #[test]
    fn test_parse_labels_rejects_empty_key() {
        assert!(matches!(
            parse_labels(&["=value"]),
            Err(Error::InvalidLabel(_))
        ));
        assert!(matches!(parse_labels(&[""]), Err(Error::InvalidLabel(_))));
        assert!(matches!(
            parse_labels(&["ok=1", "="]),
            Err(Error::InvalidLabel(_))
        ));
    }

    #[test]
    fn test_unique_tags_preserves_first_seen_order() {
        assert_eq!(unique_tags(&["x", "y", "x", "z"]), vec!["x", "y", "z"]);
        assert!(unique_tags::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_merge_tags_without_history() {
        let merged = merge_tags(None, &["repo:v1".to_string()]).unwrap();
        assert_eq!(merged.as_deref(), Some(r#"["repo:v1"]"#));
    }

    #[test]
    fn test_merge_tags_appends_new_tags() {
        let observed = vec!["repo:v1".to_string(), "repo:v2".to_string()];
        let merged = merge_tags(Some(r#"["repo:v1"]"#), &observed).unwrap();
        assert_eq!(merged.as_deref(), Some(r#"["repo:v1","repo:v2"]"#));
    }

    #[test]
    fn test_merge_tags_history_already_covers_tags() {
        assert_eq!(merge_tags(Some(r#"["old:1"]"#), &[]).unwrap(), None);
        assert_eq!(merge_tags(Some(r#"["old:1", "old:1"]"#), &[]).unwrap(), None);

        let observed = vec!["repo:v2".to_string(), "repo:v1".to_string()];
        let merged = merge_tags(Some(r#"[ "repo:v1", "repo:v2" ]"#), &observed).unwrap();
        assert_eq!(merged, None);
    }

    #[test]
    fn test_merge_tags_null_history() {
        let merged = merge_tags(Some("null"), &["repo:v1".to_string()]).unwrap();
        assert_eq!(merged.as_deref(), Some(r#"["repo:v1"]"#));
        assert_eq!(merge_tags(Some("null"), &[]).unwrap(), None);
    }

    #[test]
    fn test_merge_tags_nothing_to_record() {
        assert_eq!(merge_tags(None, &[]).unwrap(), None);
        assert_eq!(merge_tags(Some(""), &[]).unwrap(), None);
        assert_eq!(merge_tags(Some("[]"), &[]).unwrap(), None);
    }

    #[test]
    fn test_merge_tags_rejects_malformed_history() {
        let result = merge_tags(Some("not-json"), &["repo:v1".to_string()]);
        assert!(matches!(result, Err(Error::TagDecode(_))));

        let result = merge_tags(Some(r#"{"a":1}"#), &[]);
        assert!(matches!(result, Err(Error::TagDecode(_))));
    }
}
