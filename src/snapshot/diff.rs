//! Field-level diffing of entity records.

use crate::types::FieldChange;
use serde_json::Value;
use std::collections::BTreeSet;

/// Compute the ordered field changes between two JSON records.
///
/// Keys are visited in sorted order and unchanged keys are omitted. A key
/// missing on one side is reported against `null`. Nested values (category
/// lists, chapter objects) compare as a whole. Non-object inputs are
/// treated as a single unnamed field.
pub fn diff_fields(before: &Value, after: &Value) -> Vec<FieldChange> {
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
            keys.into_iter()
                .filter_map(|key| {
                    let old_value = old.get(key).cloned().unwrap_or(Value::Null);
                    let new_value = new.get(key).cloned().unwrap_or(Value::Null);
                    (old_value != new_value)
                        .then(|| FieldChange::new(key.clone(), old_value, new_value))
                })
                .collect()
        }
        _ if before == after => Vec::new(),
        _ => vec![FieldChange::new("", before.clone(), after.clone())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_reports_changed_fields_sorted() {
        let before = json!({"title": "One Piece", "status": "draft", "author": "Oda"});
        let after = json!({"title": "One Piece", "status": "published", "author": "E. Oda"});

        let changes = diff_fields(&before, &after);
        let fields: Vec<_> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["author", "status"]);
        assert_eq!(changes[1].old_value, json!("draft"));
        assert_eq!(changes[1].new_value, json!("published"));
    }

    #[test]
    fn test_diff_added_and_removed_keys() {
        let before = json!({"cover": "a.png"});
        let after = json!({"categories": ["action"]});

        let changes = diff_fields(&before, &after);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, "categories");
        assert_eq!(changes[0].old_value, Value::Null);
        assert_eq!(changes[1].field, "cover");
        assert_eq!(changes[1].new_value, Value::Null);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let record = json!({"title": "Berserk", "categories": ["dark", "fantasy"]});
        assert!(diff_fields(&record, &record).is_empty());
    }
}
