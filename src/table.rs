//! Matcher tables.
//!
//! An ordered, validated list of `match`/`reply` rules. Tables are checked in
//! full when built and never change afterwards, so a single table can be
//! shared between concurrent calls without locking.

use crate::matcher::matches;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Field holding the request pattern of a rule.
pub const MATCH_FIELD: &str = "match";
/// Field holding the canned reply of a rule.
pub const REPLY_FIELD: &str = "reply";

/// A single (pattern, response) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRule {
    /// Partial structure the request has to contain
    pub pattern: Value,
    /// Reply returned when the pattern matches
    pub response: Value,
}

impl MatchRule {
    /// Check this rule against a request.
    pub fn matches(&self, request: &Value) -> bool {
        matches(request, &self.pattern)
    }
}

/// Reason a table entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// Entry is not a mapping
    NotAMapping,
    /// Required field is absent
    MissingField(&'static str),
    /// Entry carries a field other than `match` and `reply`
    UnknownField(String),
}

/// A malformed entry, identified by its position in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryViolation {
    pub index: usize,
    pub kind: ViolationKind,
}

impl fmt::Display for EntryViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::NotAMapping => write!(f, "entry {}: must be a mapping", self.index),
            ViolationKind::MissingField(field) => {
                write!(f, "entry {}: \"{}\" is required", self.index, field)
            }
            ViolationKind::UnknownField(field) => {
                write!(f, "entry {}: \"{}\" is not allowed", self.index, field)
            }
        }
    }
}

/// Errors raised while building a matcher table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("matchers must be a sequence, got {0}")]
    NotASequence(&'static str),

    #[error("invalid matcher entries: {}", format_violations(.0))]
    InvalidEntries(Vec<EntryViolation>),
}

fn format_violations(violations: &[EntryViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// Check every entry and collect all shape violations.
pub fn validate_entries(entries: &[Value]) -> Vec<EntryViolation> {
    let mut violations = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let Value::Object(fields) = entry else {
            violations.push(EntryViolation {
                index,
                kind: ViolationKind::NotAMapping,
            });
            continue;
        };

        for required in [MATCH_FIELD, REPLY_FIELD] {
            if !fields.contains_key(required) {
                violations.push(EntryViolation {
                    index,
                    kind: ViolationKind::MissingField(required),
                });
            }
        }

        for key in fields.keys() {
            if key != MATCH_FIELD && key != REPLY_FIELD {
                violations.push(EntryViolation {
                    index,
                    kind: ViolationKind::UnknownField(key.clone()),
                });
            }
        }
    }

    violations
}

/// Ordered, immutable list of match rules. Earlier rules win.
#[derive(Debug, Clone, Default)]
pub struct MatcherTable {
    rules: Vec<MatchRule>,
}

impl MatcherTable {
    /// Build a table from raw entries.
    ///
    /// Every entry is validated before anything is kept. On success the
    /// entries are copied, so later changes to `entries` have no effect.
    pub fn build(entries: &[Value]) -> Result<Self, TableError> {
        let violations = validate_entries(entries);
        if !violations.is_empty() {
            return Err(TableError::InvalidEntries(violations));
        }

        let rules = entries
            .iter()
            .filter_map(|entry| {
                Some(MatchRule {
                    pattern: entry.get(MATCH_FIELD)?.clone(),
                    response: entry.get(REPLY_FIELD)?.clone(),
                })
            })
            .collect();

        Ok(Self { rules })
    }

    /// Build a table from a value that should be a sequence of entries.
    pub fn from_value(value: &Value) -> Result<Self, TableError> {
        match value {
            Value::Array(entries) => Self::build(entries),
            other => Err(TableError::NotASequence(type_name(other))),
        }
    }

    /// Find the first rule whose pattern matches the request.
    pub fn first_match(&self, request: &Value) -> Option<&MatchRule> {
        self.rules.iter().find(|rule| rule.matches(request))
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_reply_is_rejected() {
        let err = MatcherTable::build(&[json!({"match": {}})]).unwrap_err();
        match err {
            TableError::InvalidEntries(violations) => {
                assert_eq!(
                    violations,
                    vec![EntryViolation {
                        index: 0,
                        kind: ViolationKind::MissingField("reply"),
                    }]
                );
            }
            other => panic!("Expected InvalidEntries, got {other:?}"),
        }
    }

    #[test]
    fn test_well_formed_entry_builds() {
        let table = MatcherTable::build(&[json!({"match": {}, "reply": {}})]).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rules()[0].pattern, json!({}));
        assert_eq!(table.rules()[0].response, json!({}));
    }

    #[test]
    fn test_all_offending_entries_are_reported() {
        let entries = vec![
            json!({"match": {}, "reply": {}}),
            json!("not an entry"),
            json!({"reply": {"a": 1}}),
            json!({"match": {}, "reply": {}, "priority": 3}),
        ];
        let violations = validate_entries(&entries);
        assert_eq!(violations.len(), 3);
        assert_eq!(violations[0].index, 1);
        assert_eq!(violations[0].kind, ViolationKind::NotAMapping);
        assert_eq!(violations[1].index, 2);
        assert_eq!(violations[1].kind, ViolationKind::MissingField("match"));
        assert_eq!(violations[2].index, 3);
        assert_eq!(
            violations[2].kind,
            ViolationKind::UnknownField("priority".to_string())
        );

        let message = MatcherTable::build(&entries).unwrap_err().to_string();
        assert!(message.contains("entry 1: must be a mapping"));
        assert!(message.contains("entry 2: \"match\" is required"));
        assert!(message.contains("entry 3: \"priority\" is not allowed"));
    }

    #[test]
    fn test_non_sequence_is_rejected() {
        let err = MatcherTable::from_value(&json!({"match": {}, "reply": {}})).unwrap_err();
        assert!(matches!(err, TableError::NotASequence("a mapping")));

        let table = MatcherTable::from_value(&json!([])).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_fields_may_hold_any_shape() {
        let table = MatcherTable::build(&[
            json!({"match": null, "reply": [1, 2]}),
            json!({"match": "x", "reply": 7}),
        ])
        .unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_table_is_a_copy_of_the_input() {
        let mut entries = vec![json!({"match": {"id": 1}, "reply": {"ok": true}})];
        let table = MatcherTable::build(&entries).unwrap();

        entries[0]["reply"]["ok"] = json!(false);
        entries.push(json!({"match": {}, "reply": {}}));

        assert_eq!(table.len(), 1);
        assert_eq!(table.rules()[0].response, json!({"ok": true}));
    }

    #[test]
    fn test_first_match_follows_insertion_order() {
        let table = MatcherTable::build(&[
            json!({"match": {"kind": "a"}, "reply": {"n": 1}}),
            json!({"match": {"kind": "a", "x": 1}, "reply": {"n": 2}}),
            json!({"match": {}, "reply": {"n": 3}}),
        ])
        .unwrap();

        let rule = table.first_match(&json!({"kind": "a", "x": 1})).unwrap();
        assert_eq!(rule.response, json!({"n": 1}));

        let rule = table.first_match(&json!({"kind": "b"})).unwrap();
        assert_eq!(rule.response, json!({"n": 3}));
    }

    #[test]
    fn test_table_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MatcherTable>();
    }
}
