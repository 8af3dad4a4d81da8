//! Rule Loader (C4): tolerant parsing of a serialized catalogue document
//! into a normalized id → Rule mapping.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::model::{Catalogue, Rule};

/// Outcome of a load: the rules that parsed, plus one diagnostic per rule
/// that failed schema validation (the rest still load).
pub struct LoadOutcome {
    pub catalogue: Catalogue,
    pub rejected: Vec<RuleRejection>,
}

pub struct RuleRejection {
    pub raw_id: Option<String>,
    pub reason: String,
}

/// A document may be a flat list of rules, a mapping of id → rule, or a
/// container object wrapping either under a `rules` key. This function
/// detects the shape and normalizes to id → Rule, reporting per-rule
/// schema failures individually rather than failing the whole document.
pub fn load(document: &str) -> Result<LoadOutcome, serde_json::Error> {
    let value: Value = serde_json::from_str(document)?;
    let candidates = match value {
        Value::Array(items) => items,
        Value::Object(ref map) if map.contains_key("rules") => {
            match &map["rules"] {
                Value::Array(items) => items.clone(),
                Value::Object(inner) => inner.values().cloned().collect(),
                other => vec![other.clone()],
            }
        }
        Value::Object(map) => map.values().cloned().collect(),
        other => vec![other],
    };

    let mut catalogue = Catalogue::default();
    let mut rejected = Vec::new();

    for candidate in candidates {
        let raw_id = candidate.get("id").and_then(Value::as_str).map(str::to_string);
        match Rule::deserialize(candidate) {
            Ok(rule) => {
                if let Some(existing) = catalogue.rules.insert(rule.id.clone(), rule) {
                    warn!(rule_id = %existing.id, "later source overrides earlier rule definition");
                }
            }
            Err(e) => rejected.push(RuleRejection { raw_id, reason: e.to_string() }),
        }
    }

    Ok(LoadOutcome { catalogue, rejected })
}

/// Merge `incoming` into `base`, later source wins on id conflicts. Returns
/// the ids that were overridden so the caller can log a warning per id.
pub fn merge(base: &mut Catalogue, incoming: Catalogue) -> Vec<String> {
    let mut overridden = Vec::new();
    for (id, rule) in incoming.rules {
        if base.rules.insert(id.clone(), rule).is_some() {
            overridden.push(id);
        }
    }
    overridden
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_json(id: &str) -> String {
        format!(
            r#"{{
                "id": "{id}",
                "name": "Test rule",
                "target_class": "IfcDoor",
                "comparator": "ge",
                "lhs": {{"kind": "attribute", "name": "clear_width_mm"}},
                "rhs": {{"kind": "literal", "value": {{"kind": "number", "value": 813.0}}}},
                "severity": "ERROR",
                "explanations": {{"short": "s", "on_pass": "p", "on_fail": "f"}}
            }}"#
        )
    }

    #[test]
    fn loads_flat_list_shape() {
        let doc = format!("[{}]", rule_json("R1"));
        let outcome = load(&doc).unwrap();
        assert_eq!(outcome.catalogue.rules.len(), 1);
        assert!(outcome.catalogue.rules.contains_key("R1"));
    }

    #[test]
    fn loads_keyed_mapping_shape() {
        let doc = format!(r#"{{"R1": {}}}"#, rule_json("R1"));
        let outcome = load(&doc).unwrap();
        assert_eq!(outcome.catalogue.rules.len(), 1);
    }

    #[test]
    fn loads_wrapped_container_shape() {
        let doc = format!(r#"{{"rules": [{}]}}"#, rule_json("R1"));
        let outcome = load(&doc).unwrap();
        assert_eq!(outcome.catalogue.rules.len(), 1);
    }

    #[test]
    fn malformed_rule_is_rejected_individually_rest_loads() {
        let doc = format!(r#"[{}, {{"id": "bad", "name": "missing fields"}}]"#, rule_json("R1"));
        let outcome = load(&doc).unwrap();
        assert_eq!(outcome.catalogue.rules.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
    }

    #[test]
    fn later_source_wins_on_conflict() {
        let mut base = Catalogue::default();
        let first = load(&format!("[{}]", rule_json("R1"))).unwrap().catalogue;
        base.rules.extend(first.rules);
        let second = load(&format!("[{}]", rule_json("R1"))).unwrap().catalogue;
        let overridden = merge(&mut base, second);
        assert_eq!(overridden, vec!["R1".to_string()]);
    }
}
