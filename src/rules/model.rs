//! Rule Model (C4): the typed representation of one compliance rule and
//! the catalogue (flat set keyed by id) that groups them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{ElementType, PropertyValue, Unit};

/// Comparator a rule's condition applies between LHS and RHS.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
    Ne,
}

impl Comparator {
    pub fn is_numeric_only(self) -> bool {
        !matches!(self, Comparator::Eq | Comparator::Ne)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Ge => ">=",
            Comparator::Gt => ">",
            Comparator::Le => "<=",
            Comparator::Lt => "<",
            Comparator::Eq => "=",
            Comparator::Ne => "!=",
        }
    }
}

/// Severity a failing verdict carries forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Where a rule's LHS or RHS value comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueSource {
    /// Read a quantity by name from a named quantity set, in a declared unit.
    Qto { set: String, quantity: String, unit: Unit },
    /// Read a property by name from a named property set.
    Pset { set: String, property: String },
    /// Read a normalized element field directly.
    Attribute { name: String },
    /// Look up a key in the rule's own parameter bag.
    Parameter { key: String },
    /// An embedded constant.
    Literal { value: PropertyValue },
}

/// A single filter predicate applied during target selection: `{source,
/// property, op, value}` against a property-set entry. A missing property
/// makes the filter false (element excluded), never UNABLE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterPredicate {
    pub set: String,
    pub property: String,
    pub op: Comparator,
    pub value: PropertyValue,
}

/// A rule's natural-language explanation templates, each with `{field}`
/// placeholders substituted at render time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExplanationTemplates {
    pub short: String,
    pub on_pass: String,
    pub on_fail: String,
}

/// Provenance of a rule: the regulation, section, and jurisdiction it
/// derives from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Provenance {
    pub regulation: String,
    pub section: String,
    pub jurisdiction: String,
}

/// Immutable compliance rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub target_class: String,
    #[serde(default)]
    pub filters: Vec<FilterPredicate>,
    pub comparator: Comparator,
    pub lhs: ValueSource,
    pub rhs: ValueSource,
    #[serde(default)]
    pub parameters: HashMap<String, PropertyValue>,
    pub severity: Severity,
    #[serde(default)]
    pub provenance: Provenance,
    pub explanations: ExplanationTemplates,
}

/// Flat set of rules keyed by id. Regulatory and custom rules are the same
/// `Rule` type; their union is simply whichever rules are present in a
/// given catalogue instance.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Catalogue {
    pub rules: HashMap<String, Rule>,
}

impl Catalogue {
    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn rules_targeting(&self, ty: ElementType, class_of: impl Fn(&str) -> Option<ElementType>) -> Vec<&Rule> {
        self.rules.values().filter(|rule| class_of(&rule.target_class) == Some(ty)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_round_trips_through_json() {
        let mut rules = HashMap::new();
        rules.insert(
            "ADA_DOOR_MIN_CLEAR_WIDTH".to_string(),
            Rule {
                id: "ADA_DOOR_MIN_CLEAR_WIDTH".to_string(),
                name: "Minimum clear door width".to_string(),
                target_class: "IfcDoor".to_string(),
                filters: vec![],
                comparator: Comparator::Ge,
                lhs: ValueSource::Attribute { name: "clear_width_mm".to_string() },
                rhs: ValueSource::Parameter { key: "min_clear_width_mm".to_string() },
                parameters: HashMap::from([("min_clear_width_mm".to_string(), PropertyValue::Number(813.0))]),
                severity: Severity::Error,
                provenance: Provenance::default(),
                explanations: ExplanationTemplates {
                    short: "door clearance".to_string(),
                    on_pass: "Door {guid} has {lhs} mm, meets required {rhs} mm.".to_string(),
                    on_fail: "Door {guid} has {lhs} mm, below required {rhs} mm.".to_string(),
                },
            },
        );
        let catalogue = Catalogue { rules };
        let json = serde_json::to_string(&catalogue).unwrap();
        let parsed: Catalogue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, catalogue);
    }
}
