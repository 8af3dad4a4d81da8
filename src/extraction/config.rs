//! Extraction Config (C1): declarative IFC class → normalized element type
//! mapping, with ordered field-resolution chains.
//!
//! This is the extraction layer's sole extension point: supporting a new
//! normalized type or a vendor-specific variant requires only an edit here,
//! never a change to the extractor itself.

use serde::{Deserialize, Serialize};

use crate::model::{ElementType, Unit};

/// One resolution strategy in a field's fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Read `quantity` from the named quantity set.
    QuantitySet { set: String, quantity: String },
    /// Read `property` from the named property set.
    PropertySet { set: String, property: String },
    /// Read a direct attribute off the IFC entity.
    Attribute { name: String },
}

/// A single normalized-field spec: name, target unit, and an ordered
/// fallback chain of strategies to populate it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub field: String,
    pub target_unit: Unit,
    pub strategies: Vec<ResolutionStrategy>,
}

/// One entry mapping an IFC class to a normalized output type and its
/// field specs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionRule {
    pub ifc_class: String,
    pub output_type: ElementType,
    pub fields: Vec<FieldSpec>,
}

/// The full extraction-config document.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExtractionConfig {
    pub rules: Vec<ExtractionRule>,
}

impl ExtractionConfig {
    /// Find the extraction rule for a given IFC class, if one is declared.
    pub fn rule_for_class(&self, ifc_class: &str) -> Option<&ExtractionRule> {
        self.rules.iter().find(|r| r.ifc_class == ifc_class)
    }

    /// Find the extraction rule that produces a given normalized type,
    /// used by the evaluator's target-selection step — the same mapping
    /// that drove extraction is reused so a rule's declared IFC class
    /// resolves to the same normalized type tag.
    pub fn rule_for_output_type(&self, ty: ElementType) -> Option<&ExtractionRule> {
        self.rules.iter().find(|r| r.output_type == ty)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_for_class_finds_declared_mapping() {
        let config = ExtractionConfig {
            rules: vec![ExtractionRule {
                ifc_class: "IfcDoor".into(),
                output_type: ElementType::Door,
                fields: vec![FieldSpec {
                    field: "clear_width_mm".into(),
                    target_unit: Unit::Millimetre,
                    strategies: vec![ResolutionStrategy::QuantitySet {
                        set: "Qto_DoorBaseQuantities".into(),
                        quantity: "ClearWidth".into(),
                    }],
                }],
            }],
        };
        assert!(config.rule_for_class("IfcDoor").is_some());
        assert!(config.rule_for_class("IfcWindow").is_none());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ExtractionConfig {
            rules: vec![ExtractionRule {
                ifc_class: "IfcWall".into(),
                output_type: ElementType::Wall,
                fields: vec![],
            }],
        };
        let s = toml::to_string(&config).unwrap();
        let parsed = ExtractionConfig::from_toml_str(&s).unwrap();
        assert_eq!(parsed, config);
    }
}
