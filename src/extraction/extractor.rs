//! Element Extractor (C2): applies an `ExtractionConfig` to an IFC entity
//! stream and produces typed, unit-normalized element records.

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::concurrency::CancellationToken;
use crate::error::{CoreResult, Diagnostic};
use crate::ifc::{IfcEntity, IfcSource};
use crate::model::{Element, NormalizedFields, SpatialContext};

use super::config::{ExtractionConfig, ExtractionRule, FieldSpec, ResolutionStrategy};

/// Result of extracting one entity stream: the elements produced plus any
/// per-entity diagnostics (malformed strategies, unidentified entities).
pub struct ExtractionOutput {
    pub elements: Vec<Element>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Apply `config` to every entity the source yields for each configured
/// IFC class. Unknown classes (not named in `config`) are never queried.
/// Single-pass over each class's entity iterator.
pub fn extract<S: IfcSource>(
    source: &S,
    config: &ExtractionConfig,
    cancellation: &CancellationToken,
) -> CoreResult<ExtractionOutput> {
    let mut elements = Vec::new();
    let mut diagnostics = Vec::new();

    for rule in &config.rules {
        cancellation.check("extract")?;
        for entity in source.entities_of_class(&rule.ifc_class) {
            match extract_one(&entity, rule) {
                Ok((element, mut entity_diagnostics)) => {
                    elements.push(element);
                    diagnostics.append(&mut entity_diagnostics);
                }
                Err(diagnostic) => {
                    warn!(ifc_class = %rule.ifc_class, reason = %diagnostic.message, "skipping malformed entity");
                    diagnostics.push(diagnostic);
                }
            }
        }
    }

    Ok(ExtractionOutput { elements, diagnostics })
}

fn extract_one(entity: &IfcEntity, rule: &ExtractionRule) -> Result<(Element, Vec<Diagnostic>), Diagnostic> {
    let mut diagnostics = Vec::new();

    let (id, synthetic_id) = match &entity.guid {
        Some(guid) if !guid.is_empty() => (guid.clone(), false),
        _ => (content_hash_id(entity), true),
    };
    if synthetic_id {
        diagnostics.push(Diagnostic::new(
            format!("{}::{}", rule.ifc_class, id),
            "entity had no GUID; assigned content-hash identifier".to_string(),
        ));
    }

    let mut normalized = NormalizedFields::default();
    for field in &rule.fields {
        match resolve_field(entity, field) {
            Ok(Some(value)) => assign_field(&mut normalized, &field.field, value),
            Ok(None) => {}
            Err(reason) => {
                diagnostics.push(Diagnostic::new(format!("{}::{}", rule.ifc_class, id), reason));
            }
        }
    }

    let element = Element {
        id,
        synthetic_id,
        element_type: rule.output_type,
        normalized,
        raw_property_sets: entity.property_sets.clone().into_iter().chain(entity.quantity_sets.clone()).collect(),
        spatial: SpatialContext { storey: entity.storey.clone(), building: entity.building.clone() },
    };

    Ok((element, diagnostics))
}

/// Walk a field's strategy chain, returning the first non-null resolution
/// converted to the field's target unit. A strategy that errors while
/// reading is logged and the chain falls through to the next strategy.
fn resolve_field(entity: &IfcEntity, field: &FieldSpec) -> Result<Option<f64>, String> {
    for strategy in &field.strategies {
        let raw = match strategy {
            ResolutionStrategy::QuantitySet { set, quantity } => entity.quantity_sets.get(set).and_then(|bag| bag.get(quantity)),
            ResolutionStrategy::PropertySet { set, property } => entity.property_sets.get(set).and_then(|bag| bag.get(property)),
            ResolutionStrategy::Attribute { name } => entity.attributes.get(name),
        };
        let Some(value) = raw else { continue };
        match value.as_f64() {
            Some(n) => {
                debug!(field = %field.field, value = n, "resolved normalized field");
                return Ok(Some(n * source_unit_factor(strategy) / field.target_unit.to_base_factor()));
            }
            None => {
                // Non-numeric value in a numeric field slot: not usable by this
                // strategy, fall through rather than fail the whole field.
                continue;
            }
        }
    }
    Ok(None)
}

/// Strategies do not currently carry their own declared source unit — the
/// value is assumed to already be in the same base unit family as the
/// field's target (millimetres for lengths, square metres for areas,
/// degrees for angles). This keeps the resolver a pure fallback-chain walk
/// rather than a second unit-inference pass.
fn source_unit_factor(_strategy: &ResolutionStrategy) -> f64 {
    1.0
}

fn assign_field(normalized: &mut NormalizedFields, name: &str, value: f64) {
    match name {
        "width_mm" => normalized.width_mm = Some(value),
        "height_mm" => normalized.height_mm = Some(value),
        "area_m2" => normalized.area_m2 = Some(value),
        "perimeter_m" => normalized.perimeter_m = Some(value),
        "clear_width_mm" => normalized.clear_width_mm = Some(value),
        "slope_deg" => normalized.slope_deg = Some(value),
        _ => {}
    }
}

fn content_hash_id(entity: &IfcEntity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity.ifc_class.as_bytes());
    let mut attribute_names: Vec<&String> = entity.attributes.keys().collect();
    attribute_names.sort();
    for name in attribute_names {
        hasher.update(name.as_bytes());
        hasher.update(entity.attributes[name].to_string().as_bytes());
    }
    format!("sha256:{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ifc::fake::FakeIfcSource;
    use crate::model::{PropertyValue, Unit};
    use std::collections::HashMap;

    fn door_entity(guid: Option<&str>, clear_width: f64) -> IfcEntity {
        let mut qto = HashMap::new();
        qto.insert("ClearWidth".to_string(), PropertyValue::Number(clear_width));
        let mut quantity_sets = HashMap::new();
        quantity_sets.insert("Qto_DoorBaseQuantities".to_string(), qto);
        IfcEntity {
            guid: guid.map(str::to_string),
            ifc_class: "IfcDoor".to_string(),
            property_sets: HashMap::new(),
            quantity_sets,
            attributes: HashMap::new(),
            storey: Some("Level 1".to_string()),
            building: Some("Building A".to_string()),
        }
    }

    fn door_rule() -> ExtractionRule {
        ExtractionRule {
            ifc_class: "IfcDoor".to_string(),
            output_type: crate::model::ElementType::Door,
            fields: vec![FieldSpec {
                field: "clear_width_mm".to_string(),
                target_unit: Unit::Millimetre,
                strategies: vec![ResolutionStrategy::QuantitySet {
                    set: "Qto_DoorBaseQuantities".to_string(),
                    quantity: "ClearWidth".to_string(),
                }],
            }],
        }
    }

    #[test]
    fn extracts_clear_width_from_quantity_set() {
        let source = FakeIfcSource { entities: vec![door_entity(Some("guid-1"), 950.0)] };
        let config = ExtractionConfig { rules: vec![door_rule()] };
        let output = extract(&source, &config, &CancellationToken::new()).unwrap();
        assert_eq!(output.elements.len(), 1);
        assert_eq!(output.elements[0].normalized.clear_width_mm, Some(950.0));
        assert!(!output.elements[0].synthetic_id);
    }

    #[test]
    fn missing_guid_gets_synthetic_id_and_diagnostic() {
        let source = FakeIfcSource { entities: vec![door_entity(None, 900.0)] };
        let config = ExtractionConfig { rules: vec![door_rule()] };
        let output = extract(&source, &config, &CancellationToken::new()).unwrap();
        assert!(output.elements[0].synthetic_id);
        assert!(output.diagnostics.iter().any(|d| d.message.contains("content-hash")));
    }

    #[test]
    fn unknown_ifc_class_is_silently_skipped() {
        let source = FakeIfcSource { entities: vec![door_entity(Some("guid-1"), 950.0)] };
        let config = ExtractionConfig {
            rules: vec![ExtractionRule { ifc_class: "IfcWindow".to_string(), output_type: crate::model::ElementType::Window, fields: vec![] }],
        };
        let output = extract(&source, &config, &CancellationToken::new()).unwrap();
        assert!(output.elements.is_empty());
    }

    #[test]
    fn absent_field_stays_null_never_defaulted() {
        let mut entity = door_entity(Some("guid-1"), 950.0);
        entity.quantity_sets.clear();
        let source = FakeIfcSource { entities: vec![entity] };
        let config = ExtractionConfig { rules: vec![door_rule()] };
        let output = extract(&source, &config, &CancellationToken::new()).unwrap();
        assert_eq!(output.elements[0].normalized.clear_width_mm, None);
    }

    #[test]
    fn cancellation_is_observed_between_rules() {
        let source = FakeIfcSource { entities: vec![door_entity(Some("guid-1"), 950.0)] };
        let config = ExtractionConfig { rules: vec![door_rule()] };
        let token = CancellationToken::new();
        token.cancel();
        assert!(extract(&source, &config, &token).is_err());
    }
}
