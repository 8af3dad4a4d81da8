//! Rule Evaluator (C5): resolves each rule against its matching elements
//! and emits PASS/FAIL/UNABLE verdicts with rendered explanations.

use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::concurrency::CancellationToken;
use crate::error::CoreResult;
use crate::extraction::ExtractionConfig;
use crate::model::{Element, ElementType, Graph, PropertyValue, Unit};

use super::model::{Catalogue, Comparator, FilterPredicate, Rule, ValueSource};

/// Outcome of resolving one (rule, element) pair against a condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    Pass,
    Fail,
    Unable,
}

/// One (rule, element) evaluation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub rule_id: String,
    pub element_id: String,
    pub status: VerdictStatus,
    pub lhs: Option<PropertyValue>,
    pub rhs: Option<PropertyValue>,
    pub unit: Option<Unit>,
    pub data_source: String,
    pub explanation: String,
    pub severity: super::model::Severity,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Diagnostic surfaced at catalogue level (rule targets an IFC class
/// extraction does not know about).
#[derive(Debug, Clone)]
pub struct EvaluationDiagnostic {
    pub rule_id: String,
    pub reason: String,
}

pub struct EvaluationOutput {
    pub verdicts: Vec<Verdict>,
    pub diagnostics: Vec<EvaluationDiagnostic>,
}

/// `evaluate(graph, catalogue) -> sequence<Verdict>`. Verdicts are ordered
/// first by rule id, then by element id, stable across runs given identical
/// input — the outer loop walks rules in sorted order and each rule's
/// candidate elements are sorted by element id before being evaluated.
pub fn evaluate(
    graph: &Graph,
    catalogue: &Catalogue,
    extraction_config: &ExtractionConfig,
    cancellation: &CancellationToken,
) -> CoreResult<EvaluationOutput> {
    let mut rule_ids: Vec<&String> = catalogue.rules.keys().collect();
    rule_ids.sort();

    let mut verdicts = Vec::new();
    let mut diagnostics = Vec::new();

    for rule_id in rule_ids {
        cancellation.check("evaluate")?;
        let rule = &catalogue.rules[rule_id];

        let Some(output_type) = extraction_config.rule_for_class(&rule.target_class).map(|r| r.output_type) else {
            diagnostics.push(EvaluationDiagnostic {
                rule_id: rule.id.clone(),
                reason: format!("target class '{}' is unknown to extraction", rule.target_class),
            });
            continue;
        };

        let mut candidates: Vec<&Element> =
            graph.elements_of(output_type).iter().filter(|element| passes_filters(element, &rule.filters)).collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        verdicts.extend(candidates.into_iter().map(|element| evaluate_rule_against_element(rule, element)));
    }

    Ok(EvaluationOutput { verdicts, diagnostics })
}

/// Same algorithm as `evaluate`, but fans the rule×element work out across
/// a rayon thread pool — used when the caller does not need cooperative
/// cancellation granularity finer than "whole evaluation".
pub fn evaluate_parallel(graph: &Graph, catalogue: &Catalogue, extraction_config: &ExtractionConfig) -> EvaluationOutput {
    let mut rule_ids: Vec<&String> = catalogue.rules.keys().collect();
    rule_ids.sort();

    let per_rule: Vec<(Vec<Verdict>, Option<EvaluationDiagnostic>)> = rule_ids
        .into_par_iter()
        .map(|rule_id| {
            let rule = &catalogue.rules[rule_id];
            let Some(output_type) = extraction_config.rule_for_class(&rule.target_class).map(|r| r.output_type) else {
                return (
                    Vec::new(),
                    Some(EvaluationDiagnostic {
                        rule_id: rule.id.clone(),
                        reason: format!("target class '{}' is unknown to extraction", rule.target_class),
                    }),
                );
            };
            let mut candidates: Vec<&Element> =
                graph.elements_of(output_type).iter().filter(|element| passes_filters(element, &rule.filters)).collect();
            candidates.sort_by(|a, b| a.id.cmp(&b.id));
            let verdicts = candidates.into_iter().map(|element| evaluate_rule_against_element(rule, element)).collect();
            (verdicts, None)
        })
        .collect();

    let mut verdicts = Vec::new();
    let mut diagnostics = Vec::new();
    for (mut rule_verdicts, diagnostic) in per_rule {
        verdicts.append(&mut rule_verdicts);
        diagnostics.extend(diagnostic);
    }
    EvaluationOutput { verdicts, diagnostics }
}

fn passes_filters(element: &Element, filters: &[FilterPredicate]) -> bool {
    filters.iter().all(|filter| {
        match element.raw_property(&filter.set, &filter.property) {
            Some(value) => apply_comparator(filter.op, value, &filter.value).unwrap_or(false),
            None => false,
        }
    })
}

fn evaluate_rule_against_element(rule: &Rule, element: &Element) -> Verdict {
    let lhs = resolve_source(&rule.lhs, rule, element);
    let rhs = resolve_source(&rule.rhs, rule, element);

    let lhs_unit = source_unit(&rule.lhs);
    let rhs_unit = source_unit(&rule.rhs);

    let (status, unit, data_source) = match (&lhs, &rhs) {
        (Some(_), Some(_)) if matches!((lhs_unit, rhs_unit), (Some(a), Some(b)) if a != b) => {
            (VerdictStatus::Unable, lhs_unit.or(rhs_unit), source_kind(&rule.lhs))
        }
        (Some(lhs_val), Some(rhs_val)) => {
            let unit = lhs_unit.or(rhs_unit);
            match apply_comparator(rule.comparator, lhs_val, rhs_val) {
                Some(true) => (VerdictStatus::Pass, unit, source_kind(&rule.lhs)),
                Some(false) => (VerdictStatus::Fail, unit, source_kind(&rule.lhs)),
                None => (VerdictStatus::Unable, unit, source_kind(&rule.lhs)),
            }
        }
        _ => (VerdictStatus::Unable, None, source_kind(&rule.lhs)),
    };

    let explanation = render_explanation(rule, &lhs, &rhs, unit, status, element);

    Verdict {
        rule_id: rule.id.clone(),
        element_id: element.id.clone(),
        status,
        lhs,
        rhs,
        unit,
        data_source,
        explanation,
        severity: rule.severity,
        timestamp: Utc::now(),
    }
}

/// Numeric comparators require both sides numeric (else UNABLE); equality
/// comparators work on any comparable pair. Unit mismatch between two
/// declared units is UNABLE, never silently compared.
fn apply_comparator(comparator: Comparator, lhs: &PropertyValue, rhs: &PropertyValue) -> Option<bool> {
    if comparator.is_numeric_only() {
        let (a, b) = (lhs.as_f64()?, rhs.as_f64()?);
        Some(match comparator {
            Comparator::Ge => a >= b || (a - b).abs() < 1e-6,
            Comparator::Gt => a > b && (a - b).abs() >= 1e-6,
            Comparator::Le => a <= b || (a - b).abs() < 1e-6,
            Comparator::Lt => a < b && (a - b).abs() >= 1e-6,
            Comparator::Eq | Comparator::Ne => unreachable!("numeric-only guard excludes equality comparators"),
        })
    } else {
        let equal = lhs.loosely_equals(rhs);
        Some(match comparator {
            Comparator::Eq => equal,
            Comparator::Ne => !equal,
            _ => unreachable!("equality guard excludes ordering comparators"),
        })
    }
}

fn resolve_source(source: &ValueSource, rule: &Rule, element: &Element) -> Option<PropertyValue> {
    match source {
        ValueSource::Qto { set, quantity, .. } => element.raw_property(set, quantity).cloned(),
        ValueSource::Pset { set, property } => element.raw_property(set, property).cloned(),
        ValueSource::Attribute { name } => element.attribute(name),
        ValueSource::Parameter { key } => rule.parameters.get(key).cloned(),
        ValueSource::Literal { value } => Some(value.clone()),
    }
}

fn source_unit(source: &ValueSource) -> Option<Unit> {
    match source {
        ValueSource::Qto { unit, .. } => Some(*unit),
        _ => None,
    }
}

fn source_kind(source: &ValueSource) -> String {
    match source {
        ValueSource::Qto { set, quantity, .. } => format!("qto:{set}.{quantity}"),
        ValueSource::Pset { set, property } => format!("pset:{set}.{property}"),
        ValueSource::Attribute { name } => format!("attribute:{name}"),
        ValueSource::Parameter { key } => format!("parameter:{key}"),
        ValueSource::Literal { .. } => "literal".to_string(),
    }
}

fn render_explanation(
    rule: &Rule,
    lhs: &Option<PropertyValue>,
    rhs: &Option<PropertyValue>,
    unit: Option<Unit>,
    status: VerdictStatus,
    element: &Element,
) -> String {
    let template = match status {
        VerdictStatus::Pass => &rule.explanations.on_pass,
        VerdictStatus::Fail => &rule.explanations.on_fail,
        VerdictStatus::Unable => &rule.explanations.short,
    };

    let mut rendered = template.clone();
    rendered = rendered.replace("{guid}", &element.id);
    rendered = rendered.replace("{lhs}", &lhs.as_ref().map(ToString::to_string).unwrap_or_else(|| "?".to_string()));
    rendered = rendered.replace("{rhs}", &rhs.as_ref().map(ToString::to_string).unwrap_or_else(|| "?".to_string()));
    rendered = rendered.replace("{unit}", &unit.map(|u| u.to_string()).unwrap_or_default());
    for (key, value) in &rule.parameters {
        rendered = rendered.replace(&format!("{{{key}}}"), &value.to_string());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractionRule, FieldSpec, ResolutionStrategy};
    use crate::model::{GraphMetadata, NormalizedFields, SpatialContext};
    use crate::rules::model::{ExplanationTemplates, Provenance, Severity};
    use std::collections::HashMap;

    fn door_graph(clear_width_mm: f64) -> Graph {
        let mut graph = Graph::new(GraphMetadata {
            source_file: "test.ifc".into(),
            extraction_method: "v1".into(),
            extracted_at: Utc::now(),
            building: None,
        });
        graph.insert(Element {
            id: "door-1".into(),
            synthetic_id: false,
            element_type: ElementType::Door,
            normalized: NormalizedFields { clear_width_mm: Some(clear_width_mm), ..Default::default() },
            raw_property_sets: HashMap::new(),
            spatial: SpatialContext::default(),
        });
        graph
    }

    fn door_extraction_config() -> ExtractionConfig {
        ExtractionConfig {
            rules: vec![ExtractionRule {
                ifc_class: "IfcDoor".into(),
                output_type: ElementType::Door,
                fields: vec![FieldSpec {
                    field: "clear_width_mm".into(),
                    target_unit: Unit::Millimetre,
                    strategies: vec![ResolutionStrategy::Attribute { name: "clear_width_mm".into() }],
                }],
            }],
        }
    }

    fn min_clear_width_rule() -> Rule {
        Rule {
            id: "ADA_DOOR_MIN_CLEAR_WIDTH".into(),
            name: "Minimum clear door width".into(),
            target_class: "IfcDoor".into(),
            filters: vec![],
            comparator: Comparator::Ge,
            lhs: ValueSource::Attribute { name: "clear_width_mm".into() },
            rhs: ValueSource::Parameter { key: "min_clear_width_mm".into() },
            parameters: HashMap::from([("min_clear_width_mm".to_string(), PropertyValue::Number(813.0))]),
            severity: Severity::Error,
            provenance: Provenance::default(),
            explanations: ExplanationTemplates {
                short: "unable to evaluate door clearance".into(),
                on_pass: "Door {guid} has {lhs} mm, meets required {rhs} mm.".into(),
                on_fail: "Door {guid} has {lhs} mm, below required {rhs} mm.".into(),
            },
        }
    }

    #[test]
    fn s1_door_clearance_passes_and_renders_explanation() {
        let graph = door_graph(950.0);
        let mut catalogue = Catalogue::default();
        catalogue.rules.insert("ADA_DOOR_MIN_CLEAR_WIDTH".into(), min_clear_width_rule());
        let config = door_extraction_config();
        let output = evaluate(&graph, &catalogue, &config, &CancellationToken::new()).unwrap();
        assert_eq!(output.verdicts.len(), 1);
        let verdict = &output.verdicts[0];
        assert_eq!(verdict.status, VerdictStatus::Pass);
        assert_eq!(verdict.explanation, "Door door-1 has 950 mm, meets required 813 mm.");
    }

    #[test]
    fn narrow_door_fails() {
        let graph = door_graph(700.0);
        let mut catalogue = Catalogue::default();
        catalogue.rules.insert("ADA_DOOR_MIN_CLEAR_WIDTH".into(), min_clear_width_rule());
        let config = door_extraction_config();
        let output = evaluate(&graph, &catalogue, &config, &CancellationToken::new()).unwrap();
        assert_eq!(output.verdicts[0].status, VerdictStatus::Fail);
    }

    #[test]
    fn missing_value_source_yields_unable() {
        let graph = door_graph_without_clear_width();
        let mut catalogue = Catalogue::default();
        catalogue.rules.insert("ADA_DOOR_MIN_CLEAR_WIDTH".into(), min_clear_width_rule());
        let config = door_extraction_config();
        let output = evaluate(&graph, &catalogue, &config, &CancellationToken::new()).unwrap();
        assert_eq!(output.verdicts[0].status, VerdictStatus::Unable);
    }

    fn door_graph_without_clear_width() -> Graph {
        let mut graph = Graph::new(GraphMetadata {
            source_file: "test.ifc".into(),
            extraction_method: "v1".into(),
            extracted_at: Utc::now(),
            building: None,
        });
        graph.insert(Element {
            id: "door-2".into(),
            synthetic_id: false,
            element_type: ElementType::Door,
            normalized: NormalizedFields::default(),
            raw_property_sets: HashMap::new(),
            spatial: SpatialContext::default(),
        });
        graph
    }

    #[test]
    fn mismatched_qto_units_yield_unable_never_silently_compared() {
        let mut graph = Graph::new(GraphMetadata {
            source_file: "test.ifc".into(),
            extraction_method: "v1".into(),
            extracted_at: Utc::now(),
            building: None,
        });
        graph.insert(Element {
            id: "door-1".into(),
            synthetic_id: false,
            element_type: ElementType::Door,
            normalized: NormalizedFields::default(),
            raw_property_sets: HashMap::from([(
                "Qto_DoorBaseQuantities".to_string(),
                HashMap::from([("ClearWidth".to_string(), PropertyValue::Number(950.0))]),
            )]),
            spatial: SpatialContext::default(),
        });

        let mut catalogue = Catalogue::default();
        let mut rule = min_clear_width_rule();
        rule.lhs = ValueSource::Qto { set: "Qto_DoorBaseQuantities".into(), quantity: "ClearWidth".into(), unit: Unit::Millimetre };
        rule.rhs = ValueSource::Qto { set: "Qto_DoorBaseQuantities".into(), quantity: "ClearWidth".into(), unit: Unit::Metre };
        catalogue.rules.insert(rule.id.clone(), rule);
        let config = door_extraction_config();

        let output = evaluate(&graph, &catalogue, &config, &CancellationToken::new()).unwrap();
        assert_eq!(output.verdicts.len(), 1);
        assert_eq!(output.verdicts[0].status, VerdictStatus::Unable);
    }

    #[test]
    fn unknown_target_class_emits_zero_verdicts_and_diagnostic() {
        let graph = door_graph(950.0);
        let mut catalogue = Catalogue::default();
        let mut rule = min_clear_width_rule();
        rule.target_class = "IfcCurtainWall".into();
        catalogue.rules.insert(rule.id.clone(), rule);
        let config = door_extraction_config();
        let output = evaluate(&graph, &catalogue, &config, &CancellationToken::new()).unwrap();
        assert!(output.verdicts.is_empty());
        assert_eq!(output.diagnostics.len(), 1);
    }

    #[test]
    fn zero_matching_elements_is_not_a_failure() {
        let graph = Graph::new(GraphMetadata {
            source_file: "test.ifc".into(),
            extraction_method: "v1".into(),
            extracted_at: Utc::now(),
            building: None,
        });
        let mut catalogue = Catalogue::default();
        catalogue.rules.insert("ADA_DOOR_MIN_CLEAR_WIDTH".into(), min_clear_width_rule());
        let config = door_extraction_config();
        let output = evaluate(&graph, &catalogue, &config, &CancellationToken::new()).unwrap();
        assert!(output.verdicts.is_empty());
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn verdicts_are_ordered_by_rule_id_then_element_id() {
        let mut graph = door_graph(950.0);
        graph.insert(Element {
            id: "door-0".into(),
            synthetic_id: false,
            element_type: ElementType::Door,
            normalized: NormalizedFields { clear_width_mm: Some(900.0), ..Default::default() },
            raw_property_sets: HashMap::new(),
            spatial: SpatialContext::default(),
        });
        let mut catalogue = Catalogue::default();
        catalogue.rules.insert("ADA_DOOR_MIN_CLEAR_WIDTH".into(), min_clear_width_rule());
        let config = door_extraction_config();
        let output = evaluate(&graph, &catalogue, &config, &CancellationToken::new()).unwrap();
        let ids: Vec<_> = output.verdicts.iter().map(|v| v.element_id.as_str()).collect();
        assert_eq!(ids, vec!["door-0", "door-1"]);
    }
}
