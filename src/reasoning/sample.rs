//! Sample Builder (C8): projects one (element, rule, verdict) triple into a
//! fixed-length feature vector and scalar label.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::{Element, ElementType};
use crate::rules::{Comparator, Rule, Severity, ValueSource, Verdict, VerdictStatus};

pub const ELEMENT_FEATURES: usize = 128;
pub const RULE_FEATURES: usize = 128;
pub const CONTEXT_FEATURES: usize = 64;
pub const FEATURE_DIM: usize = ELEMENT_FEATURES + RULE_FEATURES + CONTEXT_FEATURES;

/// Reference min/max range used to min-max normalize a normalized numeric
/// field, drawn from the field's element-type domain. Values outside the
/// range are clamped rather than extrapolated.
fn field_reference_range(field: &str) -> (f64, f64) {
    match field {
        "width_mm" => (300.0, 3000.0),
        "height_mm" => (300.0, 4000.0),
        "area_m2" => (0.5, 500.0),
        "perimeter_m" => (1.0, 200.0),
        "clear_width_mm" => (400.0, 1600.0),
        "slope_deg" => (0.0, 90.0),
        _ => (0.0, 1.0),
    }
}

fn min_max_normalize(value: f64, (min, max): (f64, f64)) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        return 0.0;
    }
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

/// Append-only string→index vocabulary for material/usage embeddings.
/// Entries are never removed or renumbered once assigned, so an index
/// persisted in an old sample stays valid as the vocabulary grows.
#[derive(Default)]
pub struct Vocabulary {
    indices: Mutex<HashMap<String, usize>>,
    next: AtomicUsize,
}

impl Vocabulary {
    pub fn new() -> Self {
        Vocabulary { indices: Mutex::new(HashMap::new()), next: AtomicUsize::new(0) }
    }

    /// Returns the stable index for `term`, assigning a new one if unseen.
    pub fn index_of(&self, term: &str) -> usize {
        let mut indices = self.indices.lock();
        if let Some(idx) = indices.get(term) {
            return *idx;
        }
        let idx = self.next.fetch_add(1, Ordering::SeqCst);
        indices.insert(term.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.indices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> HashMap<String, usize> {
        self.indices.lock().clone()
    }
}

/// Immutable training sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub element_id: String,
    pub features: Vec<f64>,
    pub label: u8,
    pub rule_id: String,
    pub source_file: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// `build_sample(element, rule, verdict) -> Sample | None`. Returns `None`
/// when the verdict is UNABLE — excluded at construction per DS1's
/// rationale (missing inputs would train the classifier on absent signal).
///
/// SB1: element numeric fields are read from the live element and never
/// defaulted. A field missing from the element contributes a zero value
/// paired with a validity bit of 0, never a synthesized default — this is
/// the one place a historical regression (defaulting to 0.5) collapsed the
/// classifier to the majority class, so this function does not fall back
/// silently.
pub fn build_sample(element: &Element, rule: &Rule, verdict: &Verdict, vocabulary: &Vocabulary, source_file: &str) -> Option<Sample> {
    if verdict.status == VerdictStatus::Unable {
        return None;
    }

    let mut features = Vec::with_capacity(FEATURE_DIM);
    features.extend(element_features(element, vocabulary));
    features.extend(rule_features(rule));
    features.extend(context_features(element, rule, verdict));

    debug_assert_eq!(features.len(), FEATURE_DIM);

    Some(Sample {
        element_id: element.id.clone(),
        features,
        label: if verdict.status == VerdictStatus::Pass { 1 } else { 0 },
        rule_id: rule.id.clone(),
        source_file: source_file.to_string(),
        timestamp: verdict.timestamp,
    })
}

fn element_features(element: &Element, vocabulary: &Vocabulary) -> Vec<f64> {
    let mut v = Vec::with_capacity(ELEMENT_FEATURES);

    for (name, value) in element.normalized.ordered_fields() {
        match value {
            Some(n) => {
                v.push(min_max_normalize(n, field_reference_range(name)));
                v.push(1.0);
            }
            None => {
                v.push(0.0);
                v.push(0.0);
            }
        }
    }

    for ty in ElementType::ALL {
        v.push(if ty == element.element_type { 1.0 } else { 0.0 });
    }

    let material = element
        .raw_property_sets
        .values()
        .flat_map(|bag| bag.get("Material").or_else(|| bag.get("material")))
        .next()
        .map(|value| value.to_string())
        .unwrap_or_default();
    v.push(vocabulary.index_of(&material) as f64);

    v.resize(ELEMENT_FEATURES, 0.0);
    v.truncate(ELEMENT_FEATURES);
    v
}

fn rule_features(rule: &Rule) -> Vec<f64> {
    let mut v = Vec::with_capacity(RULE_FEATURES);

    for severity in [Severity::Error, Severity::Warning, Severity::Info] {
        v.push(if rule.severity == severity { 1.0 } else { 0.0 });
    }

    let regulation_families = ["ADA", "IBC", "NFPA", "LOCAL"];
    let family = regulation_families.iter().position(|f| rule.provenance.regulation.contains(f)).unwrap_or(regulation_families.len());
    for i in 0..regulation_families.len() {
        v.push(if i == family { 1.0 } else { 0.0 });
    }

    let mut parameter_values: Vec<f64> = rule.parameters.values().filter_map(|p| p.as_f64()).collect();
    parameter_values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    for value in parameter_values.iter().take(8) {
        v.push(min_max_normalize(*value, (0.0, 5000.0)));
    }

    for comparator in [Comparator::Ge, Comparator::Gt, Comparator::Le, Comparator::Lt, Comparator::Eq, Comparator::Ne] {
        v.push(if rule.comparator == comparator { 1.0 } else { 0.0 });
    }

    v.resize(RULE_FEATURES, 0.0);
    v.truncate(RULE_FEATURES);
    v
}

fn context_features(element: &Element, rule: &Rule, verdict: &Verdict) -> Vec<f64> {
    let mut v = Vec::with_capacity(CONTEXT_FEATURES);

    for ty in ElementType::ALL {
        let target_matches = ty == element.element_type;
        v.push(if target_matches { 1.0 } else { 0.0 });
    }

    for source_label in ["qto", "pset", "attribute", "parameter", "literal"] {
        v.push(if source_kind_label(&rule.lhs) == source_label { 1.0 } else { 0.0 });
    }
    for source_label in ["qto", "pset", "attribute", "parameter", "literal"] {
        v.push(if source_kind_label(&rule.rhs) == source_label { 1.0 } else { 0.0 });
    }

    v.push(if !rule.filters.is_empty() { 1.0 } else { 0.0 });
    v.push(if !rule.explanations.on_pass.is_empty() { 1.0 } else { 0.0 });
    v.push(if !rule.explanations.on_fail.is_empty() { 1.0 } else { 0.0 });
    v.push(if verdict.unit.is_some() { 1.0 } else { 0.0 });

    v.resize(CONTEXT_FEATURES, 0.0);
    v.truncate(CONTEXT_FEATURES);
    v
}

fn source_kind_label(source: &ValueSource) -> &'static str {
    match source {
        ValueSource::Qto { .. } => "qto",
        ValueSource::Pset { .. } => "pset",
        ValueSource::Attribute { .. } => "attribute",
        ValueSource::Parameter { .. } => "parameter",
        ValueSource::Literal { .. } => "literal",
    }
}
