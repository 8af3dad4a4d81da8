//! Element records and the per-file graph that groups them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::value::PropertyValue;

/// Closed set of normalized element types the extraction config may target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum ElementType {
    Space,
    Door,
    Window,
    Wall,
    Slab,
    Column,
    Beam,
    Stair,
    Ramp,
}

impl ElementType {
    pub const ALL: [ElementType; 9] = [
        ElementType::Space,
        ElementType::Door,
        ElementType::Window,
        ElementType::Wall,
        ElementType::Slab,
        ElementType::Column,
        ElementType::Beam,
        ElementType::Stair,
        ElementType::Ramp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::Space => "Space",
            ElementType::Door => "Door",
            ElementType::Window => "Window",
            ElementType::Wall => "Wall",
            ElementType::Slab => "Slab",
            ElementType::Column => "Column",
            ElementType::Beam => "Beam",
            ElementType::Stair => "Stair",
            ElementType::Ramp => "Ramp",
        }
    }

    /// One-hot index into the closed set, used by the sample builder's
    /// element-type feature block.
    pub fn one_hot_index(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named bag of properties or quantities, as read from the source IFC
/// entity (e.g. `Qto_DoorBaseQuantities` or `Pset_DoorCommon`).
pub type PropertySet = HashMap<String, PropertyValue>;

/// Normalized, unit-converted numeric fields on an element. Absent fields
/// are `None` — a strategy chain that found nothing is never defaulted
/// (SB1: defaults must never stand in for missing numerics downstream).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizedFields {
    pub width_mm: Option<f64>,
    pub height_mm: Option<f64>,
    pub area_m2: Option<f64>,
    pub perimeter_m: Option<f64>,
    pub clear_width_mm: Option<f64>,
    pub slope_deg: Option<f64>,
}

impl NormalizedFields {
    /// Ordered (name, value) pairs used by the sample builder; order is
    /// fixed so feature-vector layout is stable across runs.
    pub fn ordered_fields(&self) -> [(&'static str, Option<f64>); 6] {
        [
            ("width_mm", self.width_mm),
            ("height_mm", self.height_mm),
            ("area_m2", self.area_m2),
            ("perimeter_m", self.perimeter_m),
            ("clear_width_mm", self.clear_width_mm),
            ("slope_deg", self.slope_deg),
        ]
    }
}

/// Containment context: which storey/building the element belongs to,
/// derived from the IFC spatial-decomposition traversal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpatialContext {
    pub storey: Option<String>,
    pub building: Option<String>,
}

/// One normalized, unit-converted element record. Immutable after
/// extraction; owned exclusively by the graph that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    /// Stable identifier — the source model's GUID, or a content-hash id
    /// for entities the source model left unidentified (flagged via
    /// `synthetic_id`).
    pub id: String,
    pub synthetic_id: bool,
    pub element_type: ElementType,
    pub normalized: NormalizedFields,
    pub raw_property_sets: HashMap<String, PropertySet>,
    pub spatial: SpatialContext,
}

impl Element {
    /// Read one `(pset_or_qto, property)` pair out of the raw bag, the way
    /// the evaluator's `pset`/`qto` value-source resolution does.
    pub fn raw_property(&self, set_name: &str, property: &str) -> Option<&PropertyValue> {
        self.raw_property_sets.get(set_name)?.get(property)
    }

    /// Read a normalized attribute by name (the `attribute` value-source).
    pub fn attribute(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "width_mm" => self.normalized.width_mm.map(PropertyValue::Number),
            "height_mm" => self.normalized.height_mm.map(PropertyValue::Number),
            "area_m2" => self.normalized.area_m2.map(PropertyValue::Number),
            "perimeter_m" => self.normalized.perimeter_m.map(PropertyValue::Number),
            "clear_width_mm" => self.normalized.clear_width_mm.map(PropertyValue::Number),
            "slope_deg" => self.normalized.slope_deg.map(PropertyValue::Number),
            "id" => Some(PropertyValue::Text(self.id.clone())),
            "element_type" => Some(PropertyValue::Enum(self.element_type.as_str().to_string())),
            _ => None,
        }
    }
}

/// Metadata attached to a graph at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub source_file: String,
    pub extraction_method: String,
    pub extracted_at: DateTime<Utc>,
    pub building: Option<String>,
}

/// Assembled per-file graph: elements grouped by normalized type tag in
/// insertion order (determinism requires this, not a `HashMap` of `Vec`s
/// reordered by anything other than extraction order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    elements_by_type: HashMap<ElementType, Vec<Element>>,
    pub metadata: GraphMetadata,
}

impl Graph {
    pub fn new(metadata: GraphMetadata) -> Self {
        Graph { elements_by_type: HashMap::new(), metadata }
    }

    /// Insert one element, preserving insertion order within its type.
    pub fn insert(&mut self, element: Element) {
        self.elements_by_type.entry(element.element_type).or_default().push(element);
    }

    pub fn elements_of(&self, ty: ElementType) -> &[Element] {
        self.elements_by_type.get(&ty).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_elements(&self) -> impl Iterator<Item = &Element> {
        ElementType::ALL.iter().flat_map(move |ty| self.elements_of(*ty).iter())
    }

    pub fn element_by_id(&self, id: &str) -> Option<&Element> {
        self.all_elements().find(|e| e.id == id)
    }

    pub fn total_count(&self) -> usize {
        self.elements_by_type.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_element(id: &str) -> Element {
        Element {
            id: id.to_string(),
            synthetic_id: false,
            element_type: ElementType::Door,
            normalized: NormalizedFields { clear_width_mm: Some(950.0), ..Default::default() },
            raw_property_sets: HashMap::new(),
            spatial: SpatialContext::default(),
        }
    }

    #[test]
    fn insertion_order_is_preserved_within_type() {
        let mut graph = Graph::new(GraphMetadata {
            source_file: "test.ifc".into(),
            extraction_method: "v1".into(),
            extracted_at: Utc::now(),
            building: None,
        });
        graph.insert(sample_element("door-1"));
        graph.insert(sample_element("door-2"));
        let ids: Vec<_> = graph.elements_of(ElementType::Door).iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["door-1", "door-2"]);
    }

    #[test]
    fn element_by_id_finds_across_types() {
        let mut graph = Graph::new(GraphMetadata {
            source_file: "test.ifc".into(),
            extraction_method: "v1".into(),
            extracted_at: Utc::now(),
            building: None,
        });
        graph.insert(sample_element("door-1"));
        assert!(graph.element_by_id("door-1").is_some());
        assert!(graph.element_by_id("missing").is_none());
    }

    #[test]
    fn one_hot_indices_are_stable_and_unique() {
        let indices: Vec<_> = ElementType::ALL.iter().map(|t| t.one_hot_index()).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), indices.len());
    }
}
