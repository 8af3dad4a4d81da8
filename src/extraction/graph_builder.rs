//! Graph Builder (C3): assembles the elements an extraction run produced
//! into a single immutable per-file graph.

use chrono::Utc;

use crate::model::{Element, Graph, GraphMetadata};

/// Assemble a graph from an extraction run's elements. Insertion order is
/// preserved within each type for determinism; building containment is
/// taken from the first element that names one (a whole-file extraction
/// targets a single building in practice).
pub fn build_graph(elements: Vec<Element>, source_file: &str, extraction_method: &str) -> Graph {
    let building = elements.iter().find_map(|e| e.spatial.building.clone());
    let mut graph = Graph::new(GraphMetadata {
        source_file: source_file.to_string(),
        extraction_method: extraction_method.to_string(),
        extracted_at: Utc::now(),
        building,
    });
    for element in elements {
        graph.insert(element);
    }
    graph
}
