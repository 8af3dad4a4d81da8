//! The normalized building-model data model: property values, element
//! records, and the per-file graph that groups them (C3).

mod element;
mod value;

pub use element::{Element, ElementType, Graph, GraphMetadata, NormalizedFields, PropertySet, SpatialContext};
pub use value::{PropertyValue, Unit};
