//! Collaborator contract for the external IFC parser.
//!
//! The IFC parser itself is out of scope here — per the design, it is an
//! external collaborator whose entity-query API we consume. This module
//! defines that API as a trait so the extraction layer (C2) can be
//! exercised against a fake in tests without linking a real parser.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::PropertyValue;

/// One property-set or quantity-set bag: name → value, as read directly off
/// an IFC entity with no unit conversion or type narrowing applied.
pub type RawPropertyBag = HashMap<String, PropertyValue>;

/// A single IFC entity as exposed by the parser, before extraction.
///
/// Serializable so a CLI or test harness can stand in for the real parser
/// by reading entities off disk as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfcEntity {
    /// Stable GUID, if the entity carries one. IFC allows this to be
    /// absent; extraction assigns a content-hash identifier when it is.
    pub guid: Option<String>,
    pub ifc_class: String,
    pub property_sets: HashMap<String, RawPropertyBag>,
    pub quantity_sets: HashMap<String, RawPropertyBag>,
    pub attributes: RawPropertyBag,
    /// The storey this entity is spatially contained in, if known.
    pub storey: Option<String>,
    /// The building this entity's storey belongs to, if known.
    pub building: Option<String>,
}

/// The entity-query surface the core consumes from the IFC parser: given a
/// file handle, return entities filtered by IFC class. The core does not
/// depend on any specific IFC schema version — class names are plain
/// strings, and a class unknown to the file yields an empty iterator rather
/// than an error.
pub trait IfcSource {
    type Entities: Iterator<Item = IfcEntity>;

    /// Return all entities of the given IFC class (e.g. `"IfcDoor"`).
    /// Single-pass, non-restartable: callers must consume the iterator
    /// before requesting another class from the same source if the
    /// underlying file handle does not support concurrent cursors.
    fn entities_of_class(&self, ifc_class: &str) -> Self::Entities;
}

#[cfg(test)]
pub mod fake {
    //! An in-memory `IfcSource` for extraction tests.
    use super::*;
    use std::vec;

    #[derive(Default)]
    pub struct FakeIfcSource {
        pub entities: Vec<IfcEntity>,
    }

    impl IfcSource for FakeIfcSource {
        type Entities = vec::IntoIter<IfcEntity>;

        fn entities_of_class(&self, ifc_class: &str) -> Self::Entities {
            self.entities
                .iter()
                .filter(|e| e.ifc_class == ifc_class)
                .cloned()
                .collect::<Vec<_>>()
                .into_iter()
        }
    }
}
