//! Catalogue layer: append-only versioning (C6) and the
//! catalogue↔mapping synchronizer (C7).

pub mod sync;
pub mod versioning;

pub use sync::{sync, EmptyMappingTemplate, MappingTemplate, SyncReport};
pub use versioning::{
    apply_modifications, CatalogueDiff, Manifest, Mapping, MappingEntry, Modification, ModificationSummary, VersionRecord, VersionStore,
};
