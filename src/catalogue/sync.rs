//! Catalogue↔Mapping Synchronizer (C7): restores invariant CS1 (mapping
//! domain equals the active catalogue's rule id set) after every save.

use tracing::info;

use crate::error::CoreResult;
use crate::rules::Catalogue;

use super::versioning::{Mapping, MappingEntry, VersionStore};

/// Result of one `sync()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub catalogue_size: usize,
    pub mapping_size: usize,
    pub orphans_removed: usize,
    pub missing_templates: Vec<String>,
}

/// A constructor template that can synthesize a mapping entry for a rule id
/// lacking one. Synchronization never touches version 0.
pub trait MappingTemplate {
    fn synthesize(&self, rule_id: &str) -> Option<MappingEntry>;
}

/// Default template: always synthesizes an empty cache entry. Real
/// deployments would supply a template that primes the selector/condition
/// cache from the rule's own definition.
pub struct EmptyMappingTemplate;

impl MappingTemplate for EmptyMappingTemplate {
    fn synthesize(&self, _rule_id: &str) -> Option<MappingEntry> {
        Some(MappingEntry::default())
    }
}

/// Idempotent: for an already-synchronized catalogue, returns a report with
/// zero orphans removed and no missing templates, and persists nothing new.
pub fn sync(store: &VersionStore, template: &dyn MappingTemplate) -> CoreResult<SyncReport> {
    let manifest = store.manifest()?;
    let current = manifest.current_version;
    if current == 0 {
        let (rules, mapping) = store.load(Some(0))?;
        return Ok(SyncReport {
            catalogue_size: rules.rules.len(),
            mapping_size: mapping.len(),
            orphans_removed: 0,
            missing_templates: Vec::new(),
        });
    }

    let (rules, mut mapping) = store.load(Some(current))?;
    let rule_ids: std::collections::HashSet<&str> = rules.rule_ids().collect();
    let mapping_ids: std::collections::HashSet<String> = mapping.keys().cloned().collect();

    let orphans: Vec<String> = mapping_ids.iter().filter(|id| !rule_ids.contains(id.as_str())).cloned().collect();
    for orphan in &orphans {
        mapping.remove(orphan);
    }

    let mut missing_templates = Vec::new();
    for rule_id in &rule_ids {
        if !mapping.contains_key(*rule_id) {
            match template.synthesize(rule_id) {
                Some(entry) => {
                    mapping.insert(rule_id.to_string(), entry);
                }
                None => missing_templates.push(rule_id.to_string()),
            }
        }
    }

    if !orphans.is_empty() || mapping.len() != mapping_ids.len() {
        persist_mapping_in_place(store, current, &rules, &mapping)?;
        info!(orphans_removed = orphans.len(), "synchronized catalogue mapping");
    }

    Ok(SyncReport { catalogue_size: rules.rules.len(), mapping_size: mapping.len(), orphans_removed: orphans.len(), missing_templates })
}

/// Persist the mutated mapping as part of the current version directory —
/// not as a new version, per the design's step 4.
fn persist_mapping_in_place(store: &VersionStore, version_id: u64, rules: &Catalogue, mapping: &Mapping) -> CoreResult<()> {
    store.overwrite_mapping(version_id, rules, mapping)
}
