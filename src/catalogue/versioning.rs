//! Catalogue Versioning (C6): append-only, copy-on-write versions of
//! (rules, mappings) for one catalogue, tracked by a manifest with a
//! current-version pointer.
//!
//! Storage layout mirrors the teacher's metadata-store pattern: one
//! subdirectory per version containing self-contained JSON records, plus a
//! single manifest file at the store root. Manifest replacement is atomic
//! (write to a temp file, then rename) so readers never observe a partial
//! manifest — the same copy-on-write-then-rename discipline the teacher's
//! WAL compaction used for batch files.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::rules::Catalogue;

/// Evaluation hints keyed by rule id — a selector/condition cache. Kept
/// deliberately opaque to the versioning layer; it only has to preserve
/// the invariant that its key set matches the catalogue's rule ids.
pub type Mapping = HashMap<String, MappingEntry>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MappingEntry {
    pub selector_cache: String,
    pub condition_cache: String,
}

/// One add/remove/update operation against a catalogue version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Modification {
    Add { rule: crate::rules::Rule },
    Remove { rule_id: String },
    Update { rule: crate::rules::Rule, field_diff: String },
}

/// Applies a modification list to a loaded catalogue, in order, producing
/// the resulting catalogue and the summary record `save` persists against
/// the new version. Adds and updates are applied first, in list order;
/// removes are applied last — so a rule both updated and removed in the
/// same list ends up removed, rather than the order being undefined.
pub fn apply_modifications(base: &Catalogue, modifications: &[Modification]) -> (Catalogue, Vec<ModificationSummary>) {
    let mut rules = base.rules.clone();
    let mut removals = Vec::new();
    let mut summaries = Vec::with_capacity(modifications.len());

    for modification in modifications {
        match modification {
            Modification::Add { rule } => {
                rules.insert(rule.id.clone(), rule.clone());
                summaries.push(ModificationSummary { op: "add".to_string(), rule_id: rule.id.clone(), field_diff: None });
            }
            Modification::Update { rule, field_diff } => {
                rules.insert(rule.id.clone(), rule.clone());
                summaries.push(ModificationSummary {
                    op: "update".to_string(),
                    rule_id: rule.id.clone(),
                    field_diff: Some(field_diff.clone()),
                });
            }
            Modification::Remove { rule_id } => {
                removals.push(rule_id.clone());
                summaries.push(ModificationSummary { op: "remove".to_string(), rule_id: rule_id.clone(), field_diff: None });
            }
        }
    }

    for rule_id in removals {
        rules.remove(&rule_id);
    }

    (Catalogue { rules }, summaries)
}

/// Immutable snapshot of one catalogue version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: u64,
    pub created_at: DateTime<Utc>,
    pub author: String,
    pub description: String,
    pub modifications: Vec<ModificationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationSummary {
    pub op: String,
    pub rule_id: String,
    pub field_diff: Option<String>,
}

/// The manifest: current-version pointer plus the full version list and an
/// append-only transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub current_version: u64,
    pub versions: Vec<VersionRecord>,
    pub history: Vec<TransitionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_version: Option<u64>,
    pub to_version: u64,
    pub at: DateTime<Utc>,
    pub description: String,
}

impl Manifest {
    fn empty() -> Self {
        Manifest { current_version: 0, versions: Vec::new(), history: Vec::new() }
    }
}

/// Append-only version store rooted at a directory. Single writer, many
/// readers, per §5's shared-resource policy.
pub struct VersionStore {
    root: PathBuf,
}

impl VersionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        VersionStore { root: root.into() }
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    fn version_dir(&self, version_id: u64) -> PathBuf {
        self.root.join(format!("v{version_id}"))
    }

    fn read_manifest(&self) -> CoreResult<Manifest> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(Manifest::empty());
        }
        let text = fs::read_to_string(&path).map_err(|e| CoreError::io(path.display().to_string(), e))?;
        serde_json::from_str(&text).map_err(CoreError::from)
    }

    /// Write the manifest atomically: write to a sibling temp file, then
    /// rename over the real path. Readers either see the old manifest or
    /// the new one, never a partial write.
    fn write_manifest_atomic(&self, manifest: &Manifest) -> CoreResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| CoreError::io(self.root.display().to_string(), e))?;
        let tmp_path = self.root.join("manifest.json.tmp");
        let json = serde_json::to_string_pretty(manifest)?;
        fs::write(&tmp_path, json).map_err(|e| CoreError::io(tmp_path.display().to_string(), e))?;
        fs::rename(&tmp_path, self.manifest_path()).map_err(|e| CoreError::io(self.manifest_path().display().to_string(), e))?;
        Ok(())
    }

    fn write_version_contents(&self, version_id: u64, rules: &Catalogue, mapping: &Mapping) -> CoreResult<()> {
        let dir = self.version_dir(version_id);
        fs::create_dir_all(&dir).map_err(|e| CoreError::io(dir.display().to_string(), e))?;
        let rules_path = dir.join("rules.json");
        let mappings_path = dir.join("mappings.json");
        fs::write(&rules_path, serde_json::to_string_pretty(rules)?).map_err(|e| CoreError::io(rules_path.display().to_string(), e))?;
        fs::write(&mappings_path, serde_json::to_string_pretty(mapping)?)
            .map_err(|e| CoreError::io(mappings_path.display().to_string(), e))?;
        Ok(())
    }

    fn read_version_contents(&self, version_id: u64) -> CoreResult<(Catalogue, Mapping)> {
        let dir = self.version_dir(version_id);
        let rules_path = dir.join("rules.json");
        let mappings_path = dir.join("mappings.json");
        let rules_text = fs::read_to_string(&rules_path).map_err(|e| CoreError::io(rules_path.display().to_string(), e))?;
        let mappings_text = fs::read_to_string(&mappings_path).map_err(|e| CoreError::io(mappings_path.display().to_string(), e))?;
        Ok((serde_json::from_str(&rules_text)?, serde_json::from_str(&mappings_text)?))
    }

    /// `initial -> v0`: one-time ingestion of the seed catalogue. No-op if
    /// v0 already exists (per CV1, v0 is never mutated after creation).
    pub fn ingest_baseline(&self, rules: Catalogue, mapping: Mapping, author: &str) -> CoreResult<()> {
        let mut manifest = self.read_manifest()?;
        if manifest.versions.iter().any(|v| v.version_id == 0) {
            return Ok(());
        }
        self.write_version_contents(0, &rules, &mapping)?;
        manifest.versions.push(VersionRecord {
            version_id: 0,
            created_at: Utc::now(),
            author: author.to_string(),
            description: "baseline ingestion".to_string(),
            modifications: Vec::new(),
        });
        manifest.current_version = 0;
        manifest.history.push(TransitionRecord { from_version: None, to_version: 0, at: Utc::now(), description: "initial -> v0".to_string() });
        self.write_manifest_atomic(&manifest)
    }

    /// `load(version_id) -> (rules, mappings)`. Loads current if omitted.
    pub fn load(&self, version_id: Option<u64>) -> CoreResult<(Catalogue, Mapping)> {
        let manifest = self.read_manifest()?;
        let target = version_id.unwrap_or(manifest.current_version);
        if !manifest.versions.iter().any(|v| v.version_id == target) {
            return Err(CoreError::not_found("catalogue version", target.to_string()));
        }
        self.read_version_contents(target)
    }

    pub fn current_version_id(&self) -> CoreResult<u64> {
        Ok(self.read_manifest()?.current_version)
    }

    /// `save(rules, mappings, description, modifications, author) ->
    /// new_version_id`. Writes the new version directory first, then
    /// atomically replaces the manifest — per CV2, the manifest always
    /// names exactly one current version which exists, and this ordering
    /// guarantees that invariant even if the process is interrupted
    /// between the two writes (the new directory existing with no manifest
    /// pointer to it is harmless).
    pub fn save(
        &self,
        rules: Catalogue,
        mapping: Mapping,
        description: &str,
        modifications: Vec<ModificationSummary>,
        author: &str,
    ) -> CoreResult<u64> {
        let mut manifest = self.read_manifest()?;
        let new_version_id = manifest.versions.iter().map(|v| v.version_id).max().map(|m| m + 1).unwrap_or(0);

        self.write_version_contents(new_version_id, &rules, &mapping)?;
        manifest.versions.push(VersionRecord {
            version_id: new_version_id,
            created_at: Utc::now(),
            author: author.to_string(),
            description: description.to_string(),
            modifications,
        });
        let from = manifest.current_version;
        manifest.current_version = new_version_id;
        manifest.history.push(TransitionRecord {
            from_version: Some(from),
            to_version: new_version_id,
            at: Utc::now(),
            description: description.to_string(),
        });
        self.write_manifest_atomic(&manifest)?;
        Ok(new_version_id)
    }

    /// `vN -> vK` rollback (K < N): update the current pointer only.
    /// Intermediate versions are never deleted.
    pub fn rollback(&self, target_version: u64) -> CoreResult<()> {
        let mut manifest = self.read_manifest()?;
        if !manifest.versions.iter().any(|v| v.version_id == target_version) {
            return Err(CoreError::not_found("catalogue version", target_version.to_string()));
        }
        let from = manifest.current_version;
        manifest.current_version = target_version;
        manifest.history.push(TransitionRecord {
            from_version: Some(from),
            to_version: target_version,
            at: Utc::now(),
            description: format!("rollback to v{target_version}"),
        });
        self.write_manifest_atomic(&manifest)
    }

    /// Symmetric difference on rule ids (added/removed) plus ids whose rule
    /// record differs between two versions.
    pub fn compare(&self, left: u64, right: u64) -> CoreResult<CatalogueDiff> {
        let (left_rules, _) = self.load(Some(left))?;
        let (right_rules, _) = self.load(Some(right))?;
        let left_ids: std::collections::HashSet<_> = left_rules.rules.keys().cloned().collect();
        let right_ids: std::collections::HashSet<_> = right_rules.rules.keys().cloned().collect();

        let added: Vec<String> = right_ids.difference(&left_ids).cloned().collect();
        let removed: Vec<String> = left_ids.difference(&right_ids).cloned().collect();
        let modified: Vec<String> = left_ids
            .intersection(&right_ids)
            .filter(|id| left_rules.rules[*id] != right_rules.rules[*id])
            .cloned()
            .collect();

        Ok(CatalogueDiff { added, removed, modified })
    }

    pub fn manifest(&self) -> CoreResult<Manifest> {
        self.read_manifest()
    }

    /// Rewrite a version's mapping file in place, without creating a new
    /// version or touching the manifest — used by the synchronizer to
    /// persist orphan removal / template synthesis as part of the current
    /// version directory.
    pub fn overwrite_mapping(&self, version_id: u64, rules: &Catalogue, mapping: &Mapping) -> CoreResult<()> {
        self.write_version_contents(version_id, rules, mapping)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_rule(id: &str) -> crate::rules::Rule {
        crate::rules::Rule {
            id: id.to_string(),
            name: "Sample".to_string(),
            target_class: "IfcDoor".to_string(),
            filters: vec![],
            comparator: crate::rules::Comparator::Ge,
            lhs: crate::rules::ValueSource::Attribute { name: "clear_width_mm".to_string() },
            rhs: crate::rules::ValueSource::Literal { value: crate::model::PropertyValue::Number(813.0) },
            parameters: HashMap::new(),
            severity: crate::rules::Severity::Error,
            provenance: crate::rules::Provenance::default(),
            explanations: crate::rules::ExplanationTemplates::default(),
        }
    }

    #[test]
    fn baseline_ingestion_is_idempotent_and_never_mutated() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        let mut catalogue = Catalogue::default();
        catalogue.rules.insert("R1".to_string(), sample_rule("R1"));
        store.ingest_baseline(catalogue.clone(), Mapping::new(), "seed").unwrap();
        store.ingest_baseline(Catalogue::default(), Mapping::new(), "seed-again").unwrap();

        let (loaded, _) = store.load(Some(0)).unwrap();
        assert_eq!(loaded, catalogue);
        assert_eq!(store.current_version_id().unwrap(), 0);
    }

    #[test]
    fn save_creates_new_version_and_advances_current() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.ingest_baseline(Catalogue::default(), Mapping::new(), "seed").unwrap();

        let mut catalogue = Catalogue::default();
        catalogue.rules.insert("R1".to_string(), sample_rule("R1"));
        let new_id = store
            .save(catalogue.clone(), Mapping::new(), "add R1", vec![ModificationSummary { op: "add".into(), rule_id: "R1".into(), field_diff: None }], "tester")
            .unwrap();

        assert_eq!(new_id, 1);
        assert_eq!(store.current_version_id().unwrap(), 1);
        let (loaded, _) = store.load(None).unwrap();
        assert_eq!(loaded, catalogue);
    }

    #[test]
    fn rollback_preserves_intermediate_versions() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.ingest_baseline(Catalogue::default(), Mapping::new(), "seed").unwrap();
        let mut catalogue = Catalogue::default();
        catalogue.rules.insert("R1".to_string(), sample_rule("R1"));
        store.save(catalogue, Mapping::new(), "add R1", vec![], "tester").unwrap();

        store.rollback(0).unwrap();
        assert_eq!(store.current_version_id().unwrap(), 0);
        assert!(store.load(Some(1)).is_ok(), "v1 must still exist after rollback");
    }

    #[test]
    fn compare_reports_added_removed_modified() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        let mut v0 = Catalogue::default();
        v0.rules.insert("R1".to_string(), sample_rule("R1"));
        store.ingest_baseline(v0, Mapping::new(), "seed").unwrap();

        let mut v1 = Catalogue::default();
        let mut modified_rule = sample_rule("R1");
        modified_rule.name = "Renamed".to_string();
        v1.rules.insert("R1".to_string(), modified_rule);
        v1.rules.insert("R2".to_string(), sample_rule("R2"));
        store.save(v1, Mapping::new(), "modify", vec![], "tester").unwrap();

        let diff = store.compare(0, 1).unwrap();
        assert_eq!(diff.added, vec!["R2".to_string()]);
        assert!(diff.removed.is_empty());
        assert_eq!(diff.modified, vec!["R1".to_string()]);
    }

    #[test]
    fn apply_modifications_applies_removes_after_updates() {
        let mut base = Catalogue::default();
        base.rules.insert("R1".to_string(), sample_rule("R1"));

        let mut updated = sample_rule("R1");
        updated.name = "Renamed".to_string();
        let modifications = vec![
            Modification::Update { rule: updated, field_diff: "name".to_string() },
            Modification::Remove { rule_id: "R1".to_string() },
        ];

        let (result, summaries) = apply_modifications(&base, &modifications);
        assert!(!result.rules.contains_key("R1"), "update-then-remove of the same rule must end up removed");
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].op, "update");
        assert_eq!(summaries[1].op, "remove");
    }

    #[test]
    fn apply_modifications_adds_and_updates_independent_rules() {
        let mut base = Catalogue::default();
        base.rules.insert("R1".to_string(), sample_rule("R1"));

        let modifications = vec![Modification::Add { rule: sample_rule("R2") }, Modification::Remove { rule_id: "R1".to_string() }];
        let (result, _summaries) = apply_modifications(&base, &modifications);
        assert!(result.rules.contains_key("R2"));
        assert!(!result.rules.contains_key("R1"));
    }

    #[test]
    fn load_unknown_version_is_not_found() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.ingest_baseline(Catalogue::default(), Mapping::new(), "seed").unwrap();
        assert!(matches!(store.load(Some(99)), Err(CoreError::NotFound { .. })));
    }
}
