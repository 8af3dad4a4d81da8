//! # IFC Compliance Engine
//!
//! Extracts building elements out of an IFC model, evaluates a versioned
//! catalogue of regulatory rules against them, and trains a small recursive
//! reasoner on the resulting verdicts so it can predict pass/fail with
//! calibrated confidence.
//!
//! ## Pipeline
//!
//! ```text
//! IFC entities (external parser)
//!     ↓
//! [Extraction Config + Extractor]   → normalized Element records
//!     ↓
//! [Graph Builder]                   → per-file Graph
//!     ↓
//! [Rule Evaluator] using [Rule Catalogue (versioned, synchronized)]
//!     ↓
//! Verdicts
//!     ↓
//! [Sample Builder] → [Dataset] → [Trainer] trains [Recursive Classifier]
//!     tracked by [Model Registry]
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use ifc_compliance::{Config, Engine};
//!
//! let config = Config::load().unwrap_or_default();
//! let engine = Engine::from_config(config).expect("engine");
//! let catalogue = engine.catalogue_ops().list_versions().unwrap();
//! println!("{} catalogue versions on disk", catalogue.current_version);
//! ```

pub mod catalogue;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod extraction;
pub mod ifc;
pub mod logging;
pub mod model;
pub mod reasoning;
pub mod rules;

pub use config::Config;
pub use error::{CoreError, CoreResult};

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;

use catalogue::{CatalogueDiff, Manifest, SyncReport, VersionStore};
use concurrency::CancellationToken;
use extraction::ExtractionConfig;
use ifc::IfcSource;
use model::Graph;
use reasoning::{
    train as train_model, ComparisonReport, Dataset, ModelRegistry, Sample, Trace, TrainingOutcome, VersionRecord as ModelVersionRecord,
    Vocabulary,
};
use rules::{Catalogue, Verdict, VerdictStatus};

/// Facade wrapping the catalogue store, dataset, and model registry behind
/// single-writer/many-reader locking, the way the teacher's `Handler` wraps
/// its storage engine. Cheap to clone: internally `Arc`-shared.
#[derive(Clone)]
pub struct Engine {
    config: Config,
    catalogue_store: Arc<Mutex<VersionStore>>,
    dataset: Arc<Dataset>,
    model_registry: Arc<ModelRegistry>,
    vocabulary: Arc<Vocabulary>,
    start_time: Instant,
}

impl Engine {
    /// Build an engine from a loaded configuration, ingesting the baseline
    /// catalogue on first run.
    pub fn from_config(config: Config) -> CoreResult<Self> {
        let catalogue_store = VersionStore::new(&config.catalogue.store_path);
        let baseline = std::fs::read_to_string(&config.catalogue.baseline_path)
            .map_err(|e| CoreError::io(config.catalogue.baseline_path.display().to_string(), e))?;
        let outcome = rules::load(&baseline)?;
        for rejection in &outcome.rejected {
            tracing::warn!(raw_id = %rejection.raw_id, reason = %rejection.reason, "baseline rule rejected");
        }
        catalogue_store.ingest_baseline(outcome.catalogue, catalogue::Mapping::new(), "system")?;

        let dataset = Dataset::new(&config.dataset.path);
        let model_registry = ModelRegistry::new(model_store_root(&config));

        Ok(Engine {
            config,
            catalogue_store: Arc::new(Mutex::new(catalogue_store)),
            dataset: Arc::new(dataset),
            model_registry: Arc::new(model_registry),
            vocabulary: Arc::new(Vocabulary::new()),
            start_time: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `upload_and_extract(source, source_file) → graph`. The only
    /// I/O-heavy ingestion entry point; generic over the caller's
    /// `IfcSource` implementation since the IFC parser itself is an
    /// external collaborator.
    pub fn upload_and_extract<S: IfcSource>(&self, source: &S, source_file: &str, cancellation: &CancellationToken) -> CoreResult<Graph> {
        let extraction_config_text = std::fs::read_to_string(&self.config.extraction.config_path)
            .map_err(|e| CoreError::io(self.config.extraction.config_path.display().to_string(), e))?;
        let extraction_config = ExtractionConfig::from_toml_str(&extraction_config_text).map_err(|e| CoreError::Config(e.to_string()))?;

        info!(source_file, "extraction started");
        let output = extraction::extract(source, &extraction_config, cancellation)?;
        for diagnostic in &output.diagnostics {
            tracing::warn!(locus = %diagnostic.locus, reason = %diagnostic.message, "extraction diagnostic");
        }
        Ok(extraction::build_graph(output.elements, source_file, "upload_and_extract"))
    }

    /// `evaluate(graph, catalogue_version_id = current) → VerdictList`.
    pub fn evaluate(&self, graph: &Graph, catalogue_version_id: Option<u64>, cancellation: &CancellationToken) -> CoreResult<Vec<Verdict>> {
        let extraction_config_text = std::fs::read_to_string(&self.config.extraction.config_path)
            .map_err(|e| CoreError::io(self.config.extraction.config_path.display().to_string(), e))?;
        let extraction_config = ExtractionConfig::from_toml_str(&extraction_config_text).map_err(|e| CoreError::Config(e.to_string()))?;

        let (catalogue, _mapping) = self.catalogue_store.lock().load(catalogue_version_id)?;
        let output = rules::evaluate(graph, &catalogue, &extraction_config, cancellation)?;
        for diagnostic in &output.diagnostics {
            tracing::warn!(rule_id = %diagnostic.rule_id, reason = %diagnostic.reason, "evaluation diagnostic");
        }
        Ok(output.verdicts)
    }

    /// `add_training_sample(graph, rule, verdict)`: projects the
    /// (element, rule, verdict) triple into a feature vector and appends it
    /// to the dataset, skipping UNABLE verdicts.
    pub fn add_training_sample(&self, graph: &Graph, rule: &rules::Rule, verdict: &Verdict) -> CoreResult<Option<Sample>> {
        if verdict.status == VerdictStatus::Unable {
            return Ok(None);
        }
        let Some(element) = graph.element_by_id(&verdict.element_id) else {
            return Err(CoreError::not_found("element", verdict.element_id.clone()));
        };
        let Some(sample) = reasoning::build_sample(element, rule, verdict, &self.vocabulary, &graph.metadata.source_file) else {
            return Ok(None);
        };
        self.dataset.add_sample(sample.clone())?;
        Ok(Some(sample))
    }

    pub fn catalogue_ops(&self) -> CatalogueOps<'_> {
        CatalogueOps { engine: self }
    }

    pub fn model_ops(&self) -> ModelOps<'_> {
        ModelOps { engine: self }
    }
}

fn model_store_root(config: &Config) -> std::path::PathBuf {
    config.dataset.path.parent().map(|p| p.join("models")).unwrap_or_else(|| std::path::PathBuf::from("./data/models"))
}

/// Catalogue version operations, per the `catalogue_ops` contract group:
/// `list_versions`, `get_version`, `save_version`, `rollback`, `compare`,
/// `sync`.
pub struct CatalogueOps<'a> {
    engine: &'a Engine,
}

impl CatalogueOps<'_> {
    pub fn list_versions(&self) -> CoreResult<Manifest> {
        self.engine.catalogue_store.lock().manifest()
    }

    pub fn get_version(&self, version_id: Option<u64>) -> CoreResult<(Catalogue, catalogue::Mapping)> {
        self.engine.catalogue_store.lock().load(version_id)
    }

    pub fn save_version(
        &self,
        rules: Catalogue,
        mapping: catalogue::Mapping,
        description: &str,
        modifications: Vec<catalogue::ModificationSummary>,
        author: &str,
    ) -> CoreResult<u64> {
        self.engine.catalogue_store.lock().save(rules, mapping, description, modifications, author)
    }

    /// `vN -> v(N+1)`: load the current version, apply a modification list
    /// (adds/updates in order, then removes), and save the result as a new
    /// version — the full state transition described in §4.6, rather than
    /// requiring the caller to pre-compute the resulting catalogue by hand.
    pub fn apply_and_save(&self, modifications: Vec<catalogue::Modification>, description: &str, author: &str) -> CoreResult<u64> {
        let store = self.engine.catalogue_store.lock();
        let (current, mapping) = store.load(None)?;
        let (updated, summaries) = catalogue::apply_modifications(&current, &modifications);
        store.save(updated, mapping, description, summaries, author)
    }

    pub fn rollback(&self, target_version: u64) -> CoreResult<()> {
        self.engine.catalogue_store.lock().rollback(target_version)
    }

    pub fn compare(&self, left: u64, right: u64) -> CoreResult<CatalogueDiff> {
        self.engine.catalogue_store.lock().compare(left, right)
    }

    /// Synchronize the current version's mapping against its catalogue
    /// (CS1), synthesizing entries for rules with none via `template`.
    pub fn sync(&self, template: &dyn catalogue::MappingTemplate) -> CoreResult<SyncReport> {
        catalogue::sync(&self.engine.catalogue_store.lock(), template)
    }
}

/// Model version operations, per the `model_ops` contract group: `train`,
/// `predict`, `list_versions`, `get_version`, `mark_best`, `compare`.
pub struct ModelOps<'a> {
    engine: &'a Engine,
}

impl ModelOps<'_> {
    /// `train(dataset, config) → version_id`, training off of the current
    /// best (or most recent) version as the new version's parent.
    pub fn train(&self, cancellation: &CancellationToken) -> CoreResult<TrainingOutcome> {
        let parent = self
            .engine
            .model_registry
            .best_version()?
            .or_else(|| self.engine.model_registry.list(Some(1)).ok().and_then(|v| v.into_iter().next()))
            .map(|v| v.version_id);

        train_model(
            &self.engine.dataset,
            model_store_root(&self.engine.config),
            &self.engine.config.training,
            &self.engine.config.reasoner,
            parent,
            cancellation,
        )
    }

    /// `predict(features, model_version_id = best_or_latest) → Trace`.
    pub fn predict(&self, features: &[f64], model_version_id: Option<&str>) -> CoreResult<Trace> {
        let record = match model_version_id {
            Some(id) => self.engine.model_registry.get(id)?,
            None => self
                .engine
                .model_registry
                .best_version()?
                .or_else(|| self.engine.model_registry.list(Some(1)).ok().and_then(|v| v.into_iter().next()))
                .ok_or_else(|| CoreError::not_found("model version", "<none registered>"))?,
        };
        let weights = reasoning::load_checkpoint(&record.checkpoint_path)?;
        Ok(reasoning::infer(
            &weights,
            features,
            self.engine.config.reasoner.max_steps,
            self.engine.config.reasoner.convergence_epsilon,
            Some(&record.version_id),
        ))
    }

    pub fn list_versions(&self, limit: Option<usize>) -> CoreResult<Vec<ModelVersionRecord>> {
        self.engine.model_registry.list(limit)
    }

    pub fn get_version(&self, version_id: &str) -> CoreResult<ModelVersionRecord> {
        self.engine.model_registry.get(version_id)
    }

    pub fn mark_best(&self, version_id: &str) -> CoreResult<()> {
        self.engine.model_registry.mark_best(version_id)
    }

    pub fn compare(&self, version_ids: &[String]) -> CoreResult<ComparisonReport> {
        self.engine.model_registry.compare(version_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ifc::fake::FakeIfcSource;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_config(dir: &Path) -> Config {
        let extraction_path = dir.join("extraction.toml");
        std::fs::write(
            &extraction_path,
            r#"
[[rules]]
ifc_class = "IfcDoor"
output_type = "Door"

[[rules.fields]]
field = "clear_width_mm"
target_unit = "millimetre"
[[rules.fields.strategies]]
kind = "quantity_set"
set = "Qto_DoorBaseQuantities"
quantity = "ClearWidth"
"#,
        )
        .unwrap();

        let baseline_path = dir.join("baseline.json");
        let mut file = std::fs::File::create(&baseline_path).unwrap();
        write!(
            file,
            r#"[{{
                "id": "ADA_DOOR_MIN_CLEAR_WIDTH",
                "name": "Minimum clear door width",
                "target_class": "IfcDoor",
                "filters": [],
                "comparator": "ge",
                "lhs": {{"kind": "attribute", "name": "clear_width_mm"}},
                "rhs": {{"kind": "parameter", "key": "min_clear_width_mm"}},
                "parameters": {{"min_clear_width_mm": {{"kind": "number", "value": 813.0}}}},
                "severity": "ERROR",
                "provenance": {{"regulation": "ADA", "section": "", "jurisdiction": ""}},
                "explanations": {{"short": "s", "on_pass": "p", "on_fail": "f"}}
            }}]"#
        )
        .unwrap();

        Config {
            extraction: config::ExtractionConfig { config_path: extraction_path },
            catalogue: config::CatalogueConfig { baseline_path, store_path: dir.join("catalogue") },
            dataset: config::DatasetConfig { path: dir.join("dataset.jsonl") },
            training: config::TrainingConfig { max_epochs: 2, batch_size: 4, learning_rate: 0.01, early_stop_patience: 1 },
            reasoner: config::ReasonerConfig { max_steps: 4, convergence_epsilon: 0.01 },
            logging: config::LoggingConfig::default(),
            performance: config::PerformanceConfig::default(),
        }
    }

    fn door_entity() -> ifc::IfcEntity {
        let mut qto = std::collections::HashMap::new();
        qto.insert("ClearWidth".to_string(), model::PropertyValue::Number(950.0));
        let mut quantity_sets = std::collections::HashMap::new();
        quantity_sets.insert("Qto_DoorBaseQuantities".to_string(), qto);
        ifc::IfcEntity {
            guid: Some("guid-1".to_string()),
            ifc_class: "IfcDoor".to_string(),
            property_sets: std::collections::HashMap::new(),
            quantity_sets,
            attributes: std::collections::HashMap::new(),
            storey: Some("Level 1".to_string()),
            building: Some("Building A".to_string()),
        }
    }

    #[test]
    fn end_to_end_extract_then_evaluate() {
        let dir = tempdir().unwrap();
        let config = write_config(dir.path());
        let engine = Engine::from_config(config).unwrap();

        let source = FakeIfcSource { entities: vec![door_entity()] };
        let token = CancellationToken::new();
        let graph = engine.upload_and_extract(&source, "model.ifc", &token).unwrap();
        assert_eq!(graph.total_count(), 1);

        let verdicts = engine.evaluate(&graph, None, &token).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].status, VerdictStatus::Pass);
    }

    #[test]
    fn add_training_sample_round_trips_through_dataset() {
        let dir = tempdir().unwrap();
        let config = write_config(dir.path());
        let engine = Engine::from_config(config).unwrap();

        let source = FakeIfcSource { entities: vec![door_entity()] };
        let token = CancellationToken::new();
        let graph = engine.upload_and_extract(&source, "model.ifc", &token).unwrap();
        let verdicts = engine.evaluate(&graph, None, &token).unwrap();

        let (catalogue, _mapping) = engine.catalogue_ops().get_version(None).unwrap();
        let rule = catalogue.rules.get("ADA_DOOR_MIN_CLEAR_WIDTH").unwrap();

        let sample = engine.add_training_sample(&graph, rule, &verdicts[0]).unwrap();
        assert!(sample.is_some());
        assert_eq!(engine.dataset.len().unwrap(), 1);
    }

    #[test]
    fn catalogue_ops_exposes_baseline_as_current() {
        let dir = tempdir().unwrap();
        let config = write_config(dir.path());
        let engine = Engine::from_config(config).unwrap();
        let manifest = engine.catalogue_ops().list_versions().unwrap();
        assert_eq!(manifest.current_version, 0);
    }

    #[test]
    fn apply_and_save_advances_current_version_and_preserves_baseline() {
        let dir = tempdir().unwrap();
        let config = write_config(dir.path());
        let engine = Engine::from_config(config).unwrap();

        let new_version = engine
            .catalogue_ops()
            .apply_and_save(
                vec![catalogue::Modification::Remove { rule_id: "ADA_DOOR_MIN_CLEAR_WIDTH".to_string() }],
                "remove door clearance rule",
                "tester",
            )
            .unwrap();

        assert_eq!(new_version, 1);
        let (current, _mapping) = engine.catalogue_ops().get_version(None).unwrap();
        assert!(current.rules.is_empty());

        let (baseline, _mapping) = engine.catalogue_ops().get_version(Some(0)).unwrap();
        assert_eq!(baseline.rules.len(), 1, "v0 must remain untouched (CV1)");
    }
}
