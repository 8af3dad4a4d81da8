//! Model Registry (C11): persistent store of trained model versions, their
//! per-epoch training history, lineage, and best-version tracking.
//!
//! Storage mirrors the catalogue version store's manifest pattern (§6 "model
//! store"): one `registry.json` at the root naming every version, written
//! atomically via a temp-file-then-rename so readers never see a partial
//! file.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfigRecord {
    pub max_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub refinement_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    pub best_val_accuracy: f64,
    pub best_val_loss: f64,
    pub best_epoch: usize,
    pub test_loss: f64,
    pub test_accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub train_size: usize,
    pub val_size: usize,
    pub test_size: usize,
}

/// One epoch's training-history record, appended by the trainer as it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

/// One registered model version and its full training history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub training_config: TrainingConfigRecord,
    pub performance: PerformanceMetrics,
    pub dataset_stats: DatasetStats,
    pub duration_secs: f64,
    pub checkpoint_path: PathBuf,
    pub parent_version_id: Option<String>,
    pub is_best: bool,
    pub description: String,
    /// Epoch-ordered training history (§5: "training history within a
    /// model version is strictly epoch-ordered").
    pub history: Vec<EpochRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RegistryFile {
    versions: Vec<VersionRecord>,
}

/// A metric/config comparison over a set of versions, newest-intent first
/// as the caller ordered them.
#[derive(Debug, Clone)]
pub struct ComparisonReport {
    pub versions: Vec<VersionRecord>,
}

impl ComparisonReport {
    /// Validation-accuracy delta between the first and last entry in the
    /// comparison set, as requested by the caller's ordering.
    pub fn val_accuracy_delta(&self) -> Option<f64> {
        let (first, last) = (self.versions.first()?, self.versions.last()?);
        Some(last.performance.best_val_accuracy - first.performance.best_val_accuracy)
    }
}

/// Single-writer, many-reader persistent store over model versions, rooted
/// at a directory. Mirrors the catalogue store's manifest-replacement
/// discipline (§5 "model checkpoints: ... the registry is updated only
/// after the file is closed").
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ModelRegistry { root: root.into() }
    }

    fn registry_path(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    fn read(&self) -> CoreResult<RegistryFile> {
        let path = self.registry_path();
        if !path.exists() {
            return Ok(RegistryFile::default());
        }
        let text = fs::read_to_string(&path).map_err(|e| CoreError::io(path.display().to_string(), e))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write_atomic(&self, file: &RegistryFile) -> CoreResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| CoreError::io(self.root.display().to_string(), e))?;
        let tmp = self.root.join("registry.json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(file)?).map_err(|e| CoreError::io(tmp.display().to_string(), e))?;
        fs::rename(&tmp, self.registry_path()).map_err(|e| CoreError::io(self.registry_path().display().to_string(), e))?;
        Ok(())
    }

    /// `register(...) -> version_id`. Assigns the next monotonically
    /// increasing version id ("v1", "v2", ...).
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &self,
        checkpoint_path: PathBuf,
        training_config: TrainingConfigRecord,
        performance: PerformanceMetrics,
        dataset_stats: DatasetStats,
        duration: Duration,
        description: &str,
        parent_version_id: Option<String>,
    ) -> CoreResult<String> {
        let mut file = self.read()?;
        let next = file.versions.iter().filter_map(|v| v.version_id.strip_prefix('v')?.parse::<u64>().ok()).max().map_or(1, |m| m + 1);
        let version_id = format!("v{next}");
        file.versions.push(VersionRecord {
            version_id: version_id.clone(),
            created_at: Utc::now(),
            training_config,
            performance,
            dataset_stats,
            duration_secs: duration.as_secs_f64(),
            checkpoint_path,
            parent_version_id,
            is_best: false,
            description: description.to_string(),
            history: Vec::new(),
        });
        self.write_atomic(&file)?;
        Ok(version_id)
    }

    /// `list(limit?) -> VersionRecord[]`, newest first.
    pub fn list(&self, limit: Option<usize>) -> CoreResult<Vec<VersionRecord>> {
        let mut versions = self.read()?.versions;
        versions.reverse();
        if let Some(limit) = limit {
            versions.truncate(limit);
        }
        Ok(versions)
    }

    pub fn get(&self, version_id: &str) -> CoreResult<VersionRecord> {
        self.read()?
            .versions
            .into_iter()
            .find(|v| v.version_id == version_id)
            .ok_or_else(|| CoreError::not_found("model version", version_id.to_string()))
    }

    /// Replace a version's record in place, preserving its position and
    /// history. Used by the trainer to fold in final metrics and the
    /// checkpoint path once a run completes.
    pub fn replace(&self, record: VersionRecord) -> CoreResult<()> {
        let mut file = self.read()?;
        let Some(slot) = file.versions.iter_mut().find(|v| v.version_id == record.version_id) else {
            return Err(CoreError::not_found("model version", record.version_id.clone()));
        };
        *slot = record;
        self.write_atomic(&file)
    }

    /// Called once per epoch by the trainer; history is strictly
    /// epoch-ordered by construction (the trainer appends in order).
    pub fn append_history(&self, version_id: &str, record: EpochRecord) -> CoreResult<()> {
        let mut file = self.read()?;
        let Some(version) = file.versions.iter_mut().find(|v| v.version_id == version_id) else {
            return Err(CoreError::not_found("model version", version_id.to_string()));
        };
        version.history.push(record);
        self.write_atomic(&file)
    }

    /// Walk parent links from `version_id` to the root, inclusive.
    pub fn lineage(&self, version_id: &str) -> CoreResult<Vec<String>> {
        let file = self.read()?;
        let mut chain = Vec::new();
        let mut current = Some(version_id.to_string());
        while let Some(id) = current {
            let Some(version) = file.versions.iter().find(|v| v.version_id == id) else { break };
            chain.push(version.version_id.clone());
            current = version.parent_version_id.clone();
        }
        Ok(chain)
    }

    /// `mark_best(version_id)`: idempotent and transactional w.r.t. the
    /// flag — sets `is_best` on this version and clears it everywhere else
    /// in the same write (MR1: at most one version has `is_best = true`).
    pub fn mark_best(&self, version_id: &str) -> CoreResult<()> {
        let mut file = self.read()?;
        if !file.versions.iter().any(|v| v.version_id == version_id) {
            return Err(CoreError::not_found("model version", version_id.to_string()));
        }
        for version in &mut file.versions {
            version.is_best = version.version_id == version_id;
        }
        self.write_atomic(&file)
    }

    pub fn best_version(&self) -> CoreResult<Option<VersionRecord>> {
        Ok(self.read()?.versions.into_iter().find(|v| v.is_best))
    }

    pub fn compare(&self, version_ids: &[String]) -> CoreResult<ComparisonReport> {
        let file = self.read()?;
        let mut entries = Vec::with_capacity(version_ids.len());
        for id in version_ids {
            let version = file
                .versions
                .iter()
                .find(|v| &v.version_id == id)
                .ok_or_else(|| CoreError::not_found("model version", id.clone()))?;
            entries.push(version.clone());
        }
        Ok(ComparisonReport { versions: entries })
    }

    /// `delete(version_id)`: rejected if any other version lists it as a
    /// parent, which would otherwise dangle a lineage link.
    pub fn delete(&self, version_id: &str) -> CoreResult<()> {
        let mut file = self.read()?;
        if file.versions.iter().any(|v| v.parent_version_id.as_deref() == Some(version_id)) {
            return Err(CoreError::invariant("model-lineage", format!("version '{version_id}' is a parent of another version")));
        }
        let before = file.versions.len();
        file.versions.retain(|v| v.version_id != version_id);
        if file.versions.len() == before {
            return Err(CoreError::not_found("model version", version_id.to_string()));
        }
        self.write_atomic(&file)
    }
}
