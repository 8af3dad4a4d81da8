//! Training dataset (C8): an append-only, deduplicated sample store with a
//! deterministic lazy 80/10/10 partition.
//!
//! Grounded on the teacher's WAL append pattern (one JSON record per line)
//! but without replay-from-WAL semantics: here the whole file *is* the
//! durable log, and a duplicate key is folded in place rather than
//! superseded by a later line, since DS2 requires the newer sample to
//! occupy the *same* position as the one it replaces. Writes are
//! copy-on-write-then-rename so a reader never observes a half-written
//! file.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

use super::sample::Sample;

/// Header summary persisted alongside the sample log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub total_count: usize,
    pub train_count: usize,
    pub val_count: usize,
    pub test_count: usize,
    pub source_files: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

/// A lazily-computed 80/10/10 partition over the ordered sample sequence.
pub struct Partition<'a> {
    pub train: &'a [Sample],
    pub val: &'a [Sample],
    pub test: &'a [Sample],
}

/// Append-only dataset store rooted at a single JSONL file.
pub struct Dataset {
    path: PathBuf,
}

impl Dataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Dataset { path: path.into() }
    }

    fn read_all(&self) -> CoreResult<Vec<Sample>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path).map_err(|e| CoreError::io(self.path.display().to_string(), e))?;
        let reader = BufReader::new(file);
        let mut samples = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| CoreError::io(self.path.display().to_string(), e))?;
            if line.trim().is_empty() {
                continue;
            }
            samples.push(serde_json::from_str(&line)?);
        }
        Ok(samples)
    }

    fn write_all_atomic(&self, samples: &[Sample]) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::io(parent.display().to_string(), e))?;
        }
        let tmp_path = tmp_path_for(&self.path);
        let mut body = String::new();
        for sample in samples {
            body.push_str(&serde_json::to_string(sample)?);
            body.push('\n');
        }
        fs::write(&tmp_path, body).map_err(|e| CoreError::io(tmp_path.display().to_string(), e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| CoreError::io(self.path.display().to_string(), e))?;
        Ok(())
    }

    /// `add_sample(dataset_path, sample)`: append-only and idempotent on
    /// (element id, rule id) — a later sample with the same key replaces
    /// the older entry in place, preserving its position in the ordered
    /// sequence that the partition slices.
    pub fn add_sample(&self, sample: Sample) -> CoreResult<()> {
        let mut samples = self.read_all()?;
        match samples.iter().position(|s| s.element_id == sample.element_id && s.rule_id == sample.rule_id) {
            Some(idx) => samples[idx] = sample,
            None => samples.push(sample),
        }
        self.write_all_atomic(&samples)
    }

    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn metadata(&self) -> CoreResult<DatasetMetadata> {
        let samples = self.read_all()?;
        let (train, val, test) = partition_counts(samples.len());
        let mut source_files: Vec<String> = samples.iter().map(|s| s.source_file.clone()).collect();
        source_files.sort();
        source_files.dedup();
        let last_updated = samples.iter().map(|s| s.timestamp).max().unwrap_or_else(Utc::now);
        Ok(DatasetMetadata { total_count: samples.len(), train_count: train, val_count: val, test_count: test, source_files, last_updated })
    }

    /// Load the whole ordered sample sequence and compute the deterministic
    /// 80/10/10 partition by integer-slicing.
    pub fn load_partitioned(&self) -> CoreResult<Vec<Sample>> {
        self.read_all()
    }
}

/// `train:val:test` counts for `n` samples using ⌊0.8·N⌋ / ⌊0.1·N⌋ /
/// remainder, matching the design's deterministic-by-index rule.
pub fn partition_counts(n: usize) -> (usize, usize, usize) {
    let train = (n as f64 * 0.8).floor() as usize;
    let val = (n as f64 * 0.1).floor() as usize;
    let test = n - train - val;
    (train, val, test)
}

pub fn partition(samples: &[Sample]) -> Partition<'_> {
    let (train, val, _test) = partition_counts(samples.len());
    let (train_slice, rest) = samples.split_at(train.min(samples.len()));
    let (val_slice, test_slice) = rest.split_at(val.min(rest.len()));
    Partition { train: train_slice, val: val_slice, test: test_slice }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(element_id: &str, rule_id: &str, label: u8) -> Sample {
        Sample {
            element_id: element_id.to_string(),
            features: vec![0.0; super::super::sample::FEATURE_DIM],
            label,
            rule_id: rule_id.to_string(),
            source_file: "model.ifc".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn appends_new_samples_in_order() {
        let dir = tempdir().unwrap();
        let dataset = Dataset::new(dir.path().join("dataset.jsonl"));
        dataset.add_sample(sample("e1", "r1", 1)).unwrap();
        dataset.add_sample(sample("e2", "r1", 0)).unwrap();
        let samples = dataset.load_partitioned().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].element_id, "e1");
        assert_eq!(samples[1].element_id, "e2");
    }

    #[test]
    fn duplicate_key_replaces_in_place_preserving_position() {
        let dir = tempdir().unwrap();
        let dataset = Dataset::new(dir.path().join("dataset.jsonl"));
        dataset.add_sample(sample("e1", "r1", 1)).unwrap();
        dataset.add_sample(sample("e2", "r1", 0)).unwrap();
        dataset.add_sample(sample("e1", "r1", 0)).unwrap();

        let samples = dataset.load_partitioned().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].element_id, "e1");
        assert_eq!(samples[0].label, 0, "later sample with same key must replace the older one");
    }

    #[test]
    fn partition_counts_are_deterministic_by_index() {
        assert_eq!(partition_counts(100), (80, 10, 10));
        assert_eq!(partition_counts(10), (8, 1, 1));
        assert_eq!(partition_counts(0), (0, 0, 0));
    }

    #[test]
    fn metadata_tracks_source_files_and_counts() {
        let dir = tempdir().unwrap();
        let dataset = Dataset::new(dir.path().join("dataset.jsonl"));
        dataset.add_sample(sample("e1", "r1", 1)).unwrap();
        let metadata = dataset.metadata().unwrap();
        assert_eq!(metadata.total_count, 1);
        assert_eq!(metadata.source_files, vec!["model.ifc".to_string()]);
    }
}
