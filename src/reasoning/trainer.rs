//! Trainer (C10): mini-batch AdamW training loop over the recursive
//! classifier, with deep supervision, EMA weights, early stopping, and
//! checkpoint/registry bookkeeping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::concurrency::CancellationToken;
use crate::config::{ReasonerConfig, TrainingConfig};
use crate::error::{CoreError, CoreResult};

use super::classifier::{sigmoid, AdamState, ClassifierWeights, StepGrad};
use super::dataset::{partition, Dataset};
use super::registry::{DatasetStats, EpochRecord, ModelRegistry, PerformanceMetrics, TrainingConfigRecord, VersionRecord};
use super::sample::Sample;

const MIN_TRAINING_SAMPLES: usize = 10;

/// Minimum improvement in validation loss that resets the early-stopping
/// patience counter.
const MIN_DELTA: f64 = 1e-4;

/// The steps at which deep supervision applies a loss term, as fractions of
/// the refinement budget: first step, quarter, half, and the last step.
fn supervised_steps(max_steps: usize) -> Vec<usize> {
    let mut steps = vec![1, (max_steps / 4).max(1), (max_steps / 2).max(1), max_steps];
    steps.sort_unstable();
    steps.dedup();
    steps
}

/// Outcome of a completed training run: the registered version id and the
/// epoch at which the best validation loss was observed.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub version_id: String,
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub epochs_run: usize,
}

/// `train(dataset_path, model_store_path, config) -> version_id`.
///
/// Skips training (returning an error rather than panicking) when the
/// dataset holds fewer than [`MIN_TRAINING_SAMPLES`] samples — a classifier
/// trained on a handful of samples would overfit to noise, and the spec's
/// sample builder already warns at this threshold.
pub fn train(
    dataset: &Dataset,
    model_store_root: impl AsRef<Path>,
    training_config: &TrainingConfig,
    reasoner_config: &ReasonerConfig,
    parent_version_id: Option<String>,
    cancellation: &CancellationToken,
) -> CoreResult<TrainingOutcome> {
    let samples = dataset.load_partitioned()?;
    if samples.len() < MIN_TRAINING_SAMPLES {
        return Err(CoreError::invariant(
            "min-training-samples",
            format!("dataset has {} samples, need at least {MIN_TRAINING_SAMPLES}", samples.len()),
        ));
    }

    let split = partition(&samples);
    let (train_samples, val_samples, test_samples) = (split.train.to_vec(), split.val.to_vec(), split.test.to_vec());
    if train_samples.is_empty() || val_samples.is_empty() {
        return Err(CoreError::invariant("min-training-samples", "train/val partitions must both be non-empty"));
    }

    let model_store_root = model_store_root.as_ref().to_path_buf();
    let registry = ModelRegistry::new(&model_store_root);
    let input_dim = train_samples[0].features.len();

    let mut live_weights = ClassifierWeights::init_with_dims(input_dim, super::classifier::HIDDEN_DIM, seed_from_config(training_config));
    let mut ema_weights = live_weights.clone();
    let mut adam = AdamState::new(&live_weights);

    let supervised = supervised_steps(reasoner_config.max_steps);
    let mut rng = StdRng::seed_from_u64(seed_from_config(training_config));

    let mut best_val_loss = f64::INFINITY;
    let mut best_epoch = 0;
    let mut patience_remaining = training_config.early_stop_patience;
    let mut best_weights = ema_weights.clone();
    let started_at = Instant::now();
    let mut epochs_run = 0;

    let placeholder_version_id = registry.register(
        model_store_root.join("pending.bin"),
        TrainingConfigRecord {
            max_epochs: training_config.max_epochs,
            batch_size: training_config.batch_size,
            learning_rate: training_config.learning_rate,
            refinement_steps: reasoner_config.max_steps,
        },
        PerformanceMetrics::default(),
        DatasetStats { train_size: train_samples.len(), val_size: val_samples.len(), test_size: test_samples.len() },
        std::time::Duration::from_secs(0),
        "in progress",
        parent_version_id.clone(),
    )?;

    info!(version_id = %placeholder_version_id, train = train_samples.len(), val = val_samples.len(), "training started");

    for epoch in 1..=training_config.max_epochs {
        cancellation.check("train")?;
        epochs_run = epoch;

        let mut order: Vec<usize> = (0..train_samples.len()).collect();
        order.shuffle(&mut rng);

        let mut epoch_loss = 0.0;
        let mut batches = 0usize;
        for batch_indices in order.chunks(training_config.batch_size.max(1)) {
            cancellation.check("train-batch")?;
            let mut grads = super::classifier::ClassifierGradients::zeros_like(&live_weights);
            let mut batch_loss = 0.0;

            for &idx in batch_indices {
                let sample = &train_samples[idx];
                let caches = live_weights.forward_cached(&sample.features, reasoner_config.max_steps);
                let mut step_grads = HashMap::new();
                for &step in &supervised {
                    let cache = &caches[step - 1];
                    let predicted = sigmoid(cache.logit);
                    let label = sample.label as f64;
                    batch_loss += binary_cross_entropy(predicted, label);
                    step_grads.insert(step, StepGrad { dlogit: predicted - label, dconf: 0.0 });
                }
                let sample_grads = live_weights.backward(&caches, &step_grads);
                grads.add_assign(&sample_grads);
            }

            let scale = 1.0 / (batch_indices.len() as f64 * supervised.len() as f64);
            grads.scale(scale);
            live_weights.apply_adam(&grads, &mut adam, training_config.learning_rate, 1e-4);
            ema_weights.ema_update(&live_weights, 0.999);

            epoch_loss += batch_loss * scale;
            batches += 1;
        }
        let train_loss = epoch_loss / batches.max(1) as f64;

        let (val_loss, val_accuracy) = evaluate_split(&ema_weights, &val_samples, reasoner_config, &supervised);
        info!(epoch, train_loss, val_loss, val_accuracy, "epoch complete");

        registry.append_history(
            &placeholder_version_id,
            EpochRecord { epoch, train_loss, val_loss, val_accuracy, timestamp: chrono::Utc::now() },
        )?;

        if best_val_loss - val_loss > MIN_DELTA {
            best_val_loss = val_loss;
            best_epoch = epoch;
            best_weights = ema_weights.clone();
            patience_remaining = training_config.early_stop_patience;
        } else {
            if patience_remaining == 0 {
                warn!(epoch, "early stopping: validation loss has not improved");
                break;
            }
            patience_remaining -= 1;
        }
    }

    let (test_loss, test_accuracy) = evaluate_split(&best_weights, &test_samples, reasoner_config, &supervised);

    let checkpoint_path = model_store_root.join(format!("{placeholder_version_id}.bin"));
    write_checkpoint(&checkpoint_path, &best_weights)?;

    // Re-register with final metrics and checkpoint path: `register` only
    // assigns an id and stores placeholders, so the completed run's
    // metrics are folded in via a second pass over the manifest.
    finalize_registration(
        &registry,
        &placeholder_version_id,
        checkpoint_path,
        PerformanceMetrics { best_val_accuracy: val_accuracy_at(&best_weights, &val_samples, reasoner_config, &supervised), best_val_loss, best_epoch, test_loss, test_accuracy },
        started_at.elapsed(),
    )?;

    Ok(TrainingOutcome { version_id: placeholder_version_id, best_epoch, best_val_loss, epochs_run })
}

fn val_accuracy_at(weights: &ClassifierWeights, samples: &[Sample], reasoner_config: &ReasonerConfig, supervised: &[usize]) -> f64 {
    evaluate_split(weights, samples, reasoner_config, supervised).1
}

fn evaluate_split(weights: &ClassifierWeights, samples: &[Sample], reasoner_config: &ReasonerConfig, supervised: &[usize]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut total_loss = 0.0;
    let mut correct = 0usize;
    for sample in samples {
        let caches = weights.forward_cached(&sample.features, reasoner_config.max_steps);
        let final_cache = caches.last().expect("forward_cached always produces at least one step");
        let predicted = sigmoid(final_cache.logit);
        let label = sample.label as f64;
        total_loss += binary_cross_entropy(predicted, label);
        if (predicted >= 0.5) == (sample.label == 1) {
            correct += 1;
        }
        let _ = supervised;
    }
    (total_loss / samples.len() as f64, correct as f64 / samples.len() as f64)
}

fn binary_cross_entropy(predicted: f64, label: f64) -> f64 {
    let p = predicted.clamp(1e-7, 1.0 - 1e-7);
    -(label * p.ln() + (1.0 - label) * (1.0 - p).ln())
}

fn seed_from_config(config: &TrainingConfig) -> u64 {
    // Deterministic but config-dependent seed, so two identical configs
    // produce identical initial weights and shuffles.
    config.max_epochs as u64 ^ (config.batch_size as u64) << 16 ^ config.learning_rate.to_bits()
}

fn write_checkpoint(path: &Path, weights: &ClassifierWeights) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CoreError::io(parent.display().to_string(), e))?;
    }
    let tmp = checkpoint_tmp_path(path);
    let encoded = bincode::serialize(weights)?;
    std::fs::write(&tmp, encoded).map_err(|e| CoreError::io(tmp.display().to_string(), e))?;
    std::fs::rename(&tmp, path).map_err(|e| CoreError::io(path.display().to_string(), e))?;
    Ok(())
}

fn checkpoint_tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

pub fn load_checkpoint(path: &Path) -> CoreResult<ClassifierWeights> {
    let bytes = std::fs::read(path).map_err(|e| CoreError::io(path.display().to_string(), e))?;
    Ok(bincode::deserialize(&bytes)?)
}

fn finalize_registration(
    registry: &ModelRegistry,
    version_id: &str,
    checkpoint_path: PathBuf,
    performance: PerformanceMetrics,
    duration: std::time::Duration,
) -> CoreResult<()> {
    // The registry has no direct "update" primitive beyond history append
    // and mark_best, so the final metrics/checkpoint path are recorded by
    // replacing the version's placeholder record in place.
    let mut record: VersionRecord = registry.get(version_id)?;
    record.checkpoint_path = checkpoint_path;
    record.performance = performance;
    record.duration_secs = duration.as_secs_f64();
    registry.replace(record)
}
