//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (`IFCC_*` prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [extraction]
//! config_path = "./extraction.toml"
//!
//! [catalogue]
//! baseline_path = "./catalogue/baseline.json"
//! store_path = "/var/lib/ifc-compliance/catalogue"
//!
//! [dataset]
//! path = "/var/lib/ifc-compliance/dataset.jsonl"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! IFCC_CATALOGUE__STORE_PATH=/custom/path
//! IFCC_TRAINING__MAX_EPOCHS=20
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct — one field group per component family named
/// in the configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub extraction: ExtractionConfig,
    pub catalogue: CatalogueConfig,
    pub dataset: DatasetConfig,
    pub training: TrainingConfig,
    pub reasoner: ReasonerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

/// Extraction layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Path to the extraction-rules document (C1).
    pub config_path: PathBuf,
}

/// Catalogue store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueConfig {
    /// Path to the seed regulatory catalogue (ingested as version 0).
    pub baseline_path: PathBuf,
    /// Root of the version store.
    pub store_path: PathBuf,
}

/// Training dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Path to the append-only sample file.
    pub path: PathBuf,
}

/// Trainer configuration (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_early_stop_patience")]
    pub early_stop_patience: usize,
}

/// Recursive classifier configuration (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_convergence_epsilon")]
    pub convergence_epsilon: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Performance tuning options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Worker threads for rayon-parallel evaluation/training. 0 = all cores.
    #[serde(default)]
    pub num_threads: usize,
    /// Initial capacity hint for in-memory collections.
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

fn default_max_epochs() -> usize { 50 }
fn default_batch_size() -> usize { 32 }
fn default_learning_rate() -> f64 { 1e-3 }
fn default_early_stop_patience() -> usize { 5 }
fn default_max_steps() -> usize { 16 }
fn default_convergence_epsilon() -> f64 { 0.01 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_initial_capacity() -> usize { 1024 }

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (`IFCC_*` prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("IFCC_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("IFCC_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            extraction: ExtractionConfig { config_path: PathBuf::from("./extraction.toml") },
            catalogue: CatalogueConfig {
                baseline_path: PathBuf::from("./catalogue/baseline.json"),
                store_path: PathBuf::from("./data/catalogue"),
            },
            dataset: DatasetConfig { path: PathBuf::from("./data/dataset.jsonl") },
            training: TrainingConfig {
                max_epochs: default_max_epochs(),
                batch_size: default_batch_size(),
                learning_rate: default_learning_rate(),
                early_stop_patience: default_early_stop_patience(),
            },
            reasoner: ReasonerConfig {
                max_steps: default_max_steps(),
                convergence_epsilon: default_convergence_epsilon(),
            },
            logging: LoggingConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        PerformanceConfig { num_threads: 0, initial_capacity: default_initial_capacity() }
    }
}
