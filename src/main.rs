//! # IFC Compliance CLI
//!
//! A local command-line host exercising the library end to end: extract an
//! IFC-entity dump into a graph, evaluate it against the catalogue, manage
//! catalogue versions, and train/run the recursive classifier. The real IFC
//! parser and the HTTP/viewer host are out of scope; entities are read from
//! a JSON dump in the shape the parser would otherwise hand us directly.

use std::fs;
use std::path::PathBuf;
use std::vec;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ifc_compliance::catalogue::EmptyMappingTemplate;
use ifc_compliance::concurrency::CancellationToken;
use ifc_compliance::ifc::{IfcEntity, IfcSource};
use ifc_compliance::{logging, Config, Engine};

#[derive(Parser)]
#[command(name = "ifc-compliance")]
#[command(about = "Extracts IFC models, evaluates compliance rules, and trains the recursive reasoner")]
#[command(version)]
struct Cli {
    /// Path to a config.toml to load instead of the default search path.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a JSON entity dump into a graph and print element counts.
    Extract {
        /// Path to a JSON array of entities (see `JsonIfcSource`).
        entities: PathBuf,
        /// Source-file label recorded on the graph.
        #[arg(long, default_value = "upload.ifc")]
        source_file: String,
        /// Write the resulting graph as JSON to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Extract then evaluate against a catalogue version.
    Evaluate {
        entities: PathBuf,
        #[arg(long, default_value = "upload.ifc")]
        source_file: String,
        /// Catalogue version to evaluate against; defaults to current.
        #[arg(long)]
        catalogue_version: Option<u64>,
        /// Also record each non-UNABLE verdict as a training sample.
        #[arg(long)]
        collect_samples: bool,
    },
    /// Catalogue version operations.
    Catalogue {
        #[command(subcommand)]
        action: CatalogueCommand,
    },
    /// Train the recursive classifier on the accumulated dataset.
    Train,
    /// Run inference for a feature vector against a trained model.
    Predict {
        /// Comma-separated feature values.
        features: String,
        #[arg(long)]
        model_version: Option<String>,
    },
    /// Model version operations.
    Model {
        #[command(subcommand)]
        action: ModelCommand,
    },
}

#[derive(Subcommand)]
enum CatalogueCommand {
    /// List all catalogue versions.
    List,
    /// Show one version's rules and mapping size.
    Show {
        #[arg(long)]
        version: Option<u64>,
    },
    /// Move the current pointer back to an earlier version.
    Rollback { target_version: u64 },
    /// Diff two catalogue versions.
    Compare { left: u64, right: u64 },
    /// Re-synchronize the current mapping against the current catalogue.
    Sync,
}

#[derive(Subcommand)]
enum ModelCommand {
    /// List all trained model versions.
    List,
    /// Show one version's metrics and history.
    Show { version_id: String },
    /// Flag a version as best.
    MarkBest { version_id: String },
    /// Compare metrics across versions.
    Compare { version_ids: Vec<String> },
}

/// A stand-in for the real IFC parser: reads entities out of a JSON array
/// on disk rather than an `.ifc` STEP file.
struct JsonIfcSource {
    entities: Vec<IfcEntity>,
}

impl JsonIfcSource {
    fn load(path: &PathBuf) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading entity dump at {}", path.display()))?;
        let entities: Vec<IfcEntity> = serde_json::from_str(&text).context("parsing entity dump as JSON")?;
        Ok(JsonIfcSource { entities })
    }
}

impl IfcSource for JsonIfcSource {
    type Entities = vec::IntoIter<IfcEntity>;

    fn entities_of_class(&self, ifc_class: &str) -> Self::Entities {
        self.entities.iter().filter(|e| e.ifc_class == ifc_class).cloned().collect::<Vec<_>>().into_iter()
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).with_context(|| format!("loading config from {path}")),
        None => Config::load().context("loading config from default search path"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    logging::init(&config.logging);

    let engine = Engine::from_config(config).context("building engine")?;
    let cancellation = CancellationToken::new();

    match cli.command {
        Commands::Extract { entities, source_file, out } => extract_command(&engine, &entities, &source_file, out.as_ref(), &cancellation),
        Commands::Evaluate { entities, source_file, catalogue_version, collect_samples } => {
            evaluate_command(&engine, &entities, &source_file, catalogue_version, collect_samples, &cancellation)
        }
        Commands::Catalogue { action } => catalogue_command(&engine, action),
        Commands::Train => train_command(&engine, &cancellation),
        Commands::Predict { features, model_version } => predict_command(&engine, &features, model_version.as_deref()),
        Commands::Model { action } => model_command(&engine, action),
    }
}

fn extract_command(engine: &Engine, entities_path: &PathBuf, source_file: &str, out: Option<&PathBuf>, cancellation: &CancellationToken) -> Result<()> {
    let source = JsonIfcSource::load(entities_path)?;
    let graph = engine.upload_and_extract(&source, source_file, cancellation).context("extraction failed")?;

    println!("extracted {} elements from {source_file}", graph.total_count());
    for ty in ifc_compliance::model::ElementType::ALL {
        let count = graph.elements_of(ty).len();
        if count > 0 {
            println!("  {}: {count}", ty.as_str());
        }
    }

    if let Some(out) = out {
        let json = serde_json::to_string_pretty(&graph).context("serializing graph")?;
        fs::write(out, json).with_context(|| format!("writing graph to {}", out.display()))?;
        println!("wrote graph to {}", out.display());
    }
    Ok(())
}

fn evaluate_command(
    engine: &Engine,
    entities_path: &PathBuf,
    source_file: &str,
    catalogue_version: Option<u64>,
    collect_samples: bool,
    cancellation: &CancellationToken,
) -> Result<()> {
    let source = JsonIfcSource::load(entities_path)?;
    let graph = engine.upload_and_extract(&source, source_file, cancellation).context("extraction failed")?;
    let verdicts = engine.evaluate(&graph, catalogue_version, cancellation).context("evaluation failed")?;

    let (catalogue, _mapping) = engine.catalogue_ops().get_version(catalogue_version).context("loading catalogue for sample collection")?;

    for verdict in &verdicts {
        println!("{} {} -> {:?}: {}", verdict.rule_id, verdict.element_id, verdict.status, verdict.explanation);
        if collect_samples {
            if let Some(rule) = catalogue.rules.get(&verdict.rule_id) {
                engine.add_training_sample(&graph, rule, verdict).context("recording training sample")?;
            }
        }
    }
    println!("{} verdicts", verdicts.len());
    Ok(())
}

fn catalogue_command(engine: &Engine, action: CatalogueCommand) -> Result<()> {
    let ops = engine.catalogue_ops();
    match action {
        CatalogueCommand::List => {
            let manifest = ops.list_versions().context("listing catalogue versions")?;
            println!("current version: v{}", manifest.current_version);
            for version in &manifest.versions {
                println!("  v{} — {} ({})", version.version_id, version.description, version.author);
            }
        }
        CatalogueCommand::Show { version } => {
            let (catalogue, mapping) = ops.get_version(version).context("loading catalogue version")?;
            println!("{} rules, {} mapping entries", catalogue.rules.len(), mapping.len());
            let mut ids: Vec<&String> = catalogue.rules.keys().collect();
            ids.sort();
            for id in ids {
                println!("  {id}");
            }
        }
        CatalogueCommand::Rollback { target_version } => {
            ops.rollback(target_version).context("rolling back catalogue")?;
            println!("current version is now v{target_version}");
        }
        CatalogueCommand::Compare { left, right } => {
            let diff = ops.compare(left, right).context("comparing catalogue versions")?;
            println!("added: {:?}", diff.added);
            println!("removed: {:?}", diff.removed);
            println!("modified: {:?}", diff.modified);
        }
        CatalogueCommand::Sync => {
            let report = ops.sync(&EmptyMappingTemplate).context("synchronizing catalogue mapping")?;
            println!(
                "catalogue_size={} mapping_size={} orphans_removed={} missing_templates={}",
                report.catalogue_size,
                report.mapping_size,
                report.orphans_removed,
                report.missing_templates.len()
            );
        }
    }
    Ok(())
}

fn train_command(engine: &Engine, cancellation: &CancellationToken) -> Result<()> {
    let outcome = engine.model_ops().train(cancellation).context("training failed")?;
    println!(
        "trained {} ({} epochs, best epoch {}, best val loss {:.4})",
        outcome.version_id, outcome.epochs_run, outcome.best_epoch, outcome.best_val_loss
    );
    Ok(())
}

fn predict_command(engine: &Engine, features: &str, model_version: Option<&str>) -> Result<()> {
    let features: Vec<f64> = features
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .context("parsing feature vector")?;
    let trace = engine.model_ops().predict(&features, model_version).context("prediction failed")?;
    println!("prediction={:.4} confidence={:.4} steps={}", trace.final_prediction, trace.final_confidence, trace.steps_taken);
    println!("{}", trace.reasoning);
    Ok(())
}

fn model_command(engine: &Engine, action: ModelCommand) -> Result<()> {
    let ops = engine.model_ops();
    match action {
        ModelCommand::List => {
            let versions = ops.list_versions(None).context("listing model versions")?;
            for version in versions {
                println!(
                    "{} best={} val_acc={:.4} test_acc={:.4}",
                    version.version_id, version.is_best, version.performance.best_val_accuracy, version.performance.test_accuracy
                );
            }
        }
        ModelCommand::Show { version_id } => {
            let version = ops.get_version(&version_id).context("loading model version")?;
            println!("{version_id}: {} epochs of history", version.history.len());
            for epoch in &version.history {
                println!("  epoch {} train_loss={:.4} val_loss={:.4} val_acc={:.4}", epoch.epoch, epoch.train_loss, epoch.val_loss, epoch.val_accuracy);
            }
        }
        ModelCommand::MarkBest { version_id } => {
            ops.mark_best(&version_id).context("marking version as best")?;
            println!("{version_id} marked as best");
        }
        ModelCommand::Compare { version_ids } => {
            let report = ops.compare(&version_ids).context("comparing model versions")?;
            for version in &report.versions {
                println!("{}: val_acc={:.4}", version.version_id, version.performance.best_val_accuracy);
            }
            if let Some(delta) = report.val_accuracy_delta() {
                println!("val_accuracy delta (first -> last): {delta:.4}");
            }
        }
    }
    Ok(())
}
