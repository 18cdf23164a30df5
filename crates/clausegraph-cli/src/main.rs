use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use clausegraph_ai::ml::{
    ClassifierWeights, GraphClassifier, GraphPredictor, GraphTrainer, ModelHandle, TrainingOptions,
};
use clausegraph_ai::{ClassificationRequest, HybridClassifier, HybridOptions, LLMProviderFactory};
use clausegraph_core::{ClauseGraphConfig, ConfigManager, EmbeddingConfig, Label, NodeId, RiskLevel};
use clausegraph_graph::{ContractDocument, DatasetBuilder, TrainingGraphStore};
use clausegraph_vector::{
    CachedEmbeddingProvider, EmbeddingProvider, OllamaEmbeddingConfig, OllamaEmbeddingProvider,
    OpenAiCompatibleEmbeddingConfig, OpenAiCompatibleEmbeddingProvider,
};
use colored::Colorize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "clausegraph")]
#[command(about = "ClauseGraph - contract clause risk classification", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Configuration file (defaults to ./.clausegraph.toml, then ~/.clausegraph/config.toml)
    #[arg(short, long, global = true, env = "CLAUSEGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed extracted contracts and write a fresh, unlabeled training graph
    BuildDataset {
        /// Directory of contract JSON files ({"clauses": [{"clause_index", "text"}]})
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Label management
    #[command(subcommand)]
    Labels(LabelCommands),

    /// Train the graph classifier and persist its weights
    Train,

    /// Score a clause with the graph classifier only
    Predict {
        /// Clause text
        text: String,
    },

    /// Classify a clause, escalating to the generative validator when confidence is low
    Classify {
        /// Clause text
        text: String,

        /// Confidence threshold for this request
        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// Classify every clause of one extracted contract
    ClassifyDocument {
        /// Contract JSON file
        file: PathBuf,

        /// Confidence threshold for every clause
        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Destination path
        #[arg(default_value = ".clausegraph.toml")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum LabelCommands {
    /// Set the label of one node (LOW, MEDIUM, HIGH, 0-2, or -1/UNLABELED)
    Set {
        node_id: NodeId,
        #[arg(allow_hyphen_values = true)]
        label: String,
    },

    /// Realign the label table with the node table
    Reconcile,

    /// Show labeled and unlabeled node counts
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { path } = &cli.command {
        ConfigManager::create_default_config(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{} {}", "Wrote".green().bold(), path.display());
        return Ok(());
    }

    let manager = match &cli.config {
        Some(path) => ConfigManager::load_from(path),
        None => ConfigManager::load(),
    }
    .context("Failed to load configuration")?;
    let config = manager.into_config();
    init_tracing(&config);

    match execute_command(&cli, &config).await {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr so command output on stdout stays machine readable.
fn init_tracing(config: &ClauseGraphConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.logging.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn execute_command(cli: &Cli, config: &ClauseGraphConfig) -> Result<serde_json::Value> {
    let store = TrainingGraphStore::new(&config.graph.data_dir);
    match &cli.command {
        Commands::BuildDataset { input } => build_dataset(config, &store, input).await,
        Commands::Labels(cmd) => execute_label_command(cmd, &store),
        Commands::Train => train(config, &store),
        Commands::Predict { text } => {
            let classifier = graph_classifier(config, &store)?;
            let prediction = classifier.predict(text).await?;
            Ok(serde_json::to_value(prediction)?)
        }
        Commands::Classify { text, threshold } => {
            let classifier = hybrid_classifier(config, &store)?;
            let mut request = ClassificationRequest::new(text.as_str());
            request.threshold = *threshold;
            Ok(serde_json::to_value(classifier.classify(&request).await)?)
        }
        Commands::ClassifyDocument { file, threshold } => {
            classify_document(config, &store, file, *threshold).await
        }
        Commands::InitConfig { .. } => Err(anyhow!("init-config is handled before loading")),
    }
}

async fn build_dataset(
    config: &ClauseGraphConfig,
    store: &TrainingGraphStore,
    input: &Path,
) -> Result<serde_json::Value> {
    let documents = ContractDocument::load_dir(input)
        .with_context(|| format!("Failed to read contracts from {}", input.display()))?;
    if documents.is_empty() {
        bail!("No contract JSON files found in {}", input.display());
    }

    let embedder = embedding_provider(&config.embedding)?;
    let graph = DatasetBuilder::new(embedder).build(&documents).await?;
    store.save(&graph)?;

    Ok(json!({
        "documents": documents.len(),
        "nodes": graph.node_count(),
        "edges": graph.edge_count(),
        "dimension": graph.dimension(),
        "data_dir": store.root().display().to_string(),
    }))
}

fn execute_label_command(
    cmd: &LabelCommands,
    store: &TrainingGraphStore,
) -> Result<serde_json::Value> {
    match cmd {
        LabelCommands::Set { node_id, label } => {
            let label = parse_label(label)?;
            let previous = store.relabel(*node_id, label)?;
            Ok(json!({
                "node_id": node_id,
                "previous": i64::from(previous),
                "label": i64::from(label),
            }))
        }
        LabelCommands::Reconcile => {
            let report = store.reconcile_labels()?;
            Ok(json!({
                "preserved": report.preserved,
                "filled": report.filled,
                "dropped": report.dropped,
            }))
        }
        LabelCommands::Summary => {
            let graph = store.load()?;
            let summary = graph.label_summary();
            let classes: serde_json::Map<String, serde_json::Value> = summary
                .class_counts
                .iter()
                .map(|(level, count)| (level.to_string(), json!(count)))
                .collect();
            Ok(json!({
                "nodes": graph.node_count(),
                "labeled": summary.labeled,
                "unlabeled": summary.unlabeled,
                "class_counts": classes,
            }))
        }
    }
}

fn parse_label(value: &str) -> Result<Label> {
    let trimmed = value.trim();
    if trimmed == "-1" || trimmed.eq_ignore_ascii_case("unlabeled") {
        return Ok(Label::Unlabeled);
    }
    RiskLevel::from_loose(trimmed)
        .map(Label::Risk)
        .ok_or_else(|| anyhow!("Unknown label '{}': use LOW, MEDIUM, HIGH, 0-2 or -1", value))
}

fn train(config: &ClauseGraphConfig, store: &TrainingGraphStore) -> Result<serde_json::Value> {
    let graph = store
        .load()
        .context("Failed to load the training graph; run build-dataset and label some clauses")?;
    let trained = GraphTrainer::new(TrainingOptions::from(&config.training)).train(&graph)?;

    let weights_path = config.weights_path();
    let weights =
        ClassifierWeights::from_model(&trained.model, Some(trained.report.metrics.clone()));
    weights.save(&weights_path)?;

    Ok(json!({
        "model_id": weights.model_id.to_string(),
        "weights": weights_path.display().to_string(),
        "report": trained.report,
    }))
}

async fn classify_document(
    config: &ClauseGraphConfig,
    store: &TrainingGraphStore,
    file: &Path,
    threshold: Option<f32>,
) -> Result<serde_json::Value> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let document: ContractDocument = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a contract JSON file", file.display()))?;

    let requests: Vec<ClassificationRequest> = document
        .clauses
        .iter()
        .filter(|clause| !clause.text.trim().is_empty())
        .map(|clause| {
            let mut request = ClassificationRequest::new(clause.text.as_str());
            request.threshold = threshold;
            request
        })
        .collect();

    let classifier = hybrid_classifier(config, store)?;
    let responses = classifier.classify_batch(&requests).await;

    let clauses: Vec<serde_json::Value> = document
        .clauses
        .iter()
        .filter(|clause| !clause.text.trim().is_empty())
        .zip(responses)
        .map(|(clause, response)| {
            json!({
                "clause_index": clause.clause_index,
                "text": clause.text,
                "result": response,
            })
        })
        .collect();

    Ok(json!({
        "document": file.display().to_string(),
        "clauses": clauses,
    }))
}

fn embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let inner: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "ollama" => Arc::new(OllamaEmbeddingProvider::new(OllamaEmbeddingConfig::from(
            config,
        ))),
        "openai-compatible" => Arc::new(OpenAiCompatibleEmbeddingProvider::new(
            OpenAiCompatibleEmbeddingConfig::from(config),
        )?),
        other => bail!("Unsupported embedding provider: {}", other),
    };

    let mut cached = CachedEmbeddingProvider::new(inner, config.cache_capacity);
    if let Some(dir) = &config.cache_dir {
        cached = cached.with_disk_cache(dir);
    }
    Ok(Arc::new(cached))
}

fn graph_classifier(
    config: &ClauseGraphConfig,
    store: &TrainingGraphStore,
) -> Result<GraphClassifier> {
    let weights_path = config.weights_path();
    let handle = ModelHandle::load(store, &weights_path).with_context(|| {
        format!(
            "Failed to load the classifier from {}; run train first",
            weights_path.display()
        )
    })?;

    Ok(
        GraphClassifier::new(embedding_provider(&config.embedding)?, Arc::new(handle))
            .with_k_neighbors(config.graph.k_neighbors)
            .with_embed_timeout(Duration::from_secs(config.embedding.timeout_secs)),
    )
}

fn hybrid_classifier(
    config: &ClauseGraphConfig,
    store: &TrainingGraphStore,
) -> Result<HybridClassifier> {
    let predictor = Arc::new(graph_classifier(config, store)?);
    let validator = LLMProviderFactory::create_from_config(&config.llm)?;
    Ok(HybridClassifier::new(
        predictor,
        validator,
        HybridOptions::from(config),
    ))
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value, 0);
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        println!("{}{}:", pad, key_colored);
                        print_pretty(val, indent + 1);
                    }
                    other => println!("{}{}: {}", pad, key_colored, scalar(other)),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                match item {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        println!("{}{}", pad, format!("[{}]", i).dimmed());
                        print_pretty(item, indent + 1);
                    }
                    other => println!("{}- {}", pad, scalar(other)),
                }
            }
        }
        other => println!("{}{}", pad, scalar(other)),
    }
}

fn scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.green().to_string(),
        serde_json::Value::Number(n) => n.to_string().yellow().to_string(),
        serde_json::Value::Bool(b) => b.to_string().magenta().to_string(),
        serde_json::Value::Null => "null".dimmed().to_string(),
        other => other.to_string(),
    }
}
