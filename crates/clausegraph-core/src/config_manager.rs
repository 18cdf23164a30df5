use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for ClauseGraph
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClauseGraphConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generative validator used when the graph classifier is unsure
    #[serde(default)]
    pub llm: LLMConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub training: TrainingConfig,

    #[serde(default)]
    pub hybrid: HybridConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: "ollama" or "openai-compatible"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Base URL including the version prefix, e.g. "http://localhost:1234/v1"
    #[serde(default = "default_openai_compatible_url")]
    pub openai_compatible_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Must match the dimension of the stored training graph
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// In-memory cache entries; 0 disables caching
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            ollama_url: default_ollama_url(),
            openai_compatible_url: default_openai_compatible_url(),
            api_key: None,
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout_secs(),
            cache_capacity: default_cache_capacity(),
            cache_dir: None,
        }
    }
}

/// LLM configuration for the generative validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider: "ollama" or "openai-compatible"
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_openai_compatible_url")]
    pub openai_compatible_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            ollama_url: default_ollama_url(),
            openai_compatible_url: default_openai_compatible_url(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Training graph location and attachment policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Similarity edges attached to a query node
    #[serde(default = "default_k_neighbors")]
    pub k_neighbors: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            k_neighbors: default_k_neighbors(),
        }
    }
}

/// Hyperparameters for the message-passing classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,

    #[serde(default = "default_epochs")]
    pub epochs: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    /// Share of each labeled class held out for evaluation
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f32,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Weights artifact file name inside `graph.data_dir`
    #[serde(default = "default_weights_file")]
    pub weights_file: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            hidden_dim: default_hidden_dim(),
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            test_ratio: default_test_ratio(),
            seed: default_seed(),
            weights_file: default_weights_file(),
        }
    }
}

/// Confidence gate between the graph classifier and the generative validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Concurrent classifications when a whole document is processed
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ClauseGraphConfig {
    pub fn weights_path(&self) -> PathBuf {
        self.graph.data_dir.join(&self.training.weights_file)
    }
}

// Default value functions
fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_openai_compatible_url() -> String {
    "http://localhost:1234/v1".to_string()
}
fn default_embedding_dimension() -> usize {
    384
} // all-MiniLM-L6-v2
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_cache_capacity() -> usize {
    4096
}
fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> usize {
    1024
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data/gnn")
}
fn default_k_neighbors() -> usize {
    3
}
fn default_hidden_dim() -> usize {
    64
}
fn default_epochs() -> usize {
    40
}
fn default_learning_rate() -> f32 {
    0.005
}
fn default_test_ratio() -> f32 {
    0.25
}
fn default_seed() -> u64 {
    42
}
fn default_weights_file() -> String {
    "gnn_model.json".to_string()
}
fn default_confidence_threshold() -> f32 {
    0.60
}
fn default_max_concurrent() -> usize {
    4
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

const PROVIDERS: [&str; 2] = ["ollama", "openai-compatible"];

/// Configuration manager with layered sources
pub struct ConfigManager {
    config: ClauseGraphConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (.clausegraph.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let (config, config_path) = Self::load_config_file()?;
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        info!(
            config_file = ?config_path,
            embedding_provider = %config.embedding.provider,
            embedding_dimension = config.embedding.dimension,
            llm_provider = %config.llm.provider,
            threshold = config.hybrid.confidence_threshold,
            "Configuration loaded"
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load an explicit file, still honouring environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_dotenv();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::apply_env_overrides(Self::read_toml_file(path)?);
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
        }
    }

    /// Search order: ./.clausegraph.toml, then ~/.clausegraph/config.toml
    fn load_config_file() -> Result<(ClauseGraphConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".clausegraph.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".clausegraph").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        info!("No config file found, using defaults");
        Ok((ClauseGraphConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<ClauseGraphConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(mut config: ClauseGraphConfig) -> ClauseGraphConfig {
        if let Ok(provider) = std::env::var("CLAUSEGRAPH_EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(model) = std::env::var("CLAUSEGRAPH_EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(dimension) = std::env::var("CLAUSEGRAPH_EMBEDDING_DIMENSION") {
            if let Ok(dim) = dimension.parse() {
                config.embedding.dimension = dim;
            }
        }
        if let Ok(url) = std::env::var("CLAUSEGRAPH_OLLAMA_URL") {
            config.embedding.ollama_url = url.clone();
            config.llm.ollama_url = url;
        }

        if let Ok(provider) = std::env::var("CLAUSEGRAPH_LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(model) = std::env::var("CLAUSEGRAPH_LLM_MODEL") {
            config.llm.model = model;
        }
        if let Ok(key) = std::env::var("CLAUSEGRAPH_LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }

        if let Ok(dir) = std::env::var("CLAUSEGRAPH_DATA_DIR") {
            config.graph.data_dir = PathBuf::from(dir);
        }
        if let Ok(k) = std::env::var("CLAUSEGRAPH_K_NEIGHBORS") {
            if let Ok(k) = k.parse() {
                config.graph.k_neighbors = k;
            }
        }
        if let Ok(threshold) = std::env::var("CLAUSEGRAPH_CONFIDENCE_THRESHOLD") {
            if let Ok(t) = threshold.parse() {
                config.hybrid.confidence_threshold = t;
            }
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.logging.level = level;
        }

        config
    }

    pub fn validate_config(config: &ClauseGraphConfig) -> Result<(), ConfigError> {
        for (section, provider) in [
            ("embedding", config.embedding.provider.as_str()),
            ("llm", config.llm.provider.as_str()),
        ] {
            if !PROVIDERS.contains(&provider) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid {} provider: {}. Must be one of: {}",
                    section,
                    provider,
                    PROVIDERS.join(", ")
                )));
            }
        }

        if config.embedding.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        let threshold = config.hybrid.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::ValidationError(format!(
                "hybrid.confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if config.hybrid.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(
                "hybrid.max_concurrent must be positive".to_string(),
            ));
        }

        if config.graph.k_neighbors == 0 {
            return Err(ConfigError::ValidationError(
                "graph.k_neighbors must be positive".to_string(),
            ));
        }

        if config.training.hidden_dim == 0 || config.training.epochs == 0 {
            return Err(ConfigError::ValidationError(
                "training.hidden_dim and training.epochs must be positive".to_string(),
            ));
        }
        let ratio = config.training.test_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "training.test_ratio must be within (0, 1), got {}",
                ratio
            )));
        }

        // RUST_LOG may carry a full filter directive; only bare levels are checked.
        let level = config.logging.level.as_str();
        if !level.contains('=') && !level.contains(',') {
            match level {
                "trace" | "debug" | "info" | "warn" | "error" => {}
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                        other
                    )))
                }
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &ClauseGraphConfig {
        &self.config
    }

    pub fn into_config(self) -> ClauseGraphConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = ClauseGraphConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            }
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
