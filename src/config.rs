use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ragent: RagentConfig,
    pub model: ModelConfig,
    pub embeddings: EmbeddingsConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Core paths and logging
#[derive(Debug, Clone, Deserialize)]
pub struct RagentConfig {
    /// Path to the SQLite graph store.
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Generative model configuration (query generation + answer synthesis)
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,
    #[serde(default)]
    pub temperature: f32,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub batch_size: usize,
    pub dimensions: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

/// Search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub default_k: usize,
    pub min_score: f32,
    #[serde(default = "default_vector_weight")]
    pub hybrid_vector_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub hybrid_keyword_weight: f32,
}

/// Agent orchestration configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Whole-session time budget; on expiry the session synthesizes from
    /// whatever tool results have completed.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Schema context cache TTL.
    #[serde(default = "default_schema_ttl_seconds")]
    pub schema_ttl_seconds: u64,
    /// Tools the planner must not select (names: vector_search, graph_query,
    /// hybrid_search).
    #[serde(default)]
    pub disabled_tools: Vec<String>,
    /// Optional JSON file of worked question->plan examples overriding the
    /// built-in bank.
    #[serde(default)]
    pub examples_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
            schema_ttl_seconds: default_schema_ttl_seconds(),
            disabled_tools: Vec::new(),
            examples_path: None,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_output_tokens() -> usize {
    1024
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_keyword_weight() -> f32 {
    0.3
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_schema_ttl_seconds() -> u64 {
    300
}

fn default_http_enabled() -> bool {
    false
}

fn default_http_port() -> u16 {
    8080
}

fn default_allowed_origins() -> Vec<String> {
    vec![]
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RAGENT_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors - file is optional)
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RAGENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .context("Failed to parse config.toml")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        // Both API key env vars must resolve (they may name the same variable)
        std::env::var(&self.model.api_key_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                self.model.api_key_env
            )
        })?;
        std::env::var(&self.embeddings.api_key_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                self.embeddings.api_key_env
            )
        })?;

        if self.search.default_k == 0 {
            anyhow::bail!("search.default_k must be greater than 0");
        }

        if self.search.min_score < 0.0 || self.search.min_score > 1.0 {
            anyhow::bail!("search.min_score must be between 0.0 and 1.0");
        }

        let weight_sum = self.search.hybrid_vector_weight + self.search.hybrid_keyword_weight;
        if !(0.99..=1.01).contains(&weight_sum) {
            anyhow::bail!(
                "hybrid weights must sum to 1.0 (got vector={} + keyword={})",
                self.search.hybrid_vector_weight,
                self.search.hybrid_keyword_weight
            );
        }

        if self.embeddings.dimensions == 0 {
            anyhow::bail!("embeddings.dimensions must be greater than 0");
        }

        if self.agent.session_timeout_ms == 0 {
            anyhow::bail!("agent.session_timeout_ms must be greater than 0");
        }

        for name in &self.agent.disabled_tools {
            if !matches!(name.as_str(), "vector_search" | "graph_query" | "hybrid_search") {
                anyhow::bail!("unknown tool in agent.disabled_tools: {}", name);
            }
        }

        Ok(())
    }

    /// Get store path
    pub fn db_path(&self) -> &Path {
        &self.ragent.db_path
    }
}
