//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.safeguard.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".safeguard.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Regulation retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Prompt template settings.
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory permit documents are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Company name used to focus the internal-procedure search.
    #[serde(default = "default_company")]
    pub company: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            company: default_company(),
            verbose: false,
        }
    }
}

fn default_output_dir() -> String {
    "outputs".to_string()
}

fn default_company() -> String {
    "S-Chem".to_string()
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Chat model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default)]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Number of retries on timeouts and refused connections.
    #[serde(default = "default_retries")]
    pub retries: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            embedding_model: default_embedding_model(),
            ollama_url: default_ollama_url(),
            temperature: 0.0,
            timeout_seconds: default_timeout(),
            retries: default_retries(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_embedding_model() -> String {
    "bge-m3".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_retries() -> usize {
    3
}

/// Regulation retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Directory holding regulation documents.
    #[serde(default = "default_regulations_dir")]
    pub regulations_dir: String,

    /// Where the vector index is persisted.
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// File extensions loaded as regulations.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Maximum regulation file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Hits returned per search.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum cosine similarity; 0.0 disables the filter.
    #[serde(default)]
    pub min_score: f32,

    /// Company-search hits placed ahead of the general results.
    #[serde(default = "default_company_priority")]
    pub company_priority: usize,

    /// Maximum excerpts passed on to the later stages.
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            regulations_dir: default_regulations_dir(),
            index_path: default_index_path(),
            extensions: default_extensions(),
            max_file_size: default_max_file_size(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            min_score: 0.0,
            company_priority: default_company_priority(),
            max_documents: default_max_documents(),
        }
    }
}

fn default_regulations_dir() -> String {
    "data".to_string()
}

fn default_index_path() -> String {
    ".safeguard/index.json".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string(), "pdf".to_string()]
}

fn default_max_file_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_chunk_size() -> usize {
    800
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_top_k() -> usize {
    6
}

fn default_company_priority() -> usize {
    2
}

fn default_max_documents() -> usize {
    8
}

/// Prompt template settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Directory with prompt overrides; missing files use the built-ins.
    #[serde(default = "default_prompts_dir")]
    pub dir: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dir: default_prompts_dir(),
        }
    }
}

fn default_prompts_dir() -> String {
    "prompts".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings when given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref embedding_model) = args.embedding_model {
            self.model.embedding_model = embedding_model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }

        if let Some(ref dir) = args.regulations {
            self.retrieval.regulations_dir = dir.display().to_string();
        }
        if let Some(ref index) = args.index {
            self.retrieval.index_path = index.display().to_string();
        }
        if let Some(top_k) = args.top_k {
            self.retrieval.top_k = top_k;
        }

        if let Some(ref dir) = args.prompts {
            self.prompts.dir = dir.display().to_string();
        }
        if let Some(ref dir) = args.output_dir {
            self.general.output_dir = dir.display().to_string();
        }
        if let Some(ref company) = args.company {
            self.general.company = company.clone();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Validate values that would otherwise fail deep inside the pipeline.
    pub fn validate(&self) -> Result<(), String> {
        let url = &self.model.ollama_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
        }
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err("Temperature must be between 0.0 and 1.0".to_string());
        }
        if self.model.timeout_seconds == 0 {
            return Err("Timeout must be at least 1 second".to_string());
        }
        if self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            return Err("chunk_overlap must be smaller than chunk_size".to_string());
        }
        if self.retrieval.top_k == 0 || self.retrieval.max_documents == 0 {
            return Err("top_k and max_documents must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.general.output_dir)
    }

    pub fn regulations_dir(&self) -> PathBuf {
        PathBuf::from(&self.retrieval.regulations_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        PathBuf::from(&self.retrieval.index_path)
    }

    pub fn prompts_dir(&self) -> PathBuf {
        PathBuf::from(&self.prompts.dir)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
