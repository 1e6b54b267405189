//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// SafeGuard - LLM-assisted work-permit issuance
///
/// Describe a planned task; SafeGuard retrieves the relevant safety
/// regulations, scores the risk with the Fine-Kinney method and issues an
/// approval, conditional approval or rejection document.
///
/// Examples:
///   safeguard --task "Welding on the T-3 tank roof nozzle"
///   safeguard --task "Replace pump seal" --session .safeguard/session.json
///   safeguard --interactive --regulations ./regulations
///   safeguard --dry-run
///   safeguard --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Description of the planned task
    #[arg(
        short,
        long,
        value_name = "TEXT",
        required_unless_present_any = ["interactive", "init_config", "dry_run"]
    )]
    pub task: Option<String>,

    /// Run an interactive session (type "exit" or "quit" to leave)
    #[arg(short, long, conflicts_with = "task")]
    pub interactive: bool,

    /// Session file holding the conversation history
    ///
    /// Lets a follow-up invocation answer a clarifying question.
    #[arg(short, long, value_name = "FILE")]
    pub session: Option<PathBuf>,

    /// Ollama chat model
    #[arg(short, long, env = "SAFEGUARD_MODEL")]
    pub model: Option<String>,

    /// Ollama embedding model
    #[arg(long, env = "SAFEGUARD_EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Directory with regulation documents (.md, .txt)
    #[arg(short, long, value_name = "DIR")]
    pub regulations: Option<PathBuf>,

    /// Path of the persisted vector index
    #[arg(long, value_name = "FILE")]
    pub index: Option<PathBuf>,

    /// Discard the persisted index and rebuild it
    #[arg(long)]
    pub rebuild_index: bool,

    /// Hits returned per regulation search
    #[arg(long, value_name = "COUNT")]
    pub top_k: Option<usize>,

    /// Directory with prompt template overrides
    #[arg(long, value_name = "DIR")]
    pub prompts: Option<PathBuf>,

    /// Company name used for the internal-procedure search
    #[arg(long)]
    pub company: Option<String>,

    /// Directory permit documents are written to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Permit document format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .safeguard.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Load and chunk the regulations without calling the model
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .safeguard.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the permit document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref task) = self.task {
            if task.trim().is_empty() {
                return Err("Task description must not be empty".to_string());
            }
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if self.top_k == Some(0) {
            return Err("top-k must be at least 1".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref dir) = self.regulations {
            if dir.exists() && !dir.is_dir() {
                return Err(format!(
                    "Regulations path is not a directory: {}",
                    dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is `[general] verbose` from the configuration file;
    /// `--quiet` wins over both.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
