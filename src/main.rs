//! SafeGuard - LLM-assisted work-permit issuance
//!
//! Describe a planned task; SafeGuard retrieves the relevant safety
//! regulations, scores the risk with the Fine-Kinney method and writes an
//! approval, conditional approval or rejection document.
//!
//! Exit codes:
//!   0 - Permit issued (approved or conditional)
//!   1 - Runtime error (connection, config, I/O, etc.)
//!   2 - Permit rejected
//!   3 - More information needed

mod cli;
mod config;
mod llm;
mod models;
mod pipeline;
mod report;
mod retrieval;
mod risk;
mod session;

use anyhow::{anyhow, Context, Result};
use cli::Args;
use config::{Config, CONFIG_FILE};
use llm::{LlmClient, OllamaClient, OllamaConfig, PromptLibrary};
use pipeline::{OutputSettings, PermitPipeline, PipelineEvent, PipelineOutcome, EXIT_ISSUED};
use retrieval::{
    IndexSettings, LoaderConfig, RegulationFinder, RegulationLoader, TextSplitter, VectorRetriever,
};
use session::Session;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const EXIT_ERROR: i32 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(EXIT_ERROR);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration before logging so `[general] verbose` applies
    let (config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(EXIT_ERROR);
        }
    };

    // Initialize logging
    init_logging(args.log_level(config.general.verbose))?;

    info!("SafeGuard v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    origin.log();

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Permit request failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(EXIT_ERROR);
        }
    }
}

/// Handle --init-config: generate a default .safeguard.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(EXIT_ERROR);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize the model, regulation directory, company name, and more.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("Failed to set tracing subscriber: {}", e))
}

/// Load configuration, build the pipeline and serve the request(s).
async fn run(args: Args, mut config: Config) -> Result<i32> {
    config.merge_with_args(&args);
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    let loader = RegulationLoader::new(
        config.regulations_dir(),
        LoaderConfig::from(&config.retrieval),
    );
    let splitter = TextSplitter::new(config.retrieval.chunk_size, config.retrieval.chunk_overlap)?;

    // Handle --dry-run: load and chunk the regulations, no model calls
    if args.dry_run {
        return handle_dry_run(&loader, &splitter);
    }

    println!("🤖 Connecting to the model service...");
    println!("   Model: {}", config.model.name);
    println!("   Embeddings: {}", config.model.embedding_model);
    println!("   Ollama: {}", config.model.ollama_url);

    let client = Arc::new(OllamaClient::new(OllamaConfig::from(&config.model))?);

    println!("\n📚 Preparing the regulation index...");
    let settings = IndexSettings {
        index_path: config.index_path(),
        rebuild: args.rebuild_index,
        show_progress: !args.quiet,
    };
    let index = retrieval::open_or_build(&settings, &loader, &splitter, client.as_ref()).await?;
    println!("   {} chunks indexed", index.len());

    let retriever = VectorRetriever::new(
        index,
        client.clone(),
        config.retrieval.top_k,
        config.retrieval.min_score,
    );
    let finder = RegulationFinder::new(
        Arc::new(retriever),
        config.general.company.clone(),
        config.retrieval.company_priority,
        config.retrieval.max_documents,
    );

    let prompts_dir = config.prompts_dir();
    let prompts = PromptLibrary::new(prompts_dir.is_dir().then_some(prompts_dir));

    let llm: Arc<dyn LlmClient> = client;
    let pipeline = PermitPipeline::new(
        llm,
        finder,
        prompts,
        OutputSettings {
            output_dir: config.output_dir(),
            format: args.format,
        },
    );

    if args.interactive {
        run_interactive(&pipeline, &args).await
    } else {
        let task = args
            .task
            .as_deref()
            .ok_or_else(|| anyhow!("No task given. Use --task or --interactive."))?;
        run_once(&pipeline, &args, task).await
    }
}

/// One request; the session file, if any, carries the conversation over.
async fn run_once(pipeline: &PermitPipeline, args: &Args, task: &str) -> Result<i32> {
    let mut session = match args.session {
        Some(ref path) => Session::load(path)?,
        None => Session::new(),
    };
    if !session.is_empty() {
        info!("Continuing session with {} messages", session.messages.len());
    }

    let outcome = pipeline
        .run(task, &session, &mut |event: &PipelineEvent| print_event(event, args.quiet))
        .await?;
    print_outcome(&outcome);

    if let Some(ref path) = args.session {
        outcome.update_session(task, &mut session);
        session.save(path)?;
    }

    Ok(outcome.exit_code())
}

/// Read requests from stdin until "exit", "quit" or end of input.
async fn run_interactive(pipeline: &PermitPipeline, args: &Args) -> Result<i32> {
    let mut session = match args.session {
        Some(ref path) => Session::load(path)?,
        None => Session::new(),
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut last_code = EXIT_ISSUED;

    println!("\n💬 Describe the planned work (type \"exit\" to leave).");

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        let outcome = match pipeline
            .run(input, &session, &mut |event: &PipelineEvent| print_event(event, args.quiet))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Request failed: {:#}", e);
                eprintln!("❌ Error: {:#}", e);
                last_code = EXIT_ERROR;
                continue;
            }
        };
        print_outcome(&outcome);

        session.push_user(input);
        session.push_assistant(outcome.reply());
        if let Some(ref path) = args.session {
            if let Err(e) = session.save(path) {
                warn!("Failed to save session: {:#}", e);
            }
        }
        last_code = outcome.exit_code();
    }

    println!("👋 Bye.");
    Ok(last_code)
}

/// Stage progress lines.
fn print_event(event: &PipelineEvent, quiet: bool) {
    if quiet {
        return;
    }

    match event {
        PipelineEvent::IntentConfirmed => {
            println!("\n🤖 Coordinator: intent confirmed, searching regulations...");
        }
        PipelineEvent::ClarificationNeeded { .. } => {
            println!("\n🤖 Coordinator: more information is needed.");
        }
        PipelineEvent::RegulationsRetrieved { documents } => {
            println!("📚 Regulation finder: {} excerpts retrieved", documents.len());
            for (i, doc) in documents.iter().enumerate() {
                println!("   {}. 📄 {}", i + 1, doc.file_name());
            }
        }
        PipelineEvent::RiskAssessed { risk: Some(risk) } => {
            println!(
                "⚠️  Risk analyst: P={} E={} C={} → R={} {} {}",
                risk.probability,
                risk.exposure,
                risk.consequence,
                risk.display_score(),
                risk.band.emoji(),
                risk.band
            );
        }
        PipelineEvent::RiskAssessed { risk: None } => {
            println!("⚠️  Risk analyst: no score could be extracted, failing closed");
        }
        PipelineEvent::PermitIssued { document_path, .. } => match document_path {
            Some(path) => println!("📝 Admin: permit document saved to {}", path.display()),
            None => println!("📝 Admin: the permit document could not be written"),
        },
    }
}

fn print_outcome(outcome: &PipelineOutcome) {
    match outcome {
        PipelineOutcome::NeedsMoreInfo { question } => println!("\n❓ {}", question),
        PipelineOutcome::Issued { message, .. } => println!("\n{}", message),
    }
}

/// Handle --dry-run: load and chunk the regulations, print counts, exit.
fn handle_dry_run(loader: &RegulationLoader, splitter: &TextSplitter) -> Result<i32> {
    println!(
        "\n🔍 Dry run: loading regulations from {} (no model calls)...\n",
        loader.root().display()
    );

    let sources = loader.load()?;
    if sources.is_empty() {
        println!("   No regulation documents found.");
    } else {
        let mut total_chunks = 0;
        for source in &sources {
            let chunks = splitter.split_text(&source.content).len();
            total_chunks += chunks;
            println!(
                "     📄 {} ({} chars, {} chunks)",
                source.path,
                source.content.chars().count(),
                chunks
            );
        }
        println!(
            "\n   Total: {} documents, {} chunks",
            sources.len(),
            total_chunks
        );
    }

    println!("\n✅ Dry run complete. No model calls were made.");
    Ok(EXIT_ISSUED)
}

/// Where the configuration came from, logged once logging is up.
enum ConfigOrigin {
    File(PathBuf),
    Defaults,
    Fallback(String),
}

impl ConfigOrigin {
    fn log(&self) {
        match self {
            ConfigOrigin::File(path) => info!("Loaded config from {}", path.display()),
            ConfigOrigin::Defaults => debug!("No config file found, using defaults"),
            ConfigOrigin::Fallback(e) => warn!("Failed to load config: {}. Using defaults.", e),
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::File(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigOrigin::File(PathBuf::from(CONFIG_FILE)))),
        Ok(None) => Ok((Config::default(), ConfigOrigin::Defaults)),
        Err(e) => Ok((Config::default(), ConfigOrigin::Fallback(format!("{:#}", e)))),
    }
}
