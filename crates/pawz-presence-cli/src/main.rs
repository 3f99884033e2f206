use async_trait::async_trait;
use clap::{Parser, Subcommand};
use log::warn;
use pawz_presence::atoms::memory_types::{MemoryKind, NewMemory, SearchQuery};
use pawz_presence::atoms::types::{ProactiveMessage, Role};
use pawz_presence::engine::config;
use pawz_presence::engine::memory::{provider_from_config, SqliteKvStore, VectorMemoryStore};
use pawz_presence::{
    AnalysisPipeline, EngineResult, LocalDecisionService, LocalReflectionService, PipelineEvent, PipelineServices,
    PresenceConfig, ProactiveSink, SignalTracker,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Pawz Presence: proactive analysis pipeline and vector memory
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config_dir>/pawz-presence/config.toml)
    #[arg(short, long, global = true, env = "PAWZ_PRESENCE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database (overrides storage.db_path)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session: each line replaces the draft, /send sends it
    Chat {
        /// Do not attach the memory store
        #[arg(long)]
        no_memory: bool,
    },

    /// Inspect and edit long-term memory
    Memory {
        #[command(subcommand)]
        action: MemoryCommand,
    },

    /// Configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum MemoryCommand {
    /// Store a memory
    Add {
        content: String,
        #[arg(short, long, default_value = "fact")]
        kind: MemoryKind,
        #[arg(short, long, default_value_t = 0.5)]
        importance: f32,
        /// Comma-separated tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Semantic search
    Search {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        #[arg(short, long, default_value_t = 0.1)]
        min_similarity: f64,
        #[arg(short, long)]
        kind: Option<MemoryKind>,
        #[arg(long)]
        json: bool,
    },
    /// Show one memory as JSON
    Get { id: String },
    /// Delete one memory
    Delete { id: String },
    /// Store statistics
    Stats,
    /// Regenerate the reference vectors and reindex every entry
    RegenPivots,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Print the path the config is read from
    Path,
}

struct StdoutSink;

#[async_trait]
impl ProactiveSink for StdoutSink {
    async fn emit(&self, message: &ProactiveMessage) -> EngineResult<()> {
        println!("\n🐾 [{} · {}] {}", message.action_type, message.priority, message.text);
        Ok(())
    }
}

fn load_config(cli: &Cli) -> EngineResult<PresenceConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_from(path)?,
        None => config::load()?,
    };
    if let Some(db) = &cli.db {
        config.storage.db_path = Some(db.clone());
    }
    Ok(config)
}

fn open_store(config: &PresenceConfig) -> EngineResult<Arc<VectorMemoryStore>> {
    let provider = provider_from_config(&config.embedding, config.memory.embedding_cache_capacity);
    let kv = SqliteKvStore::open(&config::resolve_db_path(config))?;
    Ok(Arc::new(VectorMemoryStore::open(provider, Arc::new(kv), config.memory.clone())))
}

async fn run_memory(config: &PresenceConfig, action: MemoryCommand) -> EngineResult<()> {
    let store = open_store(config)?;
    match action {
        MemoryCommand::Add { content, kind, importance, tags } => {
            let id = store.insert(NewMemory::new(content, kind, importance).with_tags(tags)).await?;
            println!("{}", id);
        }
        MemoryCommand::Search { query, limit, min_similarity, kind, json } => {
            let mut q = SearchQuery::new(query, limit, min_similarity);
            if let Some(kind) = kind {
                q = q.of_kind(kind);
            }
            let (hits, path) = store.search_detailed(&q).await?;
            if json {
                let rows: Vec<_> = hits
                    .iter()
                    .map(|h| serde_json::json!({ "similarity": h.similarity, "entry": h.entry }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{} hit(s) via {:?} search", hits.len(), path);
                for hit in hits {
                    println!(
                        "  {:.3}  [{:?} · {:.2}] {}  ({})",
                        hit.similarity, hit.entry.metadata.kind, hit.entry.metadata.importance, hit.entry.content, hit.entry.id
                    );
                }
            }
        }
        MemoryCommand::Get { id } => match store.get(&id) {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => println!("No memory with id {}", id),
        },
        MemoryCommand::Delete { id } => {
            if store.delete(&id) {
                println!("Deleted {}", id);
            } else {
                println!("No memory with id {}", id);
            }
        }
        MemoryCommand::Stats => println!("{}", serde_json::to_string_pretty(&store.stats())?),
        MemoryCommand::RegenPivots => {
            let pivots = store.regenerate_pivots().await?;
            println!("Reference vectors regenerated: generation {} ({} dims)", pivots.generation, pivots.dims());
        }
    }
    Ok(())
}

async fn run_chat(config: &PresenceConfig, no_memory: bool) -> EngineResult<()> {
    let memory = if no_memory { None } else { Some(open_store(config)?) };
    let pipeline = AnalysisPipeline::start(
        config.pipeline.clone(),
        PipelineServices {
            decision: Arc::new(LocalDecisionService::new()),
            reflection: Arc::new(LocalReflectionService::new()),
            sink: Arc::new(StdoutSink),
            memory,
        },
    );

    let mut events = pipeline.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::ReflectionReady { reflection, .. }) => {
                    println!("  ~ {} {}", reflection.emotions.join(""), reflection.emotional_state);
                }
                Ok(PipelineEvent::MemorySaved { id, kind }) => println!("  ~ remembered {:?} ({})", kind, id),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("[cli] Missed {} pipeline events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("Type to update the draft. Commands: /send /blur /focus /quit");
    let mut tracker = SignalTracker::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let now = chrono::Utc::now();
        match line.trim() {
            "/quit" => break,
            "/blur" => tracker.on_blur(now),
            "/focus" => tracker.on_focus(now),
            "/send" => {
                let draft = tracker.text().to_string();
                if draft.trim().is_empty() {
                    continue;
                }
                tracker.on_message(Role::User, draft, now);
            }
            _ => tracker.on_input(&line, now),
        }
        pipeline.submit_signals(&tracker.raw_signals(chrono::Local::now().fixed_offset())).await?;
    }

    let stats = pipeline.stats();
    pipeline.shutdown().await;
    printer.abort();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn run(cli: Cli) -> EngineResult<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Chat { no_memory } => run_chat(&config, no_memory).await,
        Commands::Memory { action } => run_memory(&config, action).await,
        Commands::Config { action } => {
            match action {
                ConfigCommand::Show => print!("{}", config::to_toml(&config)?),
                ConfigCommand::Path => match cli.config.or_else(config::config_path) {
                    Some(path) => println!("{}", path.display()),
                    None => println!("(no config directory on this platform)"),
                },
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
