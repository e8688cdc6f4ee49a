// ============================================================================
// recollect - CLI front end for the Recollect memory store
// ============================================================================
// Usage:
//   recollect write "I moved to Berlin"        Extract and reconcile facts
//   recollect search "where do I live"         Semantic search in a scope
//   recollect list                             List memories in a scope
//   recollect ingest chat.json --batch-size 4  Replay a conversation file
//   recollect delete <ID> | forget | stats
//
// Scope is selected with --user / --agent; both may be combined.
// ============================================================================

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use recollect_core::{AppliedDecision, MemoryConfig, MemoryManager, Metadata, Scope};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Deduplicating semantic memory
#[derive(Parser)]
#[command(name = "recollect", version, about = "Extract, reconcile and search conversation memories")]
struct Cli {
    /// User the memories belong to
    #[arg(long, global = true, env = "RECOLLECT_USER")]
    user: Option<String>,

    /// Agent the memories belong to
    #[arg(long, global = true, env = "RECOLLECT_AGENT")]
    agent: Option<String>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "plain", env = "RECOLLECT_LOG_FORMAT")]
    log_format: LogFormat,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true, env = "RECOLLECT_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract facts from one conversation turn and reconcile them
    Write {
        /// The conversation turn
        text: String,

        /// JSON object attached to every memory this turn adds
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Search memories by meaning
    Search {
        query: String,

        /// Maximum number of results (default from configuration)
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity score (default from configuration)
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// List memories in the scope, oldest first
    List {
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Delete a single memory by id
    Delete { id: Uuid },

    /// Delete every memory in the scope
    Forget {
        /// Required when neither --user nor --agent is given
        #[arg(long)]
        unscoped: bool,
    },

    /// Show store statistics
    Stats,

    /// Replay a conversation file (JSON array of {"role", "content"})
    Ingest {
        file: PathBuf,

        /// Messages folded into one turn
        #[arg(long, default_value = "2")]
        batch_size: usize,
    },
}

/// One message of an ingested conversation
#[derive(Debug, Deserialize)]
struct Message {
    role: String,
    content: String,
}

fn init_logging(format: LogFormat, log_file: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("recollect_core=info,recollect=info"));

    let writer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    match format {
        LogFormat::Plain => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn format_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", millis))
}

/// Fold messages into turns of `batch_size` messages each
fn batch_turns(messages: &[Message], batch_size: usize) -> Vec<String> {
    messages
        .chunks(batch_size.max(1))
        .map(|batch| {
            batch
                .iter()
                .filter(|m| !m.content.trim().is_empty())
                .map(|m| format!("{}: {}", m.role, m.content.trim()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|turn| !turn.is_empty())
        .collect()
}

/// Provenance attached to memories added while ingesting `file`
fn batch_metadata(file: &Path, batch_idx: usize) -> Metadata {
    let mut metadata = Metadata::new();
    let source = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    metadata.insert("source_file".into(), source.into());
    metadata.insert("batch_idx".into(), batch_idx.into());
    metadata
}

fn parse_metadata(raw: Option<&str>) -> Result<Metadata> {
    let Some(raw) = raw else {
        return Ok(Metadata::new());
    };
    match serde_json::from_str::<serde_json::Value>(raw).context("--metadata is not valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        other => anyhow::bail!("--metadata must be a JSON object, got {}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Could not load .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_file.as_ref())?;

    let scope = Scope::new(cli.user.clone(), cli.agent.clone());
    let config = MemoryConfig::from_env()?;
    let manager = MemoryManager::from_config(
        config,
        std::env::var("DASHSCOPE_API_KEY").ok(),
        std::env::var("OPENAI_API_KEY").ok(),
    )
    .await
    .context("Failed to initialize memory store")?;

    match cli.command {
        Commands::Write { text, metadata } => {
            let metadata = parse_metadata(metadata.as_deref())?;
            let applied = manager.write_with_metadata(&text, &scope, metadata).await?;
            print_applied(&applied, cli.json)
        }
        Commands::Search {
            query,
            limit,
            threshold,
        } => cmd_search(&manager, &scope, &query, limit, threshold, cli.json).await,
        Commands::List { limit } => cmd_list(&manager, &scope, limit, cli.json).await,
        Commands::Delete { id } => {
            manager.delete(id).await?;
            println!("Deleted {}", id);
            Ok(())
        }
        Commands::Forget { unscoped } => {
            if scope.is_unscoped() && !unscoped {
                anyhow::bail!("Refusing to forget unscoped memories without --unscoped");
            }
            let removed = manager.forget(&scope).await?;
            println!("Forgot {} memories ({})", removed, scope);
            Ok(())
        }
        Commands::Stats => {
            let stats = manager.stats().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("=== Recollect Memory Stats ===");
                println!("Backend:    {}", stats.backend);
                println!("Collection: {}", stats.collection);
                println!("Memories:   {}", stats.memory_count);
            }
            Ok(())
        }
        Commands::Ingest { file, batch_size } => {
            cmd_ingest(&manager, &scope, &file, batch_size, cli.json).await
        }
    }
}

fn print_applied(applied: &[AppliedDecision], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(applied)?);
        return Ok(());
    }
    if applied.is_empty() {
        println!("No facts extracted.");
        return Ok(());
    }

    for decision in applied {
        let id = decision
            .memory_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        match (&decision.skipped, &decision.previous_text, &decision.text) {
            (Some(reason), _, _) => {
                println!("{:<6}  {:<36}  {} (skipped: {})", "SKIP", id, decision.fact, reason)
            }
            (None, Some(old), Some(new)) => {
                println!("{:<6}  {:<36}  {} -> {}", decision.event, id, old, new)
            }
            (None, Some(old), None) => println!("{:<6}  {:<36}  {}", decision.event, id, old),
            (None, None, Some(new)) => println!("{:<6}  {:<36}  {}", decision.event, id, new),
            (None, None, None) => println!("{:<6}  {:<36}  {}", decision.event, id, decision.fact),
        }
    }
    Ok(())
}

async fn cmd_search(
    manager: &MemoryManager,
    scope: &Scope,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    let limit = limit.unwrap_or(manager.config().search_limit);
    let threshold = threshold.or(manager.config().search_threshold);
    let results = manager.search(query, scope, limit, threshold).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No memories found.");
        return Ok(());
    }

    println!("{:<7}  {:<36}  {}", "SCORE", "ID", "MEMORY");
    println!("{}", "-".repeat(90));
    for hit in &results {
        println!("{:<7.4}  {:<36}  {}", hit.score, hit.memory.id, hit.memory.text);
    }
    Ok(())
}

async fn cmd_list(manager: &MemoryManager, scope: &Scope, limit: usize, json: bool) -> Result<()> {
    let memories = manager.list(scope, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&memories)?);
        return Ok(());
    }
    if memories.is_empty() {
        println!("No memories in {}.", scope);
        return Ok(());
    }

    println!("{:<36}  {:<23}  {}", "ID", "UPDATED", "MEMORY");
    println!("{}", "-".repeat(90));
    for memory in &memories {
        println!(
            "{:<36}  {:<23}  {}",
            memory.id,
            format_timestamp(memory.updated_at),
            memory.text
        );
    }
    println!("\nTotal: {} memories", memories.len());
    Ok(())
}

async fn cmd_ingest(
    manager: &MemoryManager,
    scope: &Scope,
    file: &Path,
    batch_size: usize,
    json: bool,
) -> Result<()> {
    if batch_size == 0 {
        anyhow::bail!("--batch-size must be at least 1");
    }
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Cannot read {}", file.display()))?;
    let messages: Vec<Message> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of messages", file.display()))?;

    let turns = batch_turns(&messages, batch_size);
    info!(messages = messages.len(), turns = turns.len(), "Ingesting conversation");

    let mut applied = Vec::new();
    let mut failed = 0usize;
    for (i, turn) in turns.iter().enumerate() {
        match manager
            .write_with_metadata(turn, scope, batch_metadata(file, i))
            .await
        {
            Ok(decisions) => applied.extend(decisions),
            Err(e) => {
                warn!(turn = i, error = %e, "Turn rejected");
                failed += 1;
            }
        }
    }

    print_applied(&applied, json)?;
    if !json {
        println!(
            "\nIngested {} turns ({} rejected), {} decisions",
            turns.len(),
            failed,
            applied.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: &str, content: &str) -> Message {
        Message {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_batch_turns() {
        let messages = vec![
            message("user", "我叫张三"),
            message("assistant", "你好张三"),
            message("user", "  "),
            message("user", "我是软件工程师"),
            message("assistant", "很好"),
        ];

        let turns = batch_turns(&messages, 2);
        assert_eq!(
            turns,
            vec![
                "user: 我叫张三\nassistant: 你好张三".to_string(),
                "user: 我是软件工程师".to_string(),
                "assistant: 很好".to_string(),
            ]
        );
    }

    #[test]
    fn test_batch_of_blank_messages_dropped() {
        let messages = vec![message("user", ""), message("assistant", " ")];
        assert!(batch_turns(&messages, 2).is_empty());
    }

    #[test]
    fn test_parse_metadata() {
        assert!(parse_metadata(None).unwrap().is_empty());
        let map = parse_metadata(Some(r#"{"session_id": "s1"}"#)).unwrap();
        assert_eq!(map["session_id"], "s1");
        assert!(parse_metadata(Some("[1, 2]")).is_err());
        assert!(parse_metadata(Some("nope")).is_err());
    }

    #[test]
    fn test_batch_metadata() {
        let metadata = batch_metadata(Path::new("/tmp/chats/session.json"), 3);
        assert_eq!(metadata["source_file"], "session.json");
        assert_eq!(metadata["batch_idx"], 3);
        assert_eq!(metadata.len(), 2);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "recollect",
            "--user",
            "u1",
            "search",
            "张三的职业",
            "--threshold",
            "0.3",
        ])
        .unwrap();
        assert_eq!(cli.user.as_deref(), Some("u1"));
        assert!(matches!(
            cli.command,
            Commands::Search {
                threshold: Some(t),
                ..
            } if (t - 0.3).abs() < f32::EPSILON
        ));
    }
}
