//! CLI interface for playbookd

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{self, Config, DEFAULT_CONFIG_FILE};
use crate::embeddings::build_provider;
use crate::index::{SearchMode, SearchQuery, DEFAULT_SEARCH_LIMIT};
use crate::manager::{ContrastiveQuery, PlaybookManager, PruneOptions};
use crate::playbook::{ExecutionRecord, ListFilter, Outcome, Playbook, Status};

#[derive(Parser)]
#[command(name = "playbookd")]
#[command(about = "Procedural memory for AI agents: versioned, confidence-scored playbooks", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "PLAYBOOKD_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration template
    Init {
        /// Embedding provider: noop, hash, openai, ollama, google
        #[arg(long, default_value = "noop")]
        provider: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// List playbooks
    List {
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        category: Option<String>,
        /// Required tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Maximum results (0 = all)
        #[arg(short, long, default_value = "0")]
        limit: usize,
        /// Include archived playbooks
        #[arg(long)]
        archived: bool,
        #[arg(long)]
        json: bool,
    },
    /// Search playbooks
    Search {
        query: String,
        /// hybrid, bm25 or vector
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        /// Blend of relevance and confidence, 0 to 1
        #[arg(long, default_value = "0")]
        confidence_weight: f64,
        #[arg(long, default_value = "0")]
        min_score: f64,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Proven and failed approaches for a task, as Markdown
    Context {
        query: String,
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        /// Minimum confidence for proven approaches
        #[arg(long)]
        positive: Option<f64>,
        /// Maximum confidence for failed approaches
        #[arg(long)]
        negative: Option<f64>,
        #[arg(long)]
        include_neutral: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show one playbook
    Get {
        id: String,
        /// Also show the last N executions
        #[arg(long, default_value = "0")]
        executions: usize,
        #[arg(long)]
        json: bool,
    },
    /// Create a playbook from a JSON file
    Create {
        file: PathBuf,
    },
    /// Record an execution outcome
    Record {
        id: String,
        /// success, partial or failure
        #[arg(long)]
        outcome: Outcome,
        /// What the playbook was used for
        #[arg(long, default_value = "")]
        task: String,
        #[arg(long, default_value = "")]
        agent: String,
    },
    /// Aggregate statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Archive stale, low-confidence and deprecated playbooks
    Prune {
        /// e.g. 30d; defaults to the configured max age
        #[arg(long)]
        max_age: Option<String>,
        #[arg(long)]
        min_confidence: Option<f64>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the search index from the store
    Reindex,
    /// Delete a playbook and its executions
    Delete {
        id: String,
    },
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { provider, force } => init_config(&cli.config, &provider, force),
        command => {
            let manager = open_manager(&cli.config)?;
            let result = dispatch(&manager, command).await;
            manager.close().await.context("Failed to close search index")?;
            result
        }
    }
}

fn init_config(path: &Path, provider: &str, force: bool) -> Result<()> {
    if !force && path.exists() {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let template = config::default_config_toml(provider)?;
    std::fs::write(path, template).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created {}", path.display());
    println!("Next: edit the file to configure your embedding provider.");
    Ok(())
}

fn open_manager(config_path: &Path) -> Result<PlaybookManager> {
    let config = Config::load(config_path).context("Failed to load config")?;
    let embedder = build_provider(&config.embedding).context("Failed to build embedding provider")?;
    let manager_config = config.manager_config()?;
    PlaybookManager::open(manager_config, embedder).context("Failed to open playbook memory")
}

async fn dispatch(manager: &PlaybookManager, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } => Ok(()),
        Commands::List { status, category, tags, limit, archived, json } => {
            let filter = ListFilter {
                status,
                category,
                tags,
                limit,
                include_archived: archived,
            };
            let playbooks = manager.list(&filter).await.context("list")?;
            if json {
                return print_json(&playbooks);
            }
            print_table(&playbooks);
            Ok(())
        }
        Commands::Search { query, mode, limit, confidence_weight, min_score, status, category, json } => {
            let mut search = SearchQuery::new(&query)
                .with_mode(mode)
                .with_limit(limit)
                .with_min_score(min_score)
                .with_confidence_weight(confidence_weight);
            search.status = status;
            search.category = category;

            let results = manager.search(search).await.context("search")?;
            if json {
                return print_json(&results);
            }
            if results.is_empty() {
                println!("No results found.");
                return Ok(());
            }
            println!("Found {} result(s) for {:?}:\n", results.len(), query);
            for (i, r) in results.iter().enumerate() {
                println!("{}. [{:.3}] {}", i + 1, r.score, r.playbook.name);
                println!("   ID: {}", r.playbook.id);
                if !r.playbook.description.is_empty() {
                    println!("   {}", r.playbook.description);
                }
                println!();
            }
            Ok(())
        }
        Commands::Context { query, limit, positive, negative, include_neutral, json } => {
            let cq = ContrastiveQuery {
                query: SearchQuery::new(query).with_limit(limit),
                positive_min_confidence: positive,
                negative_max_confidence: negative,
                include_neutral,
            };
            let results = manager.search_with_context(cq).await.context("contrastive search")?;
            if json {
                return print_json(&results);
            }
            println!("{}", results.to_prompt_context());
            Ok(())
        }
        Commands::Get { id, executions, json } => {
            let pb = manager.get(&id).await.with_context(|| format!("get playbook {:?}", id))?;
            let records = if executions > 0 {
                manager.list_executions(&id, executions).await.context("list executions")?
            } else {
                Vec::new()
            };
            if json {
                return print_json(&serde_json::json!({ "playbook": pb, "executions": records }));
            }
            print_playbook(&pb);
            if !records.is_empty() {
                println!("\nRecent executions ({}):", records.len());
                for rec in &records {
                    println!(
                        "  {}  {:<8} v{}  {}",
                        rec.started_at.format("%Y-%m-%d %H:%M:%S"),
                        rec.outcome.to_string(),
                        rec.playbook_version,
                        rec.task_context
                    );
                }
            }
            Ok(())
        }
        Commands::Create { file } => {
            let data = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let mut pb: Playbook = serde_json::from_str(&data).context("Failed to parse playbook JSON")?;
            manager.create(&mut pb).await.context("create")?;
            println!("Created playbook {} ({})", pb.id, pb.name);
            Ok(())
        }
        Commands::Record { id, outcome, task, agent } => {
            let mut rec = ExecutionRecord::new(id, outcome);
            rec.task_context = task;
            rec.agent_id = agent;
            let transition = manager.record_execution(&mut rec).await.context("record execution")?;
            println!("Recorded execution {}", rec.id);
            if let Some(t) = transition {
                println!("Status changed: {}", t);
            }
            Ok(())
        }
        Commands::Stats { json } => {
            let stats = manager.stats().await.context("stats")?;
            if json {
                return print_json(&stats);
            }
            println!("Playbooks:        {}", stats.total);
            println!("Archived:         {}", stats.archived);
            println!("Executions:       {}", stats.total_executions);
            println!("Avg confidence:   {:.2}", stats.avg_confidence);
            if !stats.by_status.is_empty() {
                println!("\nBy status:");
                for (status, count) in &stats.by_status {
                    println!("  {:<12} {}", status, count);
                }
            }
            if !stats.by_category.is_empty() {
                println!("\nBy category:");
                for (category, count) in &stats.by_category {
                    println!("  {:<12} {}", category, count);
                }
            }
            Ok(())
        }
        Commands::Prune { max_age, min_confidence, dry_run, json } => {
            let max_age = match max_age {
                Some(s) => config::parse_max_age(&s).with_context(|| format!("invalid --max-age {:?}", s))?,
                None => chrono::Duration::zero(),
            };
            let result = manager
                .prune(PruneOptions {
                    max_age,
                    min_confidence: min_confidence.unwrap_or(0.0),
                    dry_run,
                })
                .await
                .context("prune")?;
            if json {
                return print_json(&result);
            }
            if dry_run {
                println!("Dry run: {} playbook(s) would be archived.", result.archived.len());
            } else {
                println!("Archived {} playbook(s).", result.archived.len());
            }
            for id in &result.archived {
                println!("  - {}", id);
            }
            Ok(())
        }
        Commands::Reindex => {
            let count = manager.reindex().await.context("reindex")?;
            println!("Reindexed {} playbook(s).", count);
            Ok(())
        }
        Commands::Delete { id } => {
            manager.delete(&id).await.with_context(|| format!("delete playbook {:?}", id))?;
            println!("Deleted playbook {}", id);
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_table(playbooks: &[Playbook]) {
    if playbooks.is_empty() {
        println!("No playbooks found.");
        return;
    }

    println!("{:<36}  {:<30}  {:<12}  {:<12}  Confidence", "ID", "Name", "Status", "Category");
    println!("{:-<36}  {:-<30}  {:-<12}  {:-<12}  ----------", "", "", "", "");
    for pb in playbooks {
        println!(
            "{:<36}  {:<30}  {:<12}  {:<12}  {:.2}",
            pb.id,
            truncate(&pb.name, 30),
            pb.status.to_string(),
            pb.category,
            pb.confidence
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

fn print_playbook(pb: &Playbook) {
    println!("Name:       {}", pb.name);
    println!("ID:         {}", pb.id);
    println!("Slug:       {}", pb.slug);
    println!("Category:   {}", pb.category);
    println!("Status:     {}", pb.status);
    println!("Version:    {}", pb.version);
    println!("Confidence: {:.2}", pb.confidence);
    println!("Success:    {}  Failure: {}", pb.success_count, pb.failure_count);
    if !pb.tags.is_empty() {
        println!("Tags:       {}", pb.tags.join(", "));
    }
    println!("Created:    {}", pb.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated:    {}", pb.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(last_used) = pb.last_used_at {
        println!("Last Used:  {}", last_used.format("%Y-%m-%d %H:%M:%S"));
    }

    if !pb.description.is_empty() {
        println!("\nDescription:\n  {}", pb.description);
    }

    if !pb.steps.is_empty() {
        println!("\nSteps ({}):", pb.steps.len());
        for step in &pb.steps {
            println!("  {}. {}", step.order, step.action);
            if let Some(ref tool) = step.tool {
                println!("     Tool: {}", tool);
            }
        }
    }

    if !pb.lessons.is_empty() {
        println!("\nLessons ({}):", pb.lessons.len());
        for lesson in &pb.lessons {
            println!("  - {}", lesson.content);
        }
    }
}
