//! Engram CLI
//!
//! Command-line surface over the cognitive memory engine. Every verb maps
//! onto one core operation; unrecoverable errors exit non-zero with a single
//! message line. Set `ENGRAM_TRACE=1` for diagnostic logging on stderr.

use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;

use engram_core::{
    AddInput, AddStatus, ConsolidationOptions, LinkRelation, LinkSpec, MemoryType, RecallOptions,
    SearchMode, SearchOptions, SessionFilter, Storage, UpdatePatch,
};

/// Engram - cognitive memory for long-lived agents
#[derive(Parser)]
#[command(name = "engram")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Store, search, and consolidate typed agent memories")]
struct Cli {
    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a memory through the dedup/merge/auto-link pipeline
    Add {
        /// Memory type (reflex, episode, fact, preference, decision, session_summary)
        mem_type: String,
        /// Short title
        title: String,
        /// Full content
        #[arg(short, long, default_value = "")]
        content: String,
        /// Comma-separated tags
        #[arg(short, long)]
        tags: Option<String>,
        /// Importance prior in [0,1]
        #[arg(short, long, default_value_t = 0.5)]
        importance: f64,
        /// Tag the memory permanent (exempt from decay and prune)
        #[arg(long)]
        permanent: bool,
        /// Skip automatic related_to edges
        #[arg(long)]
        no_auto_link: bool,
        /// Source conversation id
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Batch add from a JSON array of memories
    Ingest {
        /// Inline JSON (alternative to --file)
        json: Option<String>,
        /// Read the JSON array from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Delete the file afterwards, only when every item succeeded
        #[arg(long)]
        remove_file: bool,
    },

    /// Assemble token-budgeted context for a query
    Recall {
        query: String,
        /// Token budget
        #[arg(short, long, default_value_t = 4000)]
        budget: usize,
        /// Restrict to one memory type
        #[arg(short = 't', long)]
        mem_type: Option<String>,
        /// Session to attribute accesses to
        #[arg(short, long)]
        session: Option<String>,
        /// Compact one-line-per-memory output
        #[arg(long)]
        short: bool,
    },

    /// Raw search over the store
    Search {
        query: String,
        /// hybrid, semantic, or fts
        #[arg(short, long, default_value = "hybrid")]
        mode: String,
        /// Maximum results
        #[arg(short, default_value_t = 10)]
        k: usize,
        /// Restrict to one memory type
        #[arg(short = 't', long)]
        mem_type: Option<String>,
        /// Rerank candidates with the cross-encoder
        #[arg(long)]
        rerank: bool,
        /// Recency window, e.g. 12h, 7d, 2w, 1m
        #[arg(long)]
        since: Option<String>,
        /// Breadth-first link expansion depth
        #[arg(long, default_value_t = 0)]
        hops: usize,
    },

    /// Show a memory with its tags and links
    Get { id: i64 },

    /// Update fields of a memory (title/content changes re-embed)
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
        #[arg(short, long)]
        importance: Option<f64>,
        #[arg(long)]
        strength: Option<f64>,
    },

    /// Hard-delete a memory (cascades to tags, links, access log)
    Delete { id: i64 },

    /// Create or replace a directed link between two memories
    Link {
        source: i64,
        target: i64,
        /// related_to, caused_by, evolved_from, contradicts, supersedes
        #[arg(short, long, default_value = "related_to")]
        relation: String,
    },

    /// Tag operations
    Tag {
        #[command(subcommand)]
        action: TagCommands,
    },

    /// Toggle the permanent tag on a memory
    Mark {
        id: i64,
        /// Remove the permanent tag instead of adding it
        #[arg(long)]
        remove: bool,
    },

    /// Session tracking
    Session {
        #[command(subcommand)]
        action: SessionCommands,
    },

    /// Run the sleep cycle: decay, prune, merge, boost
    Sleep {
        /// Report what would happen without mutating
        #[arg(long)]
        dry_run: bool,
        /// Per-day strength multiplier
        #[arg(long, default_value_t = 0.95)]
        decay_rate: f64,
        /// Archive memories below this strength
        #[arg(long = "prune", default_value_t = 0.05)]
        prune_threshold: f64,
        /// Merge same-type memories above this similarity
        #[arg(long = "merge", default_value_t = 0.92)]
        merge_threshold: f32,
    },

    /// Show memory statistics
    Stats,

    /// Weakest memories and near-duplicate pairs
    Diagnostics {
        /// How many weak memories to list
        #[arg(short, default_value_t = 10)]
        n: usize,
        /// Similarity threshold for duplicate pairs
        #[arg(long, default_value_t = 0.85)]
        dup_threshold: f32,
    },

    /// Dump all memories
    Export {
        /// json or md
        #[arg(short, long, default_value = "json")]
        format: String,
        /// Output path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Attach tags to a memory
    Add {
        id: i64,
        /// Comma-separated tags
        tags: String,
    },
    /// Detach a tag from a memory
    Remove { id: i64, tag: String },
    /// List all tags with usage counts
    List,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Start (or restart) a session
    Start {
        /// Session id; generated when omitted
        id: Option<String>,
        #[arg(short, long)]
        title: Option<String>,
    },
    /// End a session, optionally attaching a summary
    End {
        id: String,
        #[arg(short, long)]
        summary: Option<String>,
        /// Run the sleep cycle afterwards if one is due
        #[arg(long)]
        auto_consolidate: bool,
    },
    /// Show a session and the memories accessed under it
    Show { id: String },
    /// List sessions, newest first
    List {
        #[arg(short, long, default_value_t = 20)]
        n: usize,
    },
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Diagnostic logging to stderr when ENGRAM_TRACE=1
fn init_tracing() {
    if std::env::var("ENGRAM_TRACE").as_deref() == Ok("1") {
        use tracing_subscriber::EnvFilter;
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .init();
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let storage = Storage::open(cli.db).context("failed to open memory store")?;

    match cli.command {
        Commands::Add {
            mem_type,
            title,
            content,
            tags,
            importance,
            permanent,
            no_auto_link,
            conversation,
        } => run_add(
            &storage,
            mem_type,
            title,
            content,
            tags,
            importance,
            permanent,
            no_auto_link,
            conversation,
        ),
        Commands::Ingest {
            json,
            file,
            remove_file,
        } => run_ingest(&storage, json, file, remove_file),
        Commands::Recall {
            query,
            budget,
            mem_type,
            session,
            short,
        } => run_recall(&storage, query, budget, mem_type, session, short),
        Commands::Search {
            query,
            mode,
            k,
            mem_type,
            rerank,
            since,
            hops,
        } => run_search(&storage, query, mode, k, mem_type, rerank, since, hops),
        Commands::Get { id } => run_get(&storage, id),
        Commands::Update {
            id,
            title,
            content,
            importance,
            strength,
        } => run_update(&storage, id, title, content, importance, strength),
        Commands::Delete { id } => run_delete(&storage, id),
        Commands::Link {
            source,
            target,
            relation,
        } => run_link(&storage, source, target, relation),
        Commands::Tag { action } => run_tag(&storage, action),
        Commands::Mark { id, remove } => run_mark(&storage, id, remove),
        Commands::Session { action } => run_session(&storage, action),
        Commands::Sleep {
            dry_run,
            decay_rate,
            prune_threshold,
            merge_threshold,
        } => run_sleep(&storage, dry_run, decay_rate, prune_threshold, merge_threshold),
        Commands::Stats => run_stats(&storage),
        Commands::Diagnostics { n, dup_threshold } => run_diagnostics(&storage, n, dup_threshold),
        Commands::Export { format, output } => run_export(&storage, format, output),
    }
}

fn parse_mem_type(s: &str) -> anyhow::Result<MemoryType> {
    MemoryType::from_str(s).map_err(|e| anyhow::anyhow!(e))
}

fn parse_tags(tags: Option<String>) -> Vec<String> {
    tags.as_deref()
        .map(|t| {
            t.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[allow(clippy::too_many_arguments)]
fn run_add(
    storage: &Storage,
    mem_type: String,
    title: String,
    content: String,
    tags: Option<String>,
    importance: f64,
    permanent: bool,
    no_auto_link: bool,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    let mut tags = parse_tags(tags);
    if permanent {
        tags.push("permanent".to_string());
    }

    let outcome = storage.add(AddInput {
        mem_type: parse_mem_type(&mem_type)?,
        title,
        content,
        importance,
        tags,
        links: Vec::<LinkSpec>::new(),
        source_conversation_id: conversation,
        auto_link: !no_auto_link,
        ..Default::default()
    })?;

    let status = match outcome.status {
        AddStatus::Created => "created".green().bold(),
        AddStatus::Duplicate => "duplicate".yellow().bold(),
        AddStatus::Merged => "merged".cyan().bold(),
    };
    println!("{} memory #{}", status, outcome.id);
    if let Some(into) = outcome.merged_into {
        println!("  folded into #{}", into);
    }
    Ok(())
}

fn run_ingest(
    storage: &Storage,
    json: Option<String>,
    file: Option<PathBuf>,
    remove_file: bool,
) -> anyhow::Result<()> {
    let payload = match (&json, &file) {
        (Some(inline), None) => inline.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        _ => bail!("provide either inline JSON or --file, not both"),
    };

    let items: Vec<AddInput> =
        serde_json::from_str(&payload).context("ingest payload must be a JSON array of memories")?;
    let total = items.len();

    let mut failures: Vec<(usize, String)> = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        match storage.add(item) {
            Ok(outcome) => {
                let status = match outcome.status {
                    AddStatus::Created => "OK".green(),
                    AddStatus::Duplicate => "DUP".yellow(),
                    AddStatus::Merged => "MRG".cyan(),
                };
                println!("[{}/{}] {} #{}", i + 1, total, status, outcome.id);
            }
            Err(e) => {
                println!("[{}/{}] {} {}", i + 1, total, "FAIL".red(), e);
                failures.push((i, e.to_string()));
            }
        }
    }

    if failures.is_empty() {
        if remove_file {
            if let Some(path) = &file {
                std::fs::remove_file(path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                println!("removed {}", path.display());
            }
        }
        println!("{}", format!("ingested {} memories", total).green().bold());
        Ok(())
    } else {
        bail!("{}/{} items failed; file kept", failures.len(), total);
    }
}

fn run_recall(
    storage: &Storage,
    query: String,
    budget: usize,
    mem_type: Option<String>,
    session: Option<String>,
    short: bool,
) -> anyhow::Result<()> {
    let opts = RecallOptions {
        budget,
        mem_type: mem_type.as_deref().map(parse_mem_type).transpose()?,
        session_id: session,
        ..Default::default()
    };
    let result = storage.recall(&query, &opts)?;

    if short {
        for recalled in &result.memories {
            println!(
                "#{:<5} {:.4} [{}] {}",
                recalled.memory.id,
                recalled.composite,
                recalled.memory.mem_type,
                recalled.memory.title
            );
        }
        println!(
            "{}",
            format!(
                "{} memories | ~{} tokens",
                result.memories.len(),
                result.total_tokens_estimate
            )
            .dimmed()
        );
    } else {
        print!("{}", engram_core::focus::render_markdown(&result));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_search(
    storage: &Storage,
    query: String,
    mode: String,
    k: usize,
    mem_type: Option<String>,
    rerank: bool,
    since: Option<String>,
    hops: usize,
) -> anyhow::Result<()> {
    let mode = SearchMode::from_str(&mode).map_err(|e| anyhow::anyhow!(e))?;
    let opts = SearchOptions {
        k,
        mem_type: mem_type.as_deref().map(parse_mem_type).transpose()?,
        since,
        rerank,
        hops,
        ..Default::default()
    };

    let hits = match mode {
        SearchMode::Semantic => storage.search_semantic(&query, &opts)?,
        SearchMode::Fts => storage.search_fts(&query, &opts)?,
        SearchMode::Hybrid => storage.search_hybrid(&query, &opts)?,
    };

    if hits.is_empty() {
        println!("{}", "no matches".dimmed());
        return Ok(());
    }

    for hit in &hits {
        println!(
            "#{:<5} {:>8.4} {:?} [{}] {}",
            hit.memory.id,
            hit.score,
            hit.match_kind,
            hit.memory.mem_type,
            hit.memory.title
        );
        let preview = truncate(&hit.memory.content, 96);
        if !preview.is_empty() {
            println!("       {}", preview.dimmed());
        }
    }
    Ok(())
}

fn run_get(storage: &Storage, id: i64) -> anyhow::Result<()> {
    let Some(detail) = storage.get_detail(id)? else {
        bail!("memory {} not found", id);
    };
    let m = &detail.memory;

    println!("{}", format!("=== Memory #{} ===", m.id).cyan().bold());
    println!("{}: [{}] {}", "title".white().bold(), m.mem_type, m.title);
    println!("{}: {:.2}", "importance".white().bold(), m.importance);
    println!("{}: {:.3}", "strength".white().bold(), m.strength);
    println!("{}: {}", "accesses".white().bold(), m.access_count);
    if let Some(at) = m.last_accessed_at {
        println!("{}: {}", "last access".white().bold(), at.to_rfc3339());
    }
    println!("{}: {}", "created".white().bold(), m.created_at.to_rfc3339());
    if m.archived {
        println!("{}", "archived".yellow().bold());
    }
    if !detail.tags.is_empty() {
        println!("{}: {}", "tags".white().bold(), detail.tags.join(", "));
    }
    for link in &detail.links_out {
        println!("  -> #{} ({}, {:.2})", link.target_id, link.relation, link.strength);
    }
    for link in &detail.links_in {
        println!("  <- #{} ({}, {:.2})", link.source_id, link.relation, link.strength);
    }
    if !m.content.is_empty() {
        println!("\n{}", m.content);
    }
    Ok(())
}

fn run_update(
    storage: &Storage,
    id: i64,
    title: Option<String>,
    content: Option<String>,
    importance: Option<f64>,
    strength: Option<f64>,
) -> anyhow::Result<()> {
    let patch = UpdatePatch {
        title,
        content,
        importance,
        strength,
    };
    if storage.update(id, patch)? {
        println!("{} memory #{}", "updated".green().bold(), id);
        Ok(())
    } else {
        bail!("memory {} not found", id);
    }
}

fn run_delete(storage: &Storage, id: i64) -> anyhow::Result<()> {
    if storage.delete(id)? {
        println!("{} memory #{}", "deleted".green().bold(), id);
        Ok(())
    } else {
        bail!("memory {} not found", id);
    }
}

fn run_link(storage: &Storage, source: i64, target: i64, relation: String) -> anyhow::Result<()> {
    let relation = LinkRelation::from_str(&relation).map_err(|e| anyhow::anyhow!(e))?;
    if storage.link(source, target, relation)? {
        println!(
            "{} #{} -> #{} ({})",
            "linked".green().bold(),
            source,
            target,
            relation
        );
        Ok(())
    } else {
        bail!("link endpoints must both exist");
    }
}

fn run_tag(storage: &Storage, action: TagCommands) -> anyhow::Result<()> {
    match action {
        TagCommands::Add { id, tags } => {
            if storage.get(id)?.is_none() {
                bail!("memory {} not found", id);
            }
            let tags = parse_tags(Some(tags));
            storage.add_tags(id, &tags)?;
            println!("{} {} tag(s) on #{}", "added".green().bold(), tags.len(), id);
        }
        TagCommands::Remove { id, tag } => {
            if storage.remove_tag(id, &tag)? {
                println!("{} '{}' from #{}", "removed".green().bold(), tag, id);
            } else {
                bail!("memory {} does not carry tag '{}'", id, tag);
            }
        }
        TagCommands::List => {
            for (name, count) in storage.list_tags()? {
                println!("{:>5}  {}", count, name);
            }
        }
    }
    Ok(())
}

fn run_mark(storage: &Storage, id: i64, remove: bool) -> anyhow::Result<()> {
    if storage.mark_permanent(id, !remove)? {
        let verb = if remove { "unmarked" } else { "marked permanent" };
        println!("{} memory #{}", verb.green().bold(), id);
        Ok(())
    } else {
        bail!("memory {} not found", id);
    }
}

fn run_session(storage: &Storage, action: SessionCommands) -> anyhow::Result<()> {
    match action {
        SessionCommands::Start { id, title } => {
            let session = storage.session_start(id, title)?;
            println!("{} session {}", "started".green().bold(), session.id);
        }
        SessionCommands::End {
            id,
            summary,
            auto_consolidate,
        } => {
            if !storage.session_end(&id, summary.as_deref())? {
                bail!("session {} not found", id);
            }
            println!("{} session {}", "ended".green().bold(), id);

            if auto_consolidate && storage.should_consolidate(3.0)? {
                println!("consolidation due, running sleep cycle...");
                let report = storage.run_consolidation(&ConsolidationOptions::default())?;
                print_sleep_report(&report);
            }
        }
        SessionCommands::Show { id } => {
            let Some(context) = storage.session_context(&id)? else {
                bail!("session {} not found", id);
            };
            let s = &context.session;
            println!("{}", format!("=== Session {} ===", s.id).cyan().bold());
            if let Some(title) = &s.title {
                println!("{}: {}", "title".white().bold(), title);
            }
            println!("{}: {}", "started".white().bold(), s.started_at.to_rfc3339());
            if let Some(ended) = s.ended_at {
                println!("{}: {}", "ended".white().bold(), ended.to_rfc3339());
            }
            if let Some(summary) = &s.summary {
                println!("{}: {}", "summary".white().bold(), summary);
            }
            println!();
            for memory in &context.memories {
                println!("#{:<5} [{}] {}", memory.id, memory.mem_type, memory.title);
            }
        }
        SessionCommands::List { n } => {
            let sessions = storage.session_list(&SessionFilter {
                limit: n,
                ..Default::default()
            })?;
            for s in sessions {
                let state = if s.ended_at.is_some() {
                    "ended".dimmed()
                } else {
                    "open".green()
                };
                println!(
                    "{}  {}  {}",
                    s.started_at.format("%Y-%m-%d %H:%M"),
                    state,
                    s.title.as_deref().unwrap_or(&s.id)
                );
            }
        }
    }
    Ok(())
}

fn print_sleep_report(report: &engram_core::ConsolidationReport) {
    println!("{}: {}", "decayed".white().bold(), report.decayed);
    println!("{}: {}", "pruned".white().bold(), report.pruned);
    println!("{}: {}", "merged".white().bold(), report.merged);
    println!("{}: {}", "boosted".white().bold(), report.boosted);
    println!("{}: {}ms", "duration".white().bold(), report.duration_ms);
}

fn run_sleep(
    storage: &Storage,
    dry_run: bool,
    decay_rate: f64,
    prune_threshold: f64,
    merge_threshold: f32,
) -> anyhow::Result<()> {
    let opts = ConsolidationOptions {
        decay_rate,
        prune_threshold,
        merge_threshold,
        dry_run,
        ..Default::default()
    };

    let header = if dry_run {
        "=== Sleep Cycle (dry run) ==="
    } else {
        "=== Sleep Cycle ==="
    };
    println!("{}", header.cyan().bold());

    let report = storage.run_consolidation(&opts)?;
    print_sleep_report(&report);

    if dry_run {
        let preview = storage.consolidation_preview(&opts)?;
        if !preview.weakest.is_empty() {
            println!();
            println!("{}", "weakest memories:".yellow().bold());
            for memory in &preview.weakest {
                println!(
                    "  #{:<5} {:.3} [{}] {}",
                    memory.id, memory.strength, memory.mem_type, memory.title
                );
            }
        }
        println!(
            "{}: {}",
            "would-merge candidates".white().bold(),
            preview.merge_candidates
        );
    }
    Ok(())
}

fn run_stats(storage: &Storage) -> anyhow::Result<()> {
    let stats = storage.stats()?;

    println!("{}", "=== Engram Statistics ===".cyan().bold());
    println!("{}: {}", "memories".white().bold(), stats.total);
    println!("{}: {}", "archived".white().bold(), stats.archived);
    for (mem_type, count) in &stats.by_type {
        println!("  {:<16} {}", mem_type, count);
    }
    println!(
        "{}: {:.2}",
        "avg importance".white().bold(),
        stats.average_importance
    );
    println!(
        "{}: {:.2}",
        "avg strength".white().bold(),
        stats.average_strength
    );
    println!(
        "{}: {}",
        "with embeddings".white().bold(),
        stats.with_embeddings
    );
    println!("{}: {}", "tags".white().bold(), stats.tag_count);
    println!("{}: {}", "links".white().bold(), stats.link_count);
    println!("{}: {}", "sessions".white().bold(), stats.session_count);
    match stats.last_consolidation_at {
        Some(at) => println!("{}: {}", "last sleep".white().bold(), at.to_rfc3339()),
        None => println!("{}: never", "last sleep".white().bold()),
    }
    if storage.is_brute_force() {
        println!(
            "{}",
            "vector index unavailable - kNN runs as exact scan".yellow()
        );
    }
    Ok(())
}

fn run_diagnostics(storage: &Storage, n: usize, dup_threshold: f32) -> anyhow::Result<()> {
    println!("{}", "=== Engram Diagnostics ===".cyan().bold());

    let weakest = storage.weakest(n)?;
    if weakest.is_empty() {
        println!("{}", "no memories".dimmed());
    } else {
        println!("{}", "weakest memories:".yellow().bold());
        for memory in &weakest {
            println!(
                "  #{:<5} {:.3} [{}] {}",
                memory.id, memory.strength, memory.mem_type, memory.title
            );
        }
    }

    let pairs = storage.duplicate_candidates(dup_threshold)?;
    println!();
    if pairs.is_empty() {
        println!(
            "{}",
            format!("no duplicate pairs above {:.2}", dup_threshold).dimmed()
        );
    } else {
        println!("{}", "near-duplicate pairs:".yellow().bold());
        for pair in pairs.iter().take(50) {
            println!(
                "  {:.3}  #{} '{}' / #{} '{}'",
                pair.similarity,
                pair.first_id,
                truncate(&pair.first_title, 32),
                pair.second_id,
                truncate(&pair.second_title, 32)
            );
        }
    }
    Ok(())
}

fn run_export(storage: &Storage, format: String, output: Option<PathBuf>) -> anyhow::Result<()> {
    let records = storage.export_records()?;

    let rendered = match format.as_str() {
        "json" => {
            let mut s = serde_json::to_string_pretty(&records)?;
            s.push('\n');
            s
        }
        "md" => {
            let mut s = String::new();
            for record in &records {
                let m = &record.memory;
                s.push_str(&format!("## [{}] {} (#{})\n\n", m.mem_type, m.title, m.id));
                if !record.tags.is_empty() {
                    s.push_str(&format!("_tags: {}_\n\n", record.tags.join(", ")));
                }
                if !m.content.is_empty() {
                    s.push_str(m.content.trim_end());
                    s.push_str("\n\n");
                }
            }
            s
        }
        other => bail!("invalid format '{}': expected json or md", other),
    };

    match output {
        Some(path) => {
            let mut file = std::fs::File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            file.write_all(rendered.as_bytes())?;
            println!(
                "{}",
                format!("exported {} memories to {}", records.len(), path.display())
                    .green()
                    .bold()
            );
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

/// Truncate a string for display (UTF-8 safe)
fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_chars {
        s
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
