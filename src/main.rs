//! # starshelf CLI (`shelf`)
//!
//! Sync, enrich and search your starred GitHub repositories.
//!
//! ## Usage
//!
//! ```bash
//! shelf --config ./config/shelf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shelf init` | Create the SQLite database and run schema migrations |
//! | `shelf sync [--full]` | Pull starred repositories into the local store |
//! | `shelf enrich` | Fetch readmes, summarize, tag and embed pending items |
//! | `shelf status` | Item counts, enrichment job progress, index stats |
//! | `shelf search "<query>"` | Hybrid search over the shelf |
//! | `shelf export` / `shelf import <file>` | Backup bundles |
//! | `shelf serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! shelf init
//! shelf sync
//! shelf enrich --progress human
//! shelf search "terminal file manager" --explain
//! shelf export --output shelf-backup.json
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` to change the level.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use starshelf::backup;
use starshelf::config;
use starshelf::context::AppContext;
use starshelf::enrich::EnrichOptions;
use starshelf::migrate;
use starshelf::progress::ProgressMode;
use starshelf::server;
use starshelf::sync::{self, LAST_SYNC_KEY, PROFILE_LOGIN_KEY};
use starshelf_core::index::IndexBackend;
use starshelf_core::retrieval::{RetrievalOptions, SearchOutcome};
use starshelf_core::store::ItemStore;

#[derive(Parser)]
#[command(
    name = "shelf",
    about = "starshelf: sync, enrich and search your starred GitHub repositories",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/shelf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    Init,

    /// Pull starred repositories from GitHub.
    Sync {
        /// Read every page and drop items that are no longer starred.
        #[arg(long)]
        full: bool,
    },

    /// Summarize, tag and embed items that need it.
    Enrich {
        /// Re-fetch readmes and re-enrich every item.
        #[arg(long)]
        force: bool,

        /// Stop after this many chunks; the job resumes on the next run.
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Progress output on stderr (defaults to human when stderr is a TTY).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show item counts, job progress and index stats.
    Status,

    /// Search the shelf.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Show the score breakdown for every result.
        #[arg(long)]
        explain: bool,

        /// Skip AI query rewriting.
        #[arg(long)]
        no_rewrite: bool,

        /// Skip AI re-ranking.
        #[arg(long)]
        no_rerank: bool,

        /// Print the raw result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write a backup bundle (to stdout unless --output is given).
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Replace the store with a backup bundle.
    Import { file: PathBuf },

    /// Start the HTTP API.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("starshelf=info,starshelf_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { full } => {
            let ctx = AppContext::open(cfg).await?;
            let report = sync::run_sync(
                &*ctx.store,
                &*ctx.indexes,
                &*ctx.source,
                ctx.config.github.stop_streak,
                full,
            )
            .await?;
            println!("sync{}", if full { " (full)" } else { "" });
            println!("  pages: {}", report.pages);
            println!("  fetched: {}", report.fetched);
            println!("  added: {}", report.added);
            println!("  updated: {}", report.updated);
            if full {
                println!("  removed: {}", report.removed);
            }
            println!("ok");
        }
        Commands::Enrich {
            force,
            max_chunks,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let ctx = AppContext::open_with_progress(cfg, Arc::from(mode.reporter())).await?;
            let report = ctx
                .enrichment
                .run(EnrichOptions { force, max_chunks })
                .await?;
            println!("enrich{}", if report.resumed { " (resumed)" } else { "" });
            println!("  processed: {}", report.processed);
            println!("  enriched: {}", report.enriched);
            println!("  failed: {}", report.failed);
            println!("  remaining: {}", report.remaining);
            println!("ok");
        }
        Commands::Status => {
            let ctx = AppContext::open(cfg).await?;
            print_status(&ctx).await?;
        }
        Commands::Search {
            query,
            limit,
            explain,
            no_rewrite,
            no_rerank,
            json,
        } => {
            let ctx = AppContext::open(cfg).await?;
            let opts = RetrievalOptions {
                rewrite: ctx.config.ai.rewrite_queries && !no_rewrite,
                rerank: ctx.config.ai.rerank && !no_rerank,
                explain,
                limit: limit.unwrap_or(ctx.config.retrieval.final_limit).max(1),
            };
            let outcome = ctx.retrieval.search(&query, &opts).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_results(&outcome, opts.limit);
            }
        }
        Commands::Export { output } => {
            let ctx = AppContext::open(cfg).await?;
            backup::write_bundle(&*ctx.store, output.as_deref()).await?;
        }
        Commands::Import { file } => {
            let ctx = AppContext::open(cfg).await?;
            let bundle = backup::read_bundle(&*ctx.store, &file).await?;
            ctx.reload_indexes().await?;
            println!(
                "Imported {} items, {} jobs, {} settings.",
                bundle.items.len(),
                bundle.jobs.len(),
                bundle.settings.len()
            );
        }
        Commands::Serve => {
            let ctx = AppContext::open(cfg).await?;
            server::run_server(Arc::new(ctx)).await?;
        }
    }

    Ok(())
}

async fn print_status(ctx: &AppContext) -> Result<()> {
    let status = ctx.enrichment.status().await?;
    let stats = ctx.indexes.stats().await?;
    let login = ctx.store.get_setting(PROFILE_LOGIN_KEY).await?;
    let last_sync = ctx.store.get_setting(LAST_SYNC_KEY).await?;

    println!("items: {}", status.total_items);
    println!("  enriched: {}", status.total_items - status.pending_items);
    println!("  pending: {}", status.pending_items);
    match &status.job {
        Some(job) => println!("job {}: {}/{} done", job.id, job.done, job.total),
        None => println!("job: none"),
    }
    println!(
        "index: {} docs, {} vectors ({})",
        stats.lexical_docs, stats.vectors, stats.vector_version
    );
    println!("account: {}", login.as_deref().unwrap_or("-"));
    println!("last sync: {}", last_sync.as_deref().unwrap_or("never"));
    Ok(())
}

fn print_results(outcome: &SearchOutcome, limit: usize) {
    if outcome.items.is_empty() {
        println!("No results.");
        return;
    }
    let shown = if outcome.reset {
        &outcome.items[..outcome.items.len().min(limit)]
    } else {
        &outcome.items[..]
    };
    for (i, ranked) in shown.iter().enumerate() {
        let item = &ranked.item;
        println!("{}. {}  ★{}", i + 1, item.full_name, item.stargazers);
        if let Some(text) = item.ai_summary.as_deref().or(item.description.as_deref()) {
            println!("    {}", text);
        }
        if let Some(url) = &item.html_url {
            println!("    {}", url);
        }
        if let Some(state) = &ranked.explain {
            println!(
                "    tier={} title={:.2} desc={:.2} readme={:.2} code={:.2} blended={:.3} ai_rank={}",
                state.hard_priority,
                state.title,
                state.desc,
                state.readme,
                state.code,
                state.blended,
                state
                    .ai_rank
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }
    if outcome.reset && outcome.items.len() > shown.len() {
        println!("({} more)", outcome.items.len() - shown.len());
    }
}
