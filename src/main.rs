use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

mod ai;
mod app;
mod classify;
mod config;
mod db;
mod dedup;
mod error;
mod extract;
mod models;
mod sources;

use app::{App, DedupOverrides, ShowTarget, ALL_SOURCES};
use config::Config;
use error::Result;

#[derive(Parser)]
#[command(name = "eventmerge", version, about = "Collects event posts from several sources into one deduplicated event table")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape a source (or `all`) and store its posts
    Fetch {
        #[arg(default_value = ALL_SOURCES)]
        source: String,
    },
    /// Classify stored posts and merge confirmed events
    Process {
        #[arg(long)]
        source: Option<String>,
    },
    /// List master events, optionally only those with a link from one source
    List {
        #[arg(default_value = ALL_SOURCES)]
        source: String,
        #[arg(long)]
        detailed: bool,
        /// List posts flagged for manual review instead
        #[arg(long)]
        flagged: bool,
    },
    /// Remove a source's links; events left without links are deleted
    Clear { source: String },
    /// Show one event: an id, `random` or `next`
    Show { target: String },
    /// Re-cluster the events of a source (or `all`) from scratch
    Deduplicate {
        #[arg(default_value = ALL_SOURCES)]
        source: String,
        #[arg(long)]
        title_similarity: Option<f64>,
        /// Maximum start time difference in minutes
        #[arg(long)]
        time_window: Option<i64>,
    },
    /// List merges refused because they would remap a linked post
    Incidents,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let app = App::new(config).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, finishing current posts...");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Fetch { source } => {
            let summary = app.fetch(&source, &cancel).await?;
            println!("Fetched {} posts", summary.fetched);
            if summary.cancelled {
                println!("(cancelled)");
            }
        }

        Command::Process { source } => {
            let summary = app.process(source.as_deref(), &cancel).await?;
            println!("{}", summary);
            for failure in &summary.failures {
                println!(
                    "  [{}] post {} ({}): {}",
                    failure.kind, failure.raw_post_id, failure.source, failure.detail
                );
            }
        }

        Command::List {
            source,
            detailed,
            flagged,
        } => {
            if flagged {
                for post in app.list_flagged().await? {
                    println!(
                        "post {} ({} {}): {}",
                        post.id,
                        post.source,
                        post.source_id,
                        post.review_reason.as_deref().unwrap_or_default()
                    );
                }
                return Ok(());
            }

            let events = app.list(Some(source.as_str())).await?;
            if events.is_empty() {
                println!("No events");
            }
            for event in &events {
                if detailed {
                    println!("{}\n", event.to_detailed_string());
                } else {
                    println!(
                        "#{:<5} {}  {}  ({} sources)",
                        event.id,
                        event.format_local(event.start, "%Y-%m-%d %H:%M"),
                        event.title,
                        event.links.len()
                    );
                }
            }
        }

        Command::Clear { source } => {
            let outcome = app.clear(&source).await?;
            println!(
                "Removed {} links and {} events",
                outcome.links_removed, outcome.events_removed
            );
        }

        Command::Show { target } => {
            let target: ShowTarget = target.parse()?;
            match app.show(target).await? {
                Some(event) => println!("{}", event.to_detailed_string()),
                None => println!("No matching event"),
            }
        }

        Command::Deduplicate {
            source,
            title_similarity,
            time_window,
        } => {
            let overrides = DedupOverrides {
                title_similarity,
                time_window_minutes: time_window,
            };
            let (summary, outcome) = app.deduplicate(&source, overrides).await?;
            println!(
                "{} drafts in {} clusters; rewrote {}, created {} events, removed {} events and {} stale links",
                outcome.drafts,
                outcome.clusters,
                outcome.clusters_rewritten,
                outcome.rewrite.events_created,
                outcome.rewrite.events_removed,
                outcome.rewrite.links_removed
            );
            for failure in &summary.failures {
                println!("  {} post {} ({}): {}", failure.kind, failure.raw_post_id, failure.source, failure.detail);
            }
        }

        Command::Incidents => {
            for incident in app.incidents().await? {
                println!(
                    "{} post {}: linked to #{}, attempted {}: {}",
                    incident.logged_at.format("%Y-%m-%d %H:%M:%S"),
                    incident.raw_post_id,
                    incident.existing_master_id,
                    incident
                        .attempted_master_id
                        .map(|id| format!("#{}", id))
                        .unwrap_or_else(|| "new event".to_string()),
                    incident.detail
                );
            }
        }
    }

    Ok(())
}
