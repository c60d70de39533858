mod audit;
mod canon;
mod collector;
mod contact;
mod error;
mod http;
mod issues;
mod models;
mod output;
mod retry;
mod search;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};

use crate::audit::{PageSpeedClient, Scorer};
use crate::collector::{Collector, CollectorOptions};
use crate::contact::ContactExtractor;
use crate::http::HttpClient;
use crate::search::GoogleSearch;
use crate::settings::Settings;

#[derive(Parser)]
#[command(
    name = "lead_finder",
    about = "Find small-business websites with poor audit scores and collect their contacts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SearchArgs {
    /// City to search in
    #[arg(short, long)]
    city: String,
    /// Business category (repeatable; default: configured categories)
    #[arg(long = "category")]
    categories: Vec<String>,
    /// Config file (default: lead_finder.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, audit and enrich leads, then write them as JSON
    Run {
        #[command(flatten)]
        target: SearchArgs,
        /// Output file (overwritten)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Worker pool size
        #[arg(short, long)]
        workers: Option<usize>,
        /// Max results taken from each query
        #[arg(long)]
        max_per_query: Option<usize>,
        /// Per-URL enrichment deadline in seconds
        #[arg(long)]
        task_timeout: Option<u64>,
    },
    /// Print the search queries a run would issue
    Queries {
        #[command(flatten)]
        target: SearchArgs,
    },
    /// Remove unwanted entries from existing result files
    Clean {
        /// Result files to clean
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            target,
            output,
            workers,
            max_per_query,
            task_timeout,
        } => {
            let mut settings = Settings::load(target.config.as_deref())?;
            if let Some(w) = workers {
                anyhow::ensure!(w > 0, "--workers must be at least 1");
                settings.workers = w;
            }
            if let Some(n) = max_per_query {
                settings.max_results_per_query = n;
            }
            if let Some(secs) = task_timeout {
                settings.task_timeout_secs = secs;
            }
            if let Some(path) = output {
                settings.output = path;
            }
            run(&settings, &target.city, &categories(&target, &settings)).await
        }
        Commands::Queries { target } => {
            let settings = Settings::load(target.config.as_deref())?;
            let queries = search::build_queries(
                &target.city,
                &categories(&target, &settings),
                &settings.query_templates,
            );
            for q in &queries {
                println!("{}", q.text);
            }
            println!("\n{} queries", queries.len());
            Ok(())
        }
        Commands::Clean { files } => {
            for file in &files {
                match output::clean_file(file) {
                    Ok(stats) => {
                        println!("Processed {}:", file.display());
                        println!("- Original entries:  {}", stats.original);
                        println!("- Removed entries:   {}", stats.removed);
                        println!("- Remaining entries: {}", stats.remaining());
                        println!("- Saved to: {}\n", stats.output.display());
                    }
                    Err(e) => eprintln!("Error processing {}: {:#}\n", file.display(), e),
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn categories(target: &SearchArgs, settings: &Settings) -> Vec<String> {
    if target.categories.is_empty() {
        settings.categories.clone()
    } else {
        target.categories.clone()
    }
}

async fn run(settings: &Settings, city: &str, categories: &[String]) -> anyhow::Result<()> {
    let (api_key, engine_id) = settings.search_credentials()?;
    if settings.pagespeed_api_key.is_none() {
        tracing::warn!("No PageSpeed API key configured; audits may be rate limited");
    }

    let http = HttpClient::new(settings.request_timeout())?;
    let search = GoogleSearch::new(http.clone(), api_key, engine_id, settings.retry.clone());
    let audit = PageSpeedClient::new(http.clone(), settings.pagespeed_api_key.clone());

    let collector = Collector::new(
        Arc::new(search),
        Scorer::new(Arc::new(audit), settings.retry.clone()),
        ContactExtractor::new(Arc::new(http)),
        CollectorOptions {
            workers: settings.workers,
            task_timeout: settings.task_timeout(),
            max_results_per_query: settings.max_results_per_query,
            max_leads: settings.max_leads,
            query_delay: Duration::from_millis(settings.query_delay_ms),
            thresholds: settings.thresholds,
        },
    );

    let queries = search::build_queries(city, categories, &settings.query_templates);
    println!(
        "Searching {} queries for {} ({} workers)...",
        queries.len(),
        city,
        settings.workers
    );
    let report = collector.run(city, &queries).await;

    output::write_leads(&settings.output, &report.leads)?;
    println!(
        "Wrote {} leads to {} ({} skipped, {} duplicates, {} excluded, {} failed queries)",
        report.leads.len(),
        settings.output.display(),
        report.skipped.len(),
        report.duplicates,
        report.excluded,
        report.failed_queries
    );
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
