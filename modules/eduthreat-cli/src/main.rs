mod export;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use eduthreat_common::Config;
use eduthreat_enrich::{
    dedupe_by_institution, ArticleFetcher, EnrichOptions, EnrichmentPipeline,
    LlmEnrichmentExtractor,
};
use eduthreat_ingest::{IngestConfig, Orchestrator, SourceGroup, SourceRegistry};
use eduthreat_store::Store;

#[derive(Parser)]
#[command(name = "eduthreat", about = "Education-sector threat intelligence pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect incidents from the configured sources into the store.
    Ingest {
        /// Source groups to run: curated, news, rss. Defaults to all.
        #[arg(long, num_args = 1..)]
        groups: Option<Vec<String>>,
        /// Restrict to specific source tags within the selected groups.
        #[arg(long, num_args = 1..)]
        sources: Option<Vec<String>>,
        /// Page cap for paginated sources (default: all pages).
        #[arg(long)]
        max_pages: Option<u32>,
        /// Feed items older than this are ignored.
        #[arg(long, default_value_t = 1)]
        max_age_days: u32,
    },
    /// Fetch articles and run LLM enrichment over unenriched incidents.
    Enrich {
        /// Max incidents this run (default: all ready).
        #[arg(long)]
        limit: Option<usize>,
        /// Keep incidents the LLM flags as out of sector instead of
        /// skipping them permanently.
        #[arg(long)]
        keep_non_education: bool,
        /// Seconds between LLM calls.
        #[arg(long, default_value_t = 1.0)]
        rate_limit_delay: f64,
        #[arg(long, default_value_t = 2.0)]
        fetch_min_delay: f64,
        #[arg(long, default_value_t = 5.0)]
        fetch_max_delay: f64,
        #[arg(long, default_value_t = 10)]
        fetches_per_hour: usize,
        /// Institutional dedup window after enrichment, in days.
        #[arg(long, default_value_t = 14)]
        dedup_window_days: i64,
        /// Domains to exclude from fetching this run.
        #[arg(long, num_args = 1..)]
        exclude_domains: Vec<String>,
        /// Export the enriched dataset after the run.
        #[arg(long)]
        export_csv: Option<PathBuf>,
    },
    /// Export the enriched dataset as CSV.
    Export {
        #[arg(long, default_value = "data/enriched_dataset.csv")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("eduthreat=info".parse()?))
        .init();

    match Cli::parse().command {
        Command::Ingest {
            groups,
            sources,
            max_pages,
            max_age_days,
        } => ingest(groups, sources, max_pages, max_age_days).await,
        Command::Enrich {
            limit,
            keep_non_education,
            rate_limit_delay,
            fetch_min_delay,
            fetch_max_delay,
            fetches_per_hour,
            dedup_window_days,
            exclude_domains,
            export_csv,
        } => {
            enrich(
                limit,
                keep_non_education,
                rate_limit_delay,
                fetch_min_delay,
                fetch_max_delay,
                fetches_per_hour,
                dedup_window_days,
                exclude_domains,
                export_csv,
            )
            .await
        }
        Command::Export { output } => export(output).await,
    }
}

fn parse_groups(groups: Option<Vec<String>>) -> Result<Vec<SourceGroup>> {
    let Some(groups) = groups else {
        return Ok(vec![SourceGroup::Curated, SourceGroup::News, SourceGroup::Rss]);
    };
    groups
        .iter()
        .map(|g| match SourceGroup::parse(g) {
            Some(group) => Ok(group),
            None => bail!("unknown source group: {g} (expected curated, news, or rss)"),
        })
        .collect()
}

async fn ingest(
    groups: Option<Vec<String>>,
    sources: Option<Vec<String>>,
    max_pages: Option<u32>,
    max_age_days: u32,
) -> Result<()> {
    let config = Config::ingest_from_env();
    config.log_redacted();

    let store = Store::open(&config.db_path).await?;
    let http = reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36")
        .timeout(Duration::from_secs(20))
        .build()?;
    let registry = SourceRegistry::standard(http);

    if let Some(ref requested) = sources {
        let known = registry.all_tags();
        for tag in requested {
            if !known.contains(tag) {
                bail!("unknown source tag: {tag} (known: {})", known.join(", "));
            }
        }
    }

    let orchestrator = Orchestrator::new(store, registry);
    let stats = orchestrator
        .run(&IngestConfig {
            groups: parse_groups(groups)?,
            sources,
            max_pages,
            max_age_days: Some(max_age_days),
        })
        .await?;

    info!("{stats}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn enrich(
    limit: Option<usize>,
    keep_non_education: bool,
    rate_limit_delay: f64,
    fetch_min_delay: f64,
    fetch_max_delay: f64,
    fetches_per_hour: usize,
    dedup_window_days: i64,
    exclude_domains: Vec<String>,
    export_csv: Option<PathBuf>,
) -> Result<()> {
    let config = Config::enrich_from_env();
    config.log_redacted();

    let options = EnrichOptions {
        limit,
        skip_non_education: !keep_non_education,
        rate_limit_delay: Duration::from_secs_f64(rate_limit_delay),
        fetch_min_delay: Duration::from_secs_f64(fetch_min_delay),
        fetch_max_delay: Duration::from_secs_f64(fetch_max_delay),
        fetches_per_hour_cap: fetches_per_hour,
        exclude_domains,
        queue_capacity: 32,
    };

    let pipeline = EnrichmentPipeline::new(
        config.db_path.clone(),
        options,
        Arc::new(ArticleFetcher::new()),
        Arc::new(LlmEnrichmentExtractor::new(
            &config.anthropic_api_key,
            &config.llm_model,
        )),
    );
    let stats = pipeline.run().await?;
    info!("{stats}");

    let store = Store::open(&config.db_path).await?;
    if stats.enriched > 0 {
        let dedup_stats = dedupe_by_institution(&store, dedup_window_days).await?;
        info!("{dedup_stats}");
    }

    if let Some(path) = export_csv {
        export::export_enriched_csv(&store, &path).await?;
    }
    Ok(())
}

async fn export(output: PathBuf) -> Result<()> {
    let config = Config::export_from_env();
    let store = Store::open_read_only(&config.db_path).await?;
    let rows = export::export_enriched_csv(&store, &output).await?;
    info!(rows, "Export complete");
    Ok(())
}
