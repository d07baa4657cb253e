//! The producer–consumer enrichment pipeline.
//!
//! One producer (the driver task) fetches articles under the domain rate
//! discipline and enqueues an enrichment task per incident that yielded at
//! least one stored article. One consumer task drains the queue strictly
//! sequentially — a single in-flight LLM request per process — committing
//! after every result. The queue carries only data; run completion travels
//! on a separate flag so the consumer can tell "empty right now" from
//! "will always be empty".

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use eduthreat_store::{SaveOutcome, Store};

use crate::error::Result;
use crate::extractor::{EnrichmentExtractor, ExtractionOutcome};
use crate::fetcher::ArticleFetch;
use crate::rate_limit::{DomainRateLimiter, RateLimiterConfig};
use crate::selector::{select_for_enrichment, OVERFETCH_FACTOR};

/// Consumer queue poll interval.
const QUEUE_POLL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Max incidents to process this run. `None` takes everything ready.
    pub limit: Option<usize>,
    /// Permanently skip incidents the LLM flags as out of sector.
    pub skip_non_education: bool,
    /// Pause between LLM calls.
    pub rate_limit_delay: Duration,
    pub fetch_min_delay: Duration,
    pub fetch_max_delay: Duration,
    pub fetches_per_hour_cap: usize,
    /// Domains excluded from selection this run (e.g. recently hostile).
    pub exclude_domains: Vec<String>,
    pub queue_capacity: usize,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            limit: None,
            skip_non_education: true,
            rate_limit_delay: Duration::from_secs(1),
            fetch_min_delay: Duration::from_secs(2),
            fetch_max_delay: Duration::from_secs(5),
            fetches_per_hour_cap: 10,
            exclude_domains: Vec::new(),
            queue_capacity: 32,
        }
    }
}

/// Minimal task snapshot. The consumer reloads the full incident and its
/// articles from the store for a fresh view.
#[derive(Debug, Clone)]
struct EnrichmentTask {
    incident_id: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichStats {
    pub selected: u32,
    /// Incidents with at least one stored article this run.
    pub fetched: u32,
    pub processed: u32,
    pub enriched: u32,
    pub skipped: u32,
    pub errors: u32,
    pub not_attempted: u32,
    pub rate_limit_halt: bool,
}

impl fmt::Display for EnrichStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Enrichment Complete ===")?;
        writeln!(f, "Selected:        {}", self.selected)?;
        writeln!(f, "Fetched:         {}", self.fetched)?;
        writeln!(f, "Processed:       {}", self.processed)?;
        writeln!(f, "Enriched:        {}", self.enriched)?;
        writeln!(f, "Skipped:         {}", self.skipped)?;
        writeln!(f, "Errors:          {}", self.errors)?;
        writeln!(f, "Not attempted:   {}", self.not_attempted)?;
        write!(
            f,
            "Rate-limit halt: {}",
            if self.rate_limit_halt { "yes" } else { "no" }
        )
    }
}

#[derive(Debug, Default)]
struct ConsumerStats {
    processed: u32,
    enriched: u32,
    skipped: u32,
    errors: u32,
    drained: u32,
    halted: bool,
}

pub struct EnrichmentPipeline {
    db_path: PathBuf,
    options: EnrichOptions,
    fetcher: Arc<dyn ArticleFetch>,
    extractor: Arc<dyn EnrichmentExtractor>,
}

impl EnrichmentPipeline {
    pub fn new(
        db_path: PathBuf,
        options: EnrichOptions,
        fetcher: Arc<dyn ArticleFetch>,
        extractor: Arc<dyn EnrichmentExtractor>,
    ) -> Self {
        Self {
            db_path,
            options,
            fetcher,
            extractor,
        }
    }

    pub async fn run(&self) -> Result<EnrichStats> {
        let store = Store::open(&self.db_path).await?;

        let db_stats = store.enrichment_stats().await?;
        info!(
            total = db_stats.total_incidents,
            enriched = db_stats.enriched,
            ready = db_stats.ready_for_enrichment,
            "Enrichment run starting"
        );

        let limit = self
            .options
            .limit
            .unwrap_or(db_stats.ready_for_enrichment as usize);
        let mut stats = EnrichStats::default();
        if limit == 0 {
            return Ok(stats);
        }

        let mut limiter = DomainRateLimiter::new(RateLimiterConfig {
            min_delay: self.options.fetch_min_delay,
            max_delay: self.options.fetch_max_delay,
            max_fetches_per_hour: self.options.fetches_per_hour_cap,
            block_duration: Duration::from_secs(3600),
        });

        let pool = store
            .unenriched_candidates(limit as i64 * OVERFETCH_FACTOR)
            .await?;
        let selected =
            select_for_enrichment(pool, limit, &mut limiter, &self.options.exclude_domains);
        stats.selected = selected.len() as u32;
        if selected.is_empty() {
            return Ok(stats);
        }

        let (tx, rx) = mpsc::channel::<EnrichmentTask>(self.options.queue_capacity);
        let fetch_complete = Arc::new(AtomicBool::new(false));

        // The consumer runs on its own task with its own store handle.
        let consumer_store = Store::open(&self.db_path).await?;
        let consumer = tokio::spawn(consumer_loop(
            consumer_store,
            rx,
            fetch_complete.clone(),
            self.extractor.clone(),
            self.options.skip_non_education,
            self.options.rate_limit_delay,
        ));

        // Producer: fetch articles and enqueue as soon as each incident has
        // something to enrich from.
        let total = selected.len();
        for (idx, candidate) in selected.into_iter().enumerate() {
            let incident_id = candidate.incident_id.clone();
            info!(
                %incident_id,
                progress = format!("{}/{total}", idx + 1),
                "Fetching articles"
            );

            let any_success = match self
                .fetch_incident_articles(&store, &candidate, &mut limiter)
                .await
            {
                Ok(any) => any,
                Err(e) => {
                    warn!(%incident_id, error = %e, "Article fetch pass failed");
                    stats.errors += 1;
                    stats.processed += 1;
                    continue;
                }
            };
            stats.processed += 1;

            if any_success {
                stats.fetched += 1;
                let task = EnrichmentTask {
                    incident_id: incident_id.clone(),
                };
                if tx.send(task).await.is_err() {
                    // The consumer closed the queue (rate-limit halt):
                    // everything from here on is not attempted.
                    stats.not_attempted += (total - idx) as u32;
                    warn!("Consumer halted; stopping article fetching");
                    break;
                }
            } else {
                warn!(%incident_id, "No articles could be fetched");
                stats.errors += 1;
            }
        }

        // Separate completion signal; the queue itself stays data-only.
        fetch_complete.store(true, Ordering::SeqCst);
        drop(tx);

        let consumer_stats = match consumer.await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Consumer task failed");
                ConsumerStats {
                    errors: 1,
                    ..ConsumerStats::default()
                }
            }
        };

        stats.enriched = consumer_stats.enriched;
        stats.skipped = consumer_stats.skipped;
        stats.errors += consumer_stats.errors;
        stats.not_attempted += consumer_stats.drained;
        stats.rate_limit_halt = consumer_stats.halted;

        info!(
            enriched = stats.enriched,
            skipped = stats.skipped,
            errors = stats.errors,
            "Enrichment run finished"
        );
        Ok(stats)
    }

    /// Fetch every not-yet-cached URL of one incident under the rate
    /// discipline. Returns whether at least one article is stored and
    /// usable (this run or a previous one).
    async fn fetch_incident_articles(
        &self,
        store: &Store,
        candidate: &eduthreat_store::CandidateRow,
        limiter: &mut DomainRateLimiter,
    ) -> Result<bool> {
        let cached = store.articles_for_incident(&candidate.incident_id).await?;
        let mut any_success = cached.iter().any(|a| a.fetch_successful);

        let mut newly_broken: Vec<String> = Vec::new();
        let mut newly_ok: Vec<String> = Vec::new();

        for url in candidate.urls() {
            if cached.iter().any(|a| a.url == url) {
                continue;
            }
            let Some(domain) = DomainRateLimiter::extract_domain(&url) else {
                warn!(%url, "Unparseable URL, skipping");
                continue;
            };
            if self.options.exclude_domains.contains(&domain) || !limiter.can_fetch(&domain) {
                // Blocked is not an error; the URL stays not-yet-fetched.
                continue;
            }

            limiter.wait(&domain).await;
            let content = self.fetcher.fetch(&url).await;
            limiter.record(&domain, content.fetch_successful);
            if content.was_forbidden() {
                limiter.record_forbidden(&domain);
            }

            store
                .save_article(&candidate.incident_id, &content.to_new_article())
                .await?;
            if content.fetch_successful {
                any_success = true;
                newly_ok.push(url);
            } else {
                newly_broken.push(url);
            }
        }

        if !newly_broken.is_empty() {
            store
                .mark_urls_broken(&candidate.incident_id, &newly_broken)
                .await?;
        }
        if !newly_ok.is_empty() {
            store
                .clear_broken_urls(&candidate.incident_id, &newly_ok)
                .await?;
        }

        Ok(any_success)
    }
}

async fn consumer_loop(
    store: Store,
    mut rx: mpsc::Receiver<EnrichmentTask>,
    fetch_complete: Arc<AtomicBool>,
    extractor: Arc<dyn EnrichmentExtractor>,
    skip_non_education: bool,
    rate_limit_delay: Duration,
) -> ConsumerStats {
    let mut stats = ConsumerStats::default();

    loop {
        let task = match tokio::time::timeout(QUEUE_POLL, rx.recv()).await {
            Ok(Some(task)) => task,
            // Channel closed and drained: the producer is done.
            Ok(None) => break,
            Err(_) => {
                if fetch_complete.load(Ordering::SeqCst) && rx.is_empty() {
                    info!(
                        processed = stats.processed,
                        "Fetching complete and queue empty, consumer exiting"
                    );
                    break;
                }
                continue;
            }
        };

        stats.processed += 1;
        let incident_id = task.incident_id;

        // Fresh snapshot: the queue payload may be stale.
        let row = match store.load_incident_row(&incident_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                warn!(%incident_id, "Incident vanished before enrichment");
                stats.errors += 1;
                continue;
            }
            Err(e) => {
                error!(%incident_id, error = %e, "Failed to reload incident");
                stats.errors += 1;
                continue;
            }
        };
        if row.enriched {
            info!(%incident_id, "Already enriched, skipping");
            stats.skipped += 1;
            continue;
        }
        let articles = match store.articles_for_incident(&incident_id).await {
            Ok(articles) => articles,
            Err(e) => {
                error!(%incident_id, error = %e, "Failed to load articles");
                stats.errors += 1;
                continue;
            }
        };

        match extractor.extract(&row, &articles).await {
            Ok(ExtractionOutcome::Enriched(result)) => {
                match store.save_enrichment(&incident_id, &result.to_update()).await {
                    Ok(SaveOutcome::Saved) => {
                        info!(%incident_id, "Enriched");
                        stats.enriched += 1;
                    }
                    Ok(SaveOutcome::SkippedLowerConfidence) => {
                        stats.skipped += 1;
                    }
                    Err(e) => {
                        error!(%incident_id, error = %e, "Failed to save enrichment");
                        stats.errors += 1;
                    }
                }
            }
            Ok(ExtractionOutcome::NotEducationRelated { reason }) => {
                if skip_non_education {
                    let full = format!("Not education-related: {reason}");
                    match store.mark_incident_skipped(&incident_id, &full).await {
                        Ok(()) => {
                            info!(%incident_id, %reason, "Marked skipped");
                            stats.skipped += 1;
                        }
                        Err(e) => {
                            error!(%incident_id, error = %e, "Failed to mark skipped");
                            stats.errors += 1;
                        }
                    }
                } else {
                    // Kept for a future run; nothing written.
                    stats.skipped += 1;
                }
            }
            Ok(ExtractionOutcome::Failed { reason }) => {
                // Incident untouched, eligible for retry next run.
                warn!(%incident_id, %reason, "Extraction failed, will retry next run");
                stats.errors += 1;
            }
            Err(e) if e.is_rate_limit() => {
                error!(%incident_id, error = %e, "LLM rate limited, halting consumer");
                stats.errors += 1;
                stats.halted = true;
                // Drain the queue without processing; each pending task is
                // surfaced as not-attempted.
                rx.close();
                while rx.try_recv().is_ok() {
                    stats.drained += 1;
                }
                break;
            }
            Err(e) => {
                error!(%incident_id, error = %e, "Extraction error");
                stats.errors += 1;
            }
        }

        tokio::time::sleep(rate_limit_delay).await;
    }

    stats
}
