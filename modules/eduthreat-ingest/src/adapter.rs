//! The contract every data source implements, and the batch sink that
//! persists what adapters produce.
//!
//! Adapters are pure data producers: they fetch and parse their site or
//! feed and push raw incidents into the sink. The sink owns all store
//! access, flushing in bounded batches so a mid-run crash loses at most one
//! unflushed batch.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use eduthreat_common::Incident;
use eduthreat_store::Store;

use crate::dedup::dedupe_batch;
use crate::orchestrator::{ingest_one, IngestOutcome};

/// Buffered records per flush.
const BATCH_SIZE: usize = 50;

/// Options a source adapter honors. A closed struct: option typos are
/// unrepresentable.
#[derive(Debug, Clone, Default)]
pub struct AdapterOptions {
    /// Page cap for paginated sources. `None` fetches everything.
    pub max_pages: Option<u32>,
    /// Maximum item age for feed sources.
    pub max_age_days: Option<u32>,
    /// Last publication timestamp already consumed, for sources with
    /// monotonic publication order.
    pub since_checkpoint: Option<String>,
}

/// A data source. Implementations own their HTTP calls and must tolerate
/// partial fetch failure, emitting whatever they successfully parsed. Each
/// emitted record carries the source's confidence label into the merge
/// policy.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable source tag, used for attribution and the event ledger.
    fn tag(&self) -> &str;

    /// Collect raw incidents, pushing each into `sink` as it becomes
    /// available (at least once per page or feed chunk).
    async fn collect(&self, opts: &AdapterOptions, sink: &mut BatchSink<'_>) -> Result<()>;
}

/// Counters accumulated across one adapter run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkStats {
    pub collected: u32,
    pub inserted: u32,
    pub merged: u32,
    pub dropped_duplicates: u32,
    pub url_upgrades: u32,
    pub already_ingested: u32,
}

/// Write-side of the adapter contract: buffers up to [`BATCH_SIZE`] records,
/// deduplicates each batch, and runs the per-record ingest step on flush.
pub struct BatchSink<'a> {
    store: &'a Store,
    buffer: Vec<Incident>,
    stats: SinkStats,
    /// Highest source publication timestamp seen, for checkpoint advance.
    latest_pubdate: Option<String>,
}

impl<'a> BatchSink<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            buffer: Vec::new(),
            stats: SinkStats::default(),
            latest_pubdate: None,
        }
    }

    /// Buffer one record, flushing when the batch threshold is reached.
    pub async fn push(&mut self, incident: Incident) -> Result<()> {
        if let Some(ref pubdate) = incident.source_published_date {
            if self.latest_pubdate.as_deref() < Some(pubdate.as_str()) {
                self.latest_pubdate = Some(pubdate.clone());
            }
        }
        self.stats.collected += 1;
        self.buffer.push(incident);
        if self.buffer.len() >= BATCH_SIZE {
            self.flush().await?;
        }
        Ok(())
    }

    /// Persist everything buffered: within-batch dedup first, then the
    /// per-record ingest step. Every record is durable once its ingest
    /// step returns.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = dedupe_batch(std::mem::take(&mut self.buffer));
        debug!(records = batch.len(), "Flushing ingest batch");
        for incident in batch {
            match ingest_one(self.store, &incident).await? {
                IngestOutcome::Inserted => self.stats.inserted += 1,
                IngestOutcome::Merged(_) => self.stats.merged += 1,
                IngestOutcome::DroppedDuplicate(_) => self.stats.dropped_duplicates += 1,
                IngestOutcome::UrlUpgraded(_) => self.stats.url_upgrades += 1,
                IngestOutcome::AlreadyIngested => self.stats.already_ingested += 1,
            }
        }
        Ok(())
    }

    /// Flush the remainder and return the run counters. Called even when
    /// the adapter failed, so buffered records are never lost.
    pub async fn close(mut self) -> Result<(SinkStats, Option<String>)> {
        self.flush().await?;
        Ok((self.stats, self.latest_pubdate))
    }
}
