//! SQLite persistence for the incident pipeline.
//!
//! One writer, many readers under WAL. Transactions are short by contract:
//! the orchestrator commits after each incident merge and the enrichment
//! loop after each result, so read-only consumers always make progress.

mod articles;
mod error;
mod incidents;
mod store;
mod types;

pub use error::{Result, StoreError};
pub use store::Store;
pub use types::{
    ArticleRow, CandidateRow, DuplicateMatch, EnrichedSummaryRow, EnrichmentPolicy,
    EnrichmentStats, EnrichmentUpdate, IncidentRow, NewArticle, SaveOutcome, UrlScore,
};
