//! Article fetching, rate discipline, and LLM enrichment of stored
//! incidents.

pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod institution_dedup;
pub mod pipeline;
pub mod rate_limit;
pub mod selector;

pub use error::{EnrichError, Result};
pub use extractor::{
    EnrichmentExtractor, EnrichmentResult, ExtractionOutcome, LlmEnrichmentExtractor,
};
pub use fetcher::{ArticleContent, ArticleFetch, ArticleFetcher};
pub use institution_dedup::{dedupe_by_institution, InstitutionDedupStats};
pub use pipeline::{EnrichOptions, EnrichStats, EnrichmentPipeline};
pub use rate_limit::{DomainRateLimiter, RateLimiterConfig};
pub use selector::select_for_enrichment;
