use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,

    // LLM provider
    pub anthropic_api_key: String,
    pub llm_model: String,
}

const DEFAULT_DB_PATH: &str = "data/eduthreat.db";
const DEFAULT_LLM_MODEL: &str = "claude-haiku-4-5-20251001";

impl Config {
    /// Load config for ingestion (no LLM credentials needed).
    pub fn ingest_from_env() -> Self {
        Self {
            db_path: db_path_from_env(),
            anthropic_api_key: String::new(),
            llm_model: String::new(),
        }
    }

    /// Load config for enrichment.
    /// Panics with a clear message if required vars are missing.
    pub fn enrich_from_env() -> Self {
        Self {
            db_path: db_path_from_env(),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
        }
    }

    /// Load config for export (store path only).
    pub fn export_from_env() -> Self {
        Self::ingest_from_env()
    }

    /// Log the presence of each sensitive env var without its value.
    pub fn log_redacted(&self) {
        tracing::info!("EDUTHREAT_DB = {}", self.db_path.display());
        if self.anthropic_api_key.is_empty() {
            tracing::info!("ANTHROPIC_API_KEY = (empty)");
        } else {
            tracing::info!("ANTHROPIC_API_KEY = ({} chars)", self.anthropic_api_key.len());
        }
        if !self.llm_model.is_empty() {
            tracing::info!("LLM_MODEL = {}", self.llm_model);
        }
    }
}

fn db_path_from_env() -> PathBuf {
    env::var("EDUTHREAT_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH))
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
