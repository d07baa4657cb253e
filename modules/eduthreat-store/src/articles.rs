use chrono::Utc;
use tracing::{debug, info};

use crate::error::Result;
use crate::types::{ArticleRow, EnrichmentUpdate, NewArticle, SaveOutcome};
use crate::Store;

impl Store {
    /// Idempotently persist a fetched article keyed by `(incident_id, url)`.
    /// Scoring columns stay null; only the LLM stage writes them.
    pub async fn save_article(&self, incident_id: &str, article: &NewArticle) -> Result<()> {
        let body_len = article.body.len() as i64;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO articles
                (incident_id, url, title, body, author, publish_date,
                 fetch_successful, fetch_error, content_length, fetched_at,
                 url_score, url_score_reasoning, is_primary)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, 0)
            "#,
        )
        .bind(incident_id)
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.body)
        .bind(&article.author)
        .bind(&article.publish_date)
        .bind(article.fetch_successful)
        .bind(&article.fetch_error)
        .bind(body_len)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn article_exists(&self, incident_id: &str, url: &str) -> Result<bool> {
        let row = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM articles WHERE incident_id = ? AND url = ?",
        )
        .bind(incident_id)
        .bind(url)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.is_some())
    }

    /// All articles for an incident, best-scored first.
    pub async fn articles_for_incident(&self, incident_id: &str) -> Result<Vec<ArticleRow>> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT * FROM articles
            WHERE incident_id = ?
            ORDER BY url_score DESC NULLS LAST, fetched_at DESC
            "#,
        )
        .bind(incident_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Count of articles flagged primary for an incident. Invariant: ≤ 1.
    pub async fn primary_article_count(&self, incident_id: &str) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM articles WHERE incident_id = ? AND is_primary = 1",
        )
        .bind(incident_id)
        .fetch_one(self.pool())
        .await?;
        Ok(n)
    }

    /// Save an enrichment result under the upgrade rule.
    ///
    /// If the row already carries an extraction with confidence greater than
    /// or equal to the new one, the old enrichment is kept (and its
    /// `enriched` flag restored, covering the URL-upgrade reset path) and
    /// [`SaveOutcome::SkippedLowerConfidence`] is returned.
    ///
    /// An accepted save updates the enrichment block, elects exactly one
    /// primary article, writes the per-article URL scores, and optionally
    /// purges non-primary article rows — all in one transaction.
    pub async fn save_enrichment(
        &self,
        incident_id: &str,
        update: &EnrichmentUpdate,
    ) -> Result<SaveOutcome> {
        let mut tx = self.pool().begin().await?;

        let stored_confidence = sqlx::query_scalar::<_, Option<f64>>(
            "SELECT extraction_confidence FROM incidents WHERE incident_id = ?",
        )
        .bind(incident_id)
        .fetch_optional(&mut *tx)
        .await?
        .flatten();

        if let Some(stored) = stored_confidence {
            if update.extraction_confidence <= stored {
                // The stored extraction wins. Restore the flag in case a
                // URL-upgrade had cleared it.
                sqlx::query(
                    "UPDATE incidents SET enriched = 1, last_updated_at = ? WHERE incident_id = ?",
                )
                .bind(Utc::now().to_rfc3339())
                .bind(incident_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                info!(
                    incident_id,
                    new_confidence = update.extraction_confidence,
                    stored_confidence = stored,
                    "Kept existing enrichment with higher confidence"
                );
                return Ok(SaveOutcome::SkippedLowerConfidence);
            }
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE incidents SET
                enriched = 1,
                enriched_at = ?,
                summary = ?,
                timeline = ?,
                mitre_techniques = ?,
                attack_dynamics = ?,
                extraction_confidence = ?,
                primary_url = ?,
                country = COALESCE(?, country),
                region = COALESCE(?, region),
                city = COALESCE(?, city),
                institution_type = COALESCE(?, institution_type),
                incident_date = COALESCE(?, incident_date),
                date_precision = COALESCE(?, date_precision),
                attack_type_hint = COALESCE(?, attack_type_hint),
                skip_reason = NULL,
                last_updated_at = ?
            WHERE incident_id = ?
            "#,
        )
        .bind(&now)
        .bind(&update.summary)
        .bind(&update.timeline_json)
        .bind(&update.mitre_json)
        .bind(&update.attack_dynamics_json)
        .bind(update.extraction_confidence)
        .bind(&update.primary_url)
        .bind(&update.country)
        .bind(&update.region)
        .bind(&update.city)
        .bind(&update.institution_type)
        .bind(&update.incident_date)
        .bind(&update.date_precision)
        .bind(&update.attack_type)
        .bind(&now)
        .bind(incident_id)
        .execute(&mut *tx)
        .await?;

        for score in &update.url_scores {
            sqlx::query(
                r#"
                UPDATE articles SET url_score = ?, url_score_reasoning = ?
                WHERE incident_id = ? AND url = ?
                "#,
            )
            .bind(score.score)
            .bind(&score.reasoning)
            .bind(incident_id)
            .bind(&score.url)
            .execute(&mut *tx)
            .await?;
        }

        // Elect exactly one primary article.
        sqlx::query("UPDATE articles SET is_primary = 0 WHERE incident_id = ?")
            .bind(incident_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE articles SET is_primary = 1 WHERE incident_id = ? AND url = ?")
            .bind(incident_id)
            .bind(&update.primary_url)
            .execute(&mut *tx)
            .await?;

        if update.purge_non_primary {
            let purged =
                sqlx::query("DELETE FROM articles WHERE incident_id = ? AND is_primary = 0")
                    .bind(incident_id)
                    .execute(&mut *tx)
                    .await?;
            debug!(incident_id, purged = purged.rows_affected(), "Purged non-primary articles");
        }

        tx.commit().await?;
        Ok(SaveOutcome::Saved)
    }
}
