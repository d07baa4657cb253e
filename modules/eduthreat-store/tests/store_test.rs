use std::collections::HashSet;

use eduthreat_common::{normalize_url, Confidence, Incident};
use eduthreat_store::{
    EnrichmentPolicy, EnrichmentUpdate, NewArticle, SaveOutcome, Store, UrlScore,
};

fn incident(source: &str, name: &str, urls: &[&str]) -> Incident {
    let mut inc = Incident::new(source, name, &format!("{name}|{}", urls.first().unwrap_or(&"")));
    inc.all_urls = urls.iter().map(|u| u.to_string()).collect();
    inc
}

fn article(url: &str, body: &str) -> NewArticle {
    NewArticle {
        url: url.to_string(),
        title: Some("Campus breach".to_string()),
        body: body.to_string(),
        author: None,
        publish_date: None,
        fetch_successful: true,
        fetch_error: None,
    }
}

fn enrichment(primary_url: &str, confidence: f64) -> EnrichmentUpdate {
    EnrichmentUpdate {
        primary_url: primary_url.to_string(),
        summary: format!("summary at {confidence}"),
        timeline_json: "[]".to_string(),
        mitre_json: "[]".to_string(),
        attack_dynamics_json: "{}".to_string(),
        extraction_confidence: confidence,
        country: None,
        region: None,
        city: None,
        institution_type: None,
        incident_date: None,
        date_precision: None,
        attack_type: None,
        url_scores: vec![UrlScore {
            url: primary_url.to_string(),
            score: confidence,
            reasoning: "most detailed coverage".to_string(),
        }],
        purge_non_primary: true,
    }
}

fn normalized(urls: &[&str]) -> HashSet<String> {
    urls.iter()
        .map(|u| normalize_url(u))
        .filter(|u| !u.is_empty())
        .collect()
}

#[tokio::test]
async fn upsert_and_load_roundtrip() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("konbriefing", "Test University", &["https://example.com/breach"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();
    store
        .add_incident_source(&inc.incident_id, "konbriefing", None, Confidence::Medium)
        .await
        .unwrap();

    let loaded = store.load_incident(&inc.incident_id).await.unwrap().unwrap();
    assert_eq!(loaded.incident_id, inc.incident_id);
    assert_eq!(loaded.institution_name, "Test University");
    assert_eq!(loaded.all_urls, vec!["https://example.com/breach"]);
    assert_eq!(loaded.source, "konbriefing");
    assert!(loaded.primary_url.is_none());
}

#[tokio::test]
async fn source_event_ledger_blocks_replay() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("rss", "Test School", &["https://example.com/a"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();

    assert!(!store.source_event_exists("rss", "guid-1").await.unwrap());
    store
        .record_source_event("rss", "guid-1", &inc.incident_id)
        .await
        .unwrap();
    assert!(store.source_event_exists("rss", "guid-1").await.unwrap());

    // Replaying the same event is a no-op, not an error.
    store
        .record_source_event("rss", "guid-1", &inc.incident_id)
        .await
        .unwrap();
}

#[tokio::test]
async fn attributions_are_append_only_and_deduplicated() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("s1", "Test University", &["https://example.com/a"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();

    store
        .add_incident_source(&inc.incident_id, "s1", Some("e1"), Confidence::Medium)
        .await
        .unwrap();
    store
        .add_incident_source(&inc.incident_id, "s2", Some("e2"), Confidence::High)
        .await
        .unwrap();
    store
        .add_incident_source(&inc.incident_id, "s1", Some("e1"), Confidence::Medium)
        .await
        .unwrap();

    let sources = store.incident_sources(&inc.incident_id).await.unwrap();
    assert_eq!(sources.len(), 2);
    let tags: Vec<_> = sources.iter().map(|s| s.source.as_str()).collect();
    assert!(tags.contains(&"s1") && tags.contains(&"s2"));
}

#[tokio::test]
async fn find_duplicate_reports_enrichment_state_and_new_urls() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("s1", "Test University", &["https://example.com/u1", "https://example.com/u2"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();

    // Unenriched overlap.
    let m = store
        .find_duplicate_by_urls(&normalized(&["https://example.com/u1"]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(m.incident_id, inc.incident_id);
    assert!(!m.enriched);

    store.save_article(&inc.incident_id, &article("https://example.com/u1", "body text that is long enough to count")).await.unwrap();
    store
        .save_enrichment(&inc.incident_id, &enrichment("https://example.com/u1", 0.7))
        .await
        .unwrap();

    // Subset of an enriched row.
    let m = store
        .find_duplicate_by_urls(&normalized(&["https://example.com/u1"]))
        .await
        .unwrap()
        .unwrap();
    assert!(m.enriched);
    assert!(!m.adds_new_urls);

    // New URL against an enriched row.
    let m = store
        .find_duplicate_by_urls(&normalized(&["https://example.com/u1", "https://other.example/u3"]))
        .await
        .unwrap()
        .unwrap();
    assert!(m.enriched);
    assert!(m.adds_new_urls);

    // No overlap at all.
    assert!(store
        .find_duplicate_by_urls(&normalized(&["https://unrelated.example/x"]))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn url_match_is_normalized() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("s1", "Test University", &["https://WWW.Example.com/breach/"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();

    let m = store
        .find_duplicate_by_urls(&normalized(&["https://example.com/breach"]))
        .await
        .unwrap();
    assert!(m.is_some(), "www/trailing-slash variants should match");

    // Different scheme is a different canonical URL.
    let m = store
        .find_duplicate_by_urls(&normalized(&["http://example.com/breach"]))
        .await
        .unwrap();
    assert!(m.is_none(), "scheme is part of the canonical form");
}

#[tokio::test]
async fn upgrade_rule_keeps_higher_confidence_and_restores_flag() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("s1", "Test University", &["https://example.com/u1"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();
    store
        .save_article(&inc.incident_id, &article("https://example.com/u1", "a body of sufficient length for storage"))
        .await
        .unwrap();

    let outcome = store
        .save_enrichment(&inc.incident_id, &enrichment("https://example.com/u1", 0.7))
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::Saved);

    // Simulate the URL-upgrade reset: flag cleared, block preserved.
    let mut upgraded = inc.clone();
    upgraded.all_urls.push("https://other.example/u2".to_string());
    store
        .upsert_incident(&upgraded, EnrichmentPolicy::Reset)
        .await
        .unwrap();
    let row = store.load_incident_row(&inc.incident_id).await.unwrap().unwrap();
    assert!(!row.enriched);
    assert_eq!(row.extraction_confidence, Some(0.7));
    assert!(row.summary.is_some(), "reset must not destroy the block");

    // Lower-confidence re-enrichment is rejected and the old block restored.
    let outcome = store
        .save_enrichment(&inc.incident_id, &enrichment("https://other.example/u2", 0.6))
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::SkippedLowerConfidence);
    let row = store.load_incident_row(&inc.incident_id).await.unwrap().unwrap();
    assert!(row.enriched);
    assert_eq!(row.extraction_confidence, Some(0.7));
    assert_eq!(row.summary.as_deref(), Some("summary at 0.7"));

    // Higher-confidence re-enrichment wins.
    let outcome = store
        .save_enrichment(&inc.incident_id, &enrichment("https://other.example/u2", 0.9))
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::Saved);
    let row = store.load_incident_row(&inc.incident_id).await.unwrap().unwrap();
    assert_eq!(row.extraction_confidence, Some(0.9));
    assert_eq!(row.primary_url.as_deref(), Some("https://other.example/u2"));
}

#[tokio::test]
async fn at_most_one_primary_article() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("s1", "Test University", &["https://a.example/1", "https://b.example/2"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();
    store.save_article(&inc.incident_id, &article("https://a.example/1", "first article body with plenty of text")).await.unwrap();
    store.save_article(&inc.incident_id, &article("https://b.example/2", "second article body with plenty of text")).await.unwrap();

    let mut update = enrichment("https://a.example/1", 0.8);
    update.purge_non_primary = false;
    store.save_enrichment(&inc.incident_id, &update).await.unwrap();
    assert_eq!(store.primary_article_count(&inc.incident_id).await.unwrap(), 1);

    // Re-electing the other article still leaves exactly one primary.
    let mut update = enrichment("https://b.example/2", 0.9);
    update.purge_non_primary = false;
    store.save_enrichment(&inc.incident_id, &update).await.unwrap();
    assert_eq!(store.primary_article_count(&inc.incident_id).await.unwrap(), 1);
    let articles = store.articles_for_incident(&inc.incident_id).await.unwrap();
    let primary: Vec<_> = articles.iter().filter(|a| a.is_primary).collect();
    assert_eq!(primary[0].url, "https://b.example/2");
}

#[tokio::test]
async fn accepted_save_purges_non_primary_articles() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("s1", "Test University", &["https://a.example/1", "https://b.example/2"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();
    store.save_article(&inc.incident_id, &article("https://a.example/1", "first article body with plenty of text")).await.unwrap();
    store.save_article(&inc.incident_id, &article("https://b.example/2", "second article body with plenty of text")).await.unwrap();

    store
        .save_enrichment(&inc.incident_id, &enrichment("https://a.example/1", 0.8))
        .await
        .unwrap();

    let articles = store.articles_for_incident(&inc.incident_id).await.unwrap();
    assert_eq!(articles.len(), 1);
    assert!(articles[0].is_primary);
    assert_eq!(articles[0].url, "https://a.example/1");
}

#[tokio::test]
async fn delete_cascades_to_children() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("s1", "Test University", &["https://example.com/a"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();
    store
        .add_incident_source(&inc.incident_id, "s1", None, Confidence::Medium)
        .await
        .unwrap();
    store
        .record_source_event("s1", "https://example.com/a", &inc.incident_id)
        .await
        .unwrap();
    store
        .save_article(&inc.incident_id, &article("https://example.com/a", "some body text long enough to store"))
        .await
        .unwrap();

    store.delete_incident(&inc.incident_id).await.unwrap();

    assert_eq!(store.incident_count().await.unwrap(), 0);
    assert!(store.incident_sources(&inc.incident_id).await.unwrap().is_empty());
    assert!(!store.source_event_exists("s1", "https://example.com/a").await.unwrap());
    assert!(store.articles_for_incident(&inc.incident_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn skipped_incidents_leave_the_candidate_pool() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("s1", "Corporate Victim", &["https://example.com/a"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();

    assert_eq!(store.unenriched_candidates(10).await.unwrap().len(), 1);
    store
        .mark_incident_skipped(&inc.incident_id, "Not education-related: corporate victim")
        .await
        .unwrap();
    assert!(store.unenriched_candidates(10).await.unwrap().is_empty());

    let stats = store.enrichment_stats().await.unwrap();
    assert_eq!(stats.total_incidents, 1);
    assert_eq!(stats.ready_for_enrichment, 0);
}

#[tokio::test]
async fn broken_urls_mark_and_clear() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("s1", "Test University", &["https://a.example/1", "https://b.example/2"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();

    store
        .mark_urls_broken(&inc.incident_id, &["https://a.example/1".to_string()])
        .await
        .unwrap();
    let row = store.load_incident_row(&inc.incident_id).await.unwrap().unwrap();
    assert_eq!(row.broken_url_list(), vec!["https://a.example/1"]);

    // Marking twice does not duplicate.
    store
        .mark_urls_broken(&inc.incident_id, &["https://a.example/1".to_string()])
        .await
        .unwrap();
    let row = store.load_incident_row(&inc.incident_id).await.unwrap().unwrap();
    assert_eq!(row.broken_url_list().len(), 1);

    store
        .clear_broken_urls(&inc.incident_id, &["https://a.example/1".to_string()])
        .await
        .unwrap();
    let row = store.load_incident_row(&inc.incident_id).await.unwrap().unwrap();
    assert!(row.broken_url_list().is_empty());
}

#[tokio::test]
async fn checkpoint_roundtrip() {
    let store = Store::open_in_memory().await.unwrap();
    assert!(store.last_pubdate("rssfeed").await.unwrap().is_none());
    store
        .set_last_pubdate("rssfeed", "2025-06-01T12:00:00Z")
        .await
        .unwrap();
    assert_eq!(
        store.last_pubdate("rssfeed").await.unwrap().as_deref(),
        Some("2025-06-01T12:00:00Z")
    );
    store
        .set_last_pubdate("rssfeed", "2025-06-02T12:00:00Z")
        .await
        .unwrap();
    assert_eq!(
        store.last_pubdate("rssfeed").await.unwrap().as_deref(),
        Some("2025-06-02T12:00:00Z")
    );
}

#[tokio::test]
async fn merge_upsert_preserves_enrichment_block() {
    let store = Store::open_in_memory().await.unwrap();
    let inc = incident("s1", "Test University", &["https://example.com/u1"]);
    store
        .upsert_incident(&inc, EnrichmentPolicy::Preserve)
        .await
        .unwrap();
    store
        .save_article(&inc.incident_id, &article("https://example.com/u1", "a body of sufficient length for storage"))
        .await
        .unwrap();
    store
        .save_enrichment(&inc.incident_id, &enrichment("https://example.com/u1", 0.8))
        .await
        .unwrap();

    // A later merge writes the row again with Preserve.
    let mut merged = inc.clone();
    merged.notes = Some("merged_from=s1,s2".to_string());
    store
        .upsert_incident(&merged, EnrichmentPolicy::Preserve)
        .await
        .unwrap();

    let row = store.load_incident_row(&inc.incident_id).await.unwrap().unwrap();
    assert!(row.enriched);
    assert_eq!(row.extraction_confidence, Some(0.8));
    assert_eq!(row.primary_url.as_deref(), Some("https://example.com/u1"));
    assert_eq!(row.notes.as_deref(), Some("merged_from=s1,s2"));
}
