//! Keyword/full-text search over entities via FTS5, the text leg of hybrid
//! retrieval.

use crate::error::{RagentError, Result};
use crate::store::Store;
use crate::tools::{render_entity, RetrievalResult, RetrievedItem};
use rusqlite::params;

/// Sanitize and format an FTS5 query string.
///
/// Strips FTS5 special characters that cause syntax errors, drops stop
/// words, and OR-joins the remaining terms for recall.
pub fn sanitize_fts_query(query: &str) -> String {
    let trimmed = query.trim();

    // FTS5: ? * ( ) { } - and single quote cause syntax errors in MATCH
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '?' | '*' | '(' | ')' | '{' | '}' | '-' | '\''))
        .collect();

    let stop_words: std::collections::HashSet<&str> = [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "should", "could", "what", "which", "who", "where",
        "when", "why", "how", "this", "that", "these", "those", "our", "we",
    ]
    .iter()
    .cloned()
    .collect();

    let terms: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|term| {
            let lower = term.to_lowercase();
            !stop_words.contains(lower.as_str()) && term.len() >= 2
        })
        .collect();

    if terms.is_empty() {
        return cleaned.replace('"', "\"\"");
    }

    if terms.len() == 1 {
        return terms[0].replace('"', "\"\"");
    }

    let escaped_terms: Vec<String> = terms.iter().map(|t| t.replace('"', "\"\"")).collect();
    escaped_terms.join(" OR ")
}

/// Map a raw BM25 score (negative = better) into 0-1 via sigmoid.
pub fn normalize_bm25_score(raw_score: f64) -> f32 {
    if raw_score.is_nan() || raw_score.is_infinite() {
        return 0.0;
    }
    (1.0 / (1.0 + raw_score.exp())) as f32
}

/// Full-text search over entity label + property text.
pub async fn retrieve(
    store: &Store,
    query: &str,
    label: Option<&str>,
    k: usize,
    min_score: f32,
) -> Result<RetrievalResult> {
    let start = std::time::Instant::now();

    if query.trim().is_empty() {
        return Ok(RetrievalResult::ok(Vec::new()));
    }

    let sanitized = sanitize_fts_query(query);
    if sanitized.trim().is_empty() {
        return Ok(RetrievalResult::ok(Vec::new()));
    }

    let label_filter = label.map(String::from);
    let fetch_k = k as i64;
    let mut items = store
        .with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT e.entity_id, e.label, e.properties, bm25(entities_fts) AS raw_score \
                 FROM entities_fts \
                 JOIN entities e ON entities_fts.entity_id = e.entity_id \
                 WHERE entities_fts MATCH ?1 \
                 AND (?2 IS NULL OR e.label = ?2) \
                 ORDER BY raw_score \
                 LIMIT ?3",
            )?;
            let mut rows = stmt.query(params![sanitized, label_filter, fetch_k])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let entity_id: String = row.get(0)?;
                let entity_label: String = row.get(1)?;
                let properties: String = row.get(2)?;
                let raw_score: f64 = row.get(3)?;
                let score = normalize_bm25_score(raw_score);
                let snippet = render_entity(&entity_label, &properties);
                results.push(RetrievedItem {
                    entity_id,
                    label: entity_label,
                    snippet,
                    score,
                    rank: 0,
                });
            }
            Ok::<Vec<RetrievedItem>, RagentError>(results)
        })
        .await?;

    items.retain(|item| item.score >= min_score);
    items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    for (idx, item) in items.iter_mut().enumerate() {
        item.rank = idx + 1;
    }

    log::debug!(
        "Keyword search took {:?}, returned {} results",
        start.elapsed(),
        items.len()
    );

    Ok(RetrievalResult::ok(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::migrate;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_fts_query() {
        assert_eq!(sanitize_fts_query("churn risk"), "churn OR risk");

        // Stop words drop; special characters strip
        assert_eq!(
            sanitize_fts_query("What are the churn risks?"),
            "churn OR risks"
        );
        assert_eq!(sanitize_fts_query("test* (query) {terms}"), "test OR query OR terms");

        // '-' is FTS5 "exclude term"; we strip it
        assert_eq!(sanitize_fts_query("well-known term"), "wellknown OR term");

        // Apostrophes break MATCH; we strip them
        assert_eq!(
            sanitize_fts_query("What is Acme's subscription?"),
            "Acmes OR subscription"
        );

        assert_eq!(sanitize_fts_query(""), "");
    }

    #[test]
    fn test_normalize_bm25_score() {
        let good = normalize_bm25_score(-5.0);
        assert!(good > 0.9 && good <= 1.0);

        let neutral = normalize_bm25_score(0.0);
        assert!((neutral - 0.5).abs() < 0.01);

        let bad = normalize_bm25_score(5.0);
        assert!(bad < 0.1);

        assert_eq!(normalize_bm25_score(f64::NAN), 0.0);
        assert_eq!(normalize_bm25_score(f64::INFINITY), 0.0);
    }

    async fn seeded_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(temp_dir.path().join("graph.db"));
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        store
            .with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        store
            .with_connection(|conn| {
                let rows = [
                    ("c1", "Customer", r#"{"name": "Acme Corp", "region": "US"}"#),
                    ("p1", "Product", r#"{"name": "SpyroAnalytics", "description": "analytics dashboards"}"#),
                    ("r1", "Risk", r#"{"name": "churn", "severity": "high"}"#),
                ];
                for (id, label, props) in rows {
                    conn.execute(
                        "INSERT INTO entities (entity_id, label, properties) VALUES (?1, ?2, ?3)",
                        params![id, label, props],
                    )?;
                }
                Ok::<(), RagentError>(())
            })
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_keyword_search_matches_property_text() {
        let (store, _temp) = seeded_store().await;
        let result = retrieve(&store, "analytics dashboards", None, 10, 0.0)
            .await
            .unwrap();
        assert!(!result.items.is_empty());
        assert_eq!(result.items[0].entity_id, "p1");
        assert_eq!(result.items[0].rank, 1);
    }

    #[tokio::test]
    async fn test_keyword_search_label_filter() {
        let (store, _temp) = seeded_store().await;
        let result = retrieve(&store, "Acme churn analytics", Some("Risk"), 10, 0.0)
            .await
            .unwrap();
        assert!(result.items.iter().all(|i| i.label == "Risk"));
    }

    #[tokio::test]
    async fn test_keyword_search_empty_query() {
        let (store, _temp) = seeded_store().await;
        let result = retrieve(&store, "   ", None, 10, 0.0).await.unwrap();
        assert!(result.items.is_empty());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_keyword_search_fts_stays_in_sync_on_update() {
        let (store, _temp) = seeded_store().await;
        store
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE entities SET properties = ?1 WHERE entity_id = 'c1'",
                    params![r#"{"name": "Acme Corp", "region": "EU", "tier": "platinum"}"#],
                )?;
                Ok::<(), RagentError>(())
            })
            .await
            .unwrap();
        let result = retrieve(&store, "platinum", None, 10, 0.0).await.unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].entity_id, "c1");
    }
}
