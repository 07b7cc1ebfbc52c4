//! Hybrid retrieval: vector and keyword legs run in parallel, merged by
//! weighted score fusion.
//!
//! Best for questions mixing conceptual language with exact terms. Scores
//! from both legs are already 0-1 (cosine similarity, sigmoid-normalized
//! BM25), so fusion is a weighted sum accumulated per entity; when one leg
//! fails the other's scores are re-normalized by the surviving weight and
//! the result is marked partial.

use crate::embeddings::EmbeddingModel;
use crate::error::Result;
use crate::store::Store;
use crate::tools::{keyword, vector, RetrievalResult, RetrievedItem};
use std::collections::HashMap;

/// Run both legs and fuse. `vector_weight` + `keyword_weight` should sum
/// to 1.0 (validated at config load).
#[allow(clippy::too_many_arguments)]
pub async fn retrieve(
    store: &Store,
    embedder: &dyn EmbeddingModel,
    query: &str,
    label: Option<&str>,
    k: usize,
    min_score: f32,
    vector_weight: f32,
    keyword_weight: f32,
) -> Result<RetrievalResult> {
    let total_start = std::time::Instant::now();

    // Over-fetch from each leg for better fusion quality
    let fetch_k = k * 2;

    let (vector_result, keyword_result) = tokio::join!(
        vector::retrieve(store, embedder, query, label, fetch_k, 0.0),
        keyword::retrieve(store, query, label, fetch_k, 0.0)
    );
    let vector_result = vector_result?;
    let keyword_result = keyword_result?;

    let vector_failed = vector_result.error.is_some();
    let keyword_failed = keyword_result.error.is_some();

    if vector_failed && keyword_failed {
        // Both legs down: surface the vector leg's failure
        return Ok(RetrievalResult {
            items: Vec::new(),
            partial: false,
            error: vector_result.error,
        });
    }

    let fused = fuse(
        &vector_result.items,
        &keyword_result.items,
        vector_weight,
        keyword_weight,
        vector_failed,
        keyword_failed,
    );

    let items: Vec<RetrievedItem> = fused
        .into_iter()
        .filter(|item| item.score >= min_score)
        .take(k)
        .collect();

    log::debug!(
        "Hybrid search took {:?} ({} items, vector_failed={}, keyword_failed={})",
        total_start.elapsed(),
        items.len(),
        vector_failed,
        keyword_failed
    );

    Ok(RetrievalResult {
        items,
        partial: vector_failed || keyword_failed,
        error: None,
    })
}

/// Weighted score fusion accumulated by entity, highest fused score first,
/// ranks re-assigned 1-indexed. Scores are normalized by the sum of weights
/// of the legs that actually ran, so a surviving leg alone can still clear
/// the score threshold.
fn fuse(
    vector_items: &[RetrievedItem],
    keyword_items: &[RetrievedItem],
    vector_weight: f32,
    keyword_weight: f32,
    vector_failed: bool,
    keyword_failed: bool,
) -> Vec<RetrievedItem> {
    let effective_weight = {
        let mut sum = 0.0;
        if !vector_failed {
            sum += vector_weight;
        }
        if !keyword_failed {
            sum += keyword_weight;
        }
        if sum <= 0.0 {
            1.0
        } else {
            sum
        }
    };

    let mut scores: HashMap<String, (f32, RetrievedItem)> = HashMap::new();

    for item in vector_items {
        let weighted = vector_weight * item.score;
        scores.insert(item.entity_id.clone(), (weighted, item.clone()));
    }

    for item in keyword_items {
        let weighted = keyword_weight * item.score;
        scores
            .entry(item.entity_id.clone())
            .and_modify(|(score, _)| *score += weighted)
            .or_insert((weighted, item.clone()));
    }

    let mut ranked: Vec<RetrievedItem> = scores
        .into_values()
        .map(|(score, mut item)| {
            item.score = score / effective_weight;
            item
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    for (idx, item) in ranked.iter_mut().enumerate() {
        item.rank = idx + 1;
    }

    ranked
}
