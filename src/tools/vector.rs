//! Vector similarity search over entity embeddings.
//!
//! Best for conceptual/descriptive questions. Embedding-service failures are
//! reported as tool failures on the result, never as session-fatal errors.

use crate::embeddings::EmbeddingModel;
use crate::error::{RagentError, Result};
use crate::store::Store;
use crate::tools::{render_entity, RetrievalFailure, RetrievalResult, RetrievedItem};

/// Embed the question and scan entity embeddings by cosine similarity.
pub async fn retrieve(
    store: &Store,
    embedder: &dyn EmbeddingModel,
    query: &str,
    label: Option<&str>,
    k: usize,
    min_score: f32,
) -> Result<RetrievalResult> {
    let embed_start = std::time::Instant::now();
    let query_vec = match embedder.embed(query).await {
        Ok(vec) => vec,
        Err(RagentError::Embedding(reason)) => {
            log::warn!("Vector search: embedding failed: {}", reason);
            return Ok(RetrievalResult::failed(RetrievalFailure::ExecutionFailed(
                format!("embedding: {}", reason),
            )));
        }
        Err(e) => return Err(e),
    };
    log::debug!("Vector search: query embedding took {:?}", embed_start.elapsed());

    let expected_dims = embedder.dimensions();
    if query_vec.len() != expected_dims {
        return Ok(RetrievalResult::failed(RetrievalFailure::ExecutionFailed(
            format!(
                "embedding: unexpected dimension, expected {}, got {}",
                expected_dims,
                query_vec.len()
            ),
        )));
    }

    let label_filter = label.map(String::from);
    let rows = store
        .with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT entity_id, label, properties, embedding \
                 FROM entities \
                 WHERE embedding IS NOT NULL \
                 AND (?1 IS NULL OR label = ?1)",
            )?;
            let mut rows = stmt.query(rusqlite::params![label_filter])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let entity_id: String = row.get(0)?;
                let label: String = row.get(1)?;
                let properties: String = row.get(2)?;
                let blob: Option<Vec<u8>> = row.get(3)?;
                if let Some(blob) = blob {
                    results.push((entity_id, label, properties, blob));
                }
            }
            Ok::<Vec<_>, RagentError>(results)
        })
        .await?;

    let mut scored: Vec<(f32, RetrievedItem)> = Vec::new();
    for (entity_id, entity_label, properties, blob) in rows {
        let embedding = match parse_embedding(&blob) {
            Some(e) => e,
            None => continue,
        };
        if embedding.len() != expected_dims {
            continue;
        }
        let similarity = cosine_similarity(&query_vec, &embedding);
        if similarity < min_score {
            continue;
        }
        let snippet = render_entity(&entity_label, &properties);
        scored.push((
            similarity,
            RetrievedItem {
                entity_id,
                label: entity_label,
                snippet,
                score: similarity,
                rank: 0,
            },
        ));
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let items: Vec<RetrievedItem> = scored
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(idx, (_, mut item))| {
            item.rank = idx + 1;
            item
        })
        .collect();

    Ok(RetrievalResult::ok(items))
}

/// Parse an embedding BLOB (little-endian f32 array).
pub(crate) fn parse_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    blob.chunks(4)
        .map(|bytes| {
            let arr: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(arr))
        })
        .collect()
}

/// Serialize an embedding to its BLOB form (used by tests and seeders).
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Cosine similarity; 0.0 when either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vectors must have same length");

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
