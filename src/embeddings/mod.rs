//! Embedding service seam and OpenAI-compatible client.

mod cache;
mod openai;

pub use cache::EmbeddingCache;
pub use openai::OpenAiEmbedder;

use crate::error::Result;
use async_trait::async_trait;

/// Text -> fixed-dimension vector. Embedding failures are retrieval-tool
/// failures, never fatal to a session.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of produced vectors; stored entity embeddings must match.
    fn dimensions(&self) -> usize;
}

#[cfg(test)]
pub mod testing {
    //! Deterministic embedder fakes for tool and agent tests.

    use super::*;
    use crate::error::RagentError;
    use std::time::Duration;

    pub const TEST_DIMENSIONS: usize = 8;

    /// Deterministic pseudo-embedding: hash character trigrams into a small
    /// fixed-dimension vector so strings sharing vocabulary land near each
    /// other.
    pub fn fake_embedding(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; TEST_DIMENSIONS];
        let lower = text.to_lowercase();
        let bytes = lower.as_bytes();
        for window in bytes.windows(3) {
            let mut h: u32 = 2166136261;
            for &b in window {
                h ^= b as u32;
                h = h.wrapping_mul(16777619);
            }
            v[(h as usize) % TEST_DIMENSIONS] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    pub struct FakeEmbedder {
        pub delay: Option<Duration>,
    }

    impl FakeEmbedder {
        pub fn new() -> Self {
            Self { delay: None }
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self { delay: Some(delay) }
        }
    }

    #[async_trait]
    impl EmbeddingModel for FakeEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(fake_embedding(text))
        }

        fn dimensions(&self) -> usize {
            TEST_DIMENSIONS
        }
    }

    /// Always fails with an embedding service error.
    pub struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingModel for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagentError::Embedding(
                "embedding service unreachable".to_string(),
            ))
        }

        fn dimensions(&self) -> usize {
            TEST_DIMENSIONS
        }
    }
}
