use clausegraph_core::{ClauseGraphError, Result};
use clausegraph_vector::{CacheStats, CachedEmbeddingProvider, EmbeddingProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Mock embedding provider counting upstream calls
struct MockEmbeddingProvider {
    dimension: usize,
    emitted: usize,
    calls: AtomicUsize,
    batch_calls: AtomicUsize,
    fail: bool,
}

impl MockEmbeddingProvider {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            emitted: dimension,
            calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing(dimension: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(dimension)
        }
    }

    /// Declares `dimension` but emits vectors of length `emitted`
    fn misreporting(dimension: usize, emitted: usize) -> Self {
        Self {
            emitted,
            ..Self::new(dimension)
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ClauseGraphError::ExternalService("mock outage".into()));
        }
        let seed = text.bytes().fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        Ok((0..self.emitted)
            .map(|i| ((seed.wrapping_add(i as u32) % 97) as f32) / 97.0)
            .collect())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

#[tokio::test]
async fn repeated_text_hits_memory_cache() {
    let inner = Arc::new(MockEmbeddingProvider::new(8));
    let cached = CachedEmbeddingProvider::new(Arc::clone(&inner), 16);

    let first = cached.embed("Payment is due within 30 days.").await.unwrap();
    let second = cached.embed("Payment is due within 30 days.").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    assert_eq!(cached.stats(), CacheStats { hits: 1, misses: 1 });
}

#[tokio::test]
async fn disk_cache_survives_a_new_provider() {
    let dir = TempDir::new().unwrap();

    let first_inner = Arc::new(MockEmbeddingProvider::new(4));
    let first = CachedEmbeddingProvider::new(Arc::clone(&first_inner), 0).with_disk_cache(dir.path());
    let original = first.embed("Governing law is Delaware.").await.unwrap();

    let second_inner = Arc::new(MockEmbeddingProvider::new(4));
    let second =
        CachedEmbeddingProvider::new(Arc::clone(&second_inner), 4).with_disk_cache(dir.path());
    let restored = second.embed("Governing law is Delaware.").await.unwrap();

    assert_eq!(original, restored);
    assert_eq!(second_inner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failures_are_not_cached() {
    let inner = Arc::new(MockEmbeddingProvider::failing(4));
    let cached = CachedEmbeddingProvider::new(Arc::clone(&inner), 4);

    assert!(cached.embed("x").await.is_err());
    assert!(cached.embed("x").await.is_err());
    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn batch_preserves_order() {
    let provider = MockEmbeddingProvider::new(3);
    let texts = vec!["a".to_string(), "b".to_string(), "a".to_string()];
    let batch = provider.embed_batch(&texts).await.unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0], batch[2]);
    assert_ne!(batch[0], batch[1]);
}

#[tokio::test]
async fn cached_batch_forwards_misses_in_one_call() {
    let inner = Arc::new(MockEmbeddingProvider::new(4));
    let cached = CachedEmbeddingProvider::new(Arc::clone(&inner), 16);

    let warm = cached.embed("Either party may terminate.").await.unwrap();
    let texts = vec![
        "Liability is capped at fees paid.".to_string(),
        "Either party may terminate.".to_string(),
        "Notices must be in writing.".to_string(),
    ];
    let batch = cached.embed_batch(&texts).await.unwrap();

    assert_eq!(batch.len(), 3);
    assert_eq!(batch[1], warm);
    assert_eq!(batch[0], inner.embed(&texts[0]).await.unwrap());
    assert_eq!(batch[2], inner.embed(&texts[2]).await.unwrap());
    assert_eq!(inner.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(cached.stats(), CacheStats { hits: 1, misses: 3 });

    let again = cached.embed_batch(&texts).await.unwrap();
    assert_eq!(again, batch);
    assert_eq!(inner.batch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wrong_dimension_embeddings_are_rejected_and_not_cached() {
    let inner = Arc::new(MockEmbeddingProvider::misreporting(4, 3));
    let cached = CachedEmbeddingProvider::new(Arc::clone(&inner), 16);
    let texts = vec!["Fees are non-refundable.".to_string()];

    assert!(cached.embed_batch(&texts).await.is_err());
    assert!(cached.embed(&texts[0]).await.is_err());
    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    assert_eq!(cached.stats(), CacheStats { hits: 0, misses: 2 });
}

#[test]
fn cache_key_is_stable_hex() {
    let key = CachedEmbeddingProvider::<MockEmbeddingProvider>::cache_key("abc");
    assert_eq!(
        key,
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}
