//! Content-addressed embedding cache.
//!
//! Embeddings are deterministic for identical input, so the SHA-256 of the clause text is a
//! safe key. Entries live in an in-memory LRU and can be mirrored to a directory of JSON files
//! so dataset rebuilds do not re-embed unchanged clauses.

use async_trait::async_trait;
use clausegraph_core::{ClauseGraphError, Result};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::providers::{ensure_dimension, EmbeddingProvider, ProviderCharacteristics};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct CachedEmbeddingProvider<P> {
    inner: P,
    memory: Option<Mutex<LruCache<String, Vec<f32>>>>,
    disk_dir: Option<PathBuf>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P: EmbeddingProvider> CachedEmbeddingProvider<P> {
    /// A capacity of zero disables the in-memory layer.
    pub fn new(inner: P, capacity: usize) -> Self {
        Self {
            inner,
            memory: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            disk_dir: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_disk_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_dir = Some(dir.into());
        self
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn cache_key(text: &str) -> String {
        let digest = Sha256::digest(text.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        if let Some(memory) = &self.memory {
            if let Some(hit) = memory.lock().get(key) {
                return Some(hit.clone());
            }
        }

        let dir = self.disk_dir.as_ref()?;
        let embedding = read_disk_entry(dir, key)?;
        if ensure_dimension(self.inner.embedding_dimension(), &embedding).is_err() {
            warn!("Ignoring cached embedding {} with wrong dimension", key);
            return None;
        }
        if let Some(memory) = &self.memory {
            memory.lock().put(key.to_string(), embedding.clone());
        }
        Some(embedding)
    }

    fn store(&self, key: String, embedding: &[f32]) {
        if let Some(dir) = &self.disk_dir {
            if let Err(e) = write_disk_entry(dir, &key, embedding) {
                warn!("Failed to persist cached embedding {}: {}", key, e);
            }
        }
        if let Some(memory) = &self.memory {
            memory.lock().put(key, embedding.to_vec());
        }
    }
}

fn read_disk_entry(dir: &Path, key: &str) -> Option<Vec<f32>> {
    let bytes = std::fs::read(dir.join(format!("{key}.json"))).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn write_disk_entry(dir: &Path, key: &str, embedding: &[f32]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(
        dir.join(format!("{key}.json")),
        serde_json::to_vec(embedding)?,
    )?;
    Ok(())
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbeddingProvider<P> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::cache_key(text);
        if let Some(hit) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Embedding cache miss for {}", &key[..12]);
        let embedding = self.inner.embed(text).await?;
        ensure_dimension(self.inner.embedding_dimension(), &embedding)?;
        self.store(key, &embedding);
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut resolved: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut missing_keys = Vec::new();
        let mut missing_texts = Vec::new();
        let mut missing_slots = Vec::new();

        for (slot, text) in texts.iter().enumerate() {
            let key = Self::cache_key(text);
            match self.lookup(&key) {
                Some(hit) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    resolved.push(Some(hit));
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    resolved.push(None);
                    missing_keys.push(key);
                    missing_texts.push(text.clone());
                    missing_slots.push(slot);
                }
            }
        }

        if !missing_texts.is_empty() {
            debug!(
                "Embedding cache: {} of {} texts missed, forwarding one batch",
                missing_texts.len(),
                texts.len()
            );
            let fresh = self.inner.embed_batch(&missing_texts).await?;
            if fresh.len() != missing_texts.len() {
                return Err(ClauseGraphError::ExternalService(format!(
                    "{} returned {} embeddings for {} texts",
                    self.inner.provider_name(),
                    fresh.len(),
                    missing_texts.len()
                )));
            }
            let expected = self.inner.embedding_dimension();
            for embedding in &fresh {
                ensure_dimension(expected, embedding)?;
            }
            for ((slot, key), embedding) in missing_slots.into_iter().zip(missing_keys).zip(fresh) {
                self.store(key, &embedding);
                resolved[slot] = Some(embedding);
            }
        }

        Ok(resolved.into_iter().flatten().collect())
    }

    fn embedding_dimension(&self) -> usize {
        self.inner.embedding_dimension()
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        self.inner.characteristics()
    }
}
