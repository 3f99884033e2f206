// Pawz Presence: Embedding Providers
//
// Three implementations of `EmbeddingProvider`:
//   OllamaEmbeddingClient  Ollama /api/embed, legacy /api/embeddings,
//                          then OpenAI-compatible /v1/embeddings
//   HashingEmbedder        deterministic local feature hashing, no network
//   CachedEmbedder         content-hash cache wrapped around any provider

use crate::atoms::constants::DEFAULT_EMBEDDING_CACHE_CAPACITY;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::EmbeddingProvider;
use crate::atoms::types::{EmbeddingBackend, EmbeddingConfig};
use crate::engine::memory::vector_math::{is_finite_vector, normalize};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

const EMBED_TIMEOUT: Duration = Duration::from_secs(60);
const OPENAI_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the provider named by the config, wrapped in a content-hash cache.
pub fn provider_from_config(
    config: &EmbeddingConfig,
    cache_capacity: usize,
) -> Arc<CachedEmbedder> {
    let inner: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(config.dims)),
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbeddingClient::new(config)),
    };
    info!("[embed] Using {} provider ({} dims requested)", inner.name(), config.dims);
    Arc::new(CachedEmbedder::new(inner, cache_capacity))
}

fn floats_from(array: &[Value]) -> Vec<f32> {
    array.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect()
}

// ── Ollama / OpenAI-compatible client ──────────────────────────────────

pub struct OllamaEmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Self {
        OllamaEmbeddingClient {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    fn err(&self, message: impl Into<String>) -> EngineError {
        EngineError::provider("ollama", message)
    }

    /// Current API: POST /api/embed { model, input } → { embeddings: [[f32…]] }.
    /// Falls back to the legacy POST /api/embeddings { model, prompt }.
    async fn embed_ollama(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": text }))
            .timeout(EMBED_TIMEOUT)
            .send()
            .await;

        if let Ok(resp) = resp {
            let status = resp.status();
            if status.is_success() {
                if let Ok(v) = resp.json::<Value>().await {
                    let first = v["embeddings"]
                        .as_array()
                        .and_then(|all| all.first())
                        .and_then(|e| e.as_array())
                        .or_else(|| v["embedding"].as_array());
                    if let Some(arr) = first {
                        let vec = floats_from(arr);
                        if !vec.is_empty() {
                            return Ok(vec);
                        }
                    }
                }
            } else {
                let body = resp.text().await.unwrap_or_default();
                if status.as_u16() == 404 || body.contains("not found") {
                    return Err(self.err(format!("model '{}' not found: {}", self.model, body)));
                }
                debug!("[embed] /api/embed returned {}, trying legacy endpoint", status);
            }
        }

        let legacy_url = format!("{}/api/embeddings", self.base_url);
        let resp = self
            .client
            .post(&legacy_url)
            .json(&json!({ "model": self.model, "prompt": text }))
            .timeout(EMBED_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.err(format!("not reachable at {}: {}", self.base_url, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(self.err(format!("legacy embed {}: {}", status, body)));
        }

        let v: Value = resp.json().await?;
        let vec = v["embedding"].as_array().map(|a| floats_from(a)).unwrap_or_default();
        if vec.is_empty() {
            return Err(self.err("empty embedding vector"));
        }
        Ok(vec)
    }

    /// OpenAI-compatible: POST /v1/embeddings { model, input }.
    async fn embed_openai(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": text }))
            .timeout(OPENAI_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::provider("openai-compatible", format!("{}: {}", status, body)));
        }

        let v: Value = resp.json().await?;
        let vec = v["data"][0]["embedding"].as_array().map(|a| floats_from(a)).unwrap_or_default();
        if vec.is_empty() {
            return Err(EngineError::provider("openai-compatible", "no data[0].embedding in response"));
        }
        Ok(vec)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let ollama_err = match self.embed_ollama(text).await {
            Ok(vec) => return Ok(vec),
            Err(e) => e,
        };
        match self.embed_openai(text).await {
            Ok(vec) => Ok(vec),
            Err(openai_err) => Err(self.err(format!(
                "embedding failed. Ollama: {} | OpenAI: {}",
                ollama_err, openai_err
            ))),
        }
    }
}

// ── Hashing embedder ───────────────────────────────────────────────────

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("static word pattern"));

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic bag-of-features embedding.
///
/// Every lowercase word and every character trigram inside a word is hashed
/// with SHA-256 into one of `dims` signed buckets; the result is L2-normalized.
/// Texts that share words or word fragments land near each other, which is all
/// the memory store needs for offline use and tests.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        let h = u64::from_le_bytes(raw);
        let index = (h % self.dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }

    /// Synchronous core, also used by benches.
    pub fn embed_text(&self, text: &str) -> EngineResult<Vec<f32>> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; self.dims];
        let mut features = 0usize;

        for word in WORD_RE.find_iter(&lower).map(|m| m.as_str()) {
            let (i, s) = self.bucket(&format!("w:{}", word));
            v[i] += s * WORD_WEIGHT;
            features += 1;

            let chars: Vec<char> = word.chars().collect();
            for tri in chars.windows(3) {
                let gram: String = tri.iter().collect();
                let (i, s) = self.bucket(&format!("t:{}", gram));
                v[i] += s * TRIGRAM_WEIGHT;
                features += 1;
            }
        }

        if features == 0 {
            return Err(EngineError::provider("hashing", "text has no embeddable words"));
        }
        normalize(&mut v);
        if v.iter().all(|x| *x == 0.0) {
            return Err(EngineError::provider("hashing", "features cancelled to a zero vector"));
        }
        Ok(v)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        self.embed_text(text)
    }
}

// ── Content-hash cache ─────────────────────────────────────────────────

#[derive(Default)]
struct CacheInner {
    vectors: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

/// Caches embeddings by SHA-256 of (provider name, text). Bounded; the oldest
/// insertion is evicted first.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    capacity: usize,
    cache: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        Self {
            inner,
            capacity: if capacity == 0 { DEFAULT_EMBEDDING_CACHE_CAPACITY } else { capacity },
            cache: Mutex::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn content_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.name().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let key = self.content_key(text);
        if let Some(v) = self.cache.lock().vectors.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(v.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Lock released across the provider call.
        let vec = self.inner.embed(text).await?;
        if vec.is_empty() || !is_finite_vector(&vec) {
            warn!("[embed] {} returned an unusable vector ({} dims)", self.inner.name(), vec.len());
            return Err(EngineError::provider(self.inner.name(), "empty or non-finite embedding"));
        }

        let mut cache = self.cache.lock();
        if !cache.vectors.contains_key(&key) {
            while cache.order.len() >= self.capacity {
                match cache.order.pop_front() {
                    Some(old) => {
                        cache.vectors.remove(&old);
                    }
                    None => break,
                }
            }
            cache.order.push_back(key.clone());
            cache.vectors.insert(key, vec.clone());
        }
        Ok(vec)
    }
}
