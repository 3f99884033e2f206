// Pawz Presence: Vector Memory Store
//
// Durable collection of memory entries with pivot-indexed similarity search.
//
// Concurrency:
//   • `inner` (parking_lot RwLock) guards entries + pivot table. Insert and
//     capacity eviction happen under one write lock, so a concurrent search
//     never sees an over-capacity or half-written collection.
//   • Embedding calls happen with no lock held.
//   • `maintenance` (tokio RwLock): inserts hold it shared across their
//     embedding await; `regenerate_pivots` holds it exclusively, so no insert
//     can index against a pivot set that is being replaced.
//   • `persist_lock` serializes key-value writes of the id list so the last
//     writer always records the latest membership.

use crate::atoms::constants::{KV_ENTRY_IDS_KEY, KV_ENTRY_PREFIX, KV_PIVOTS_KEY};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::memory_types::*;
use crate::atoms::traits::{EmbeddingProvider, KeyValueStore};
use crate::atoms::types::MemoryStoreConfig;
use crate::engine::memory::pivots::{self, PivotTable};
use crate::engine::memory::vector_math::{cosine_similarity, euclidean_distance};
use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, MemoryEntry>,
    table: PivotTable,
    pivots: Option<Arc<PivotSet>>,
}

impl StoreInner {
    fn add(&mut self, entry: MemoryEntry) {
        self.table.insert(&entry.id, &entry.index);
        self.entries.insert(entry.id.clone(), entry);
    }

    fn take(&mut self, id: &str) -> Option<MemoryEntry> {
        let entry = self.entries.remove(id)?;
        self.table.remove(id, &entry.index);
        Some(entry)
    }

    /// Keep the `capacity` most important entries (newest first among equals).
    /// Returns the evicted ids.
    fn evict_over(&mut self, capacity: usize) -> Vec<String> {
        if self.entries.len() <= capacity {
            return Vec::new();
        }
        let mut ranked: Vec<(String, f32, chrono::DateTime<Utc>)> = self
            .entries
            .values()
            .map(|e| (e.id.clone(), e.metadata.importance, e.metadata.timestamp))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
        });
        let evicted: Vec<String> = ranked.split_off(capacity).into_iter().map(|(id, _, _)| id).collect();
        for id in &evicted {
            self.take(id);
        }
        evicted
    }

    fn reindex_all(&mut self, pivots: &PivotSet) -> Vec<String> {
        self.table.clear();
        let mut changed = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.index.generation != pivots.generation {
                entry.index = pivots::compute_index(&entry.embedding, pivots);
                changed.push(entry.id.clone());
            }
        }
        for entry in self.entries.values() {
            self.table.insert(&entry.id, &entry.index);
        }
        changed
    }
}

fn clamp_importance(importance: f32) -> f32 {
    if importance.is_nan() {
        0.0
    } else {
        importance.clamp(0.0, 1.0)
    }
}

fn entry_key(id: &str) -> String {
    format!("{}{}", KV_ENTRY_PREFIX, id)
}

pub struct VectorMemoryStore {
    provider: Arc<dyn EmbeddingProvider>,
    kv: Arc<dyn KeyValueStore>,
    config: MemoryStoreConfig,
    inner: RwLock<StoreInner>,
    maintenance: tokio::sync::RwLock<()>,
    pivot_init: tokio::sync::Mutex<()>,
    persist_lock: Mutex<()>,
}

impl VectorMemoryStore {
    /// Open the store, loading whatever the key-value store holds.
    ///
    /// Unreadable data never fails the open: a corrupt id list yields an
    /// empty store, a corrupt record is skipped, a corrupt pivot set is
    /// regenerated on the next insert.
    pub fn open(
        provider: Arc<dyn EmbeddingProvider>,
        kv: Arc<dyn KeyValueStore>,
        config: MemoryStoreConfig,
    ) -> Self {
        let store = Self {
            provider,
            kv,
            config,
            inner: RwLock::new(StoreInner::default()),
            maintenance: tokio::sync::RwLock::new(()),
            pivot_init: tokio::sync::Mutex::new(()),
            persist_lock: Mutex::new(()),
        };
        store.load();
        store
    }

    fn load(&self) {
        let pivots = match self.kv.get(KV_PIVOTS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<PivotSet>(&raw) {
                Ok(set) if pivots::is_valid(&set) => Some(Arc::new(set)),
                Ok(_) => {
                    let e = EngineError::Storage("persisted pivot set is inconsistent".into());
                    warn!("[pivots] {}; will regenerate", e);
                    None
                }
                Err(e) => {
                    let e = EngineError::Storage(format!("persisted pivot set unreadable: {}", e));
                    warn!("[pivots] {}; will regenerate", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!("[memory] Could not read pivots: {}", e);
                None
            }
        };

        let ids: Vec<String> = match self.kv.get(KV_ENTRY_IDS_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                let e = EngineError::Storage(format!("entry id list unreadable: {}", e));
                warn!("[memory] {}; starting with an empty store", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                error!("[memory] Could not read entry id list: {}", e);
                Vec::new()
            }
        };

        let mut inner = StoreInner { pivots: pivots.clone(), ..Default::default() };
        let mut skipped = 0usize;
        let mut stale = Vec::new();

        for id in &ids {
            let raw = match self.kv.get(&entry_key(id)) {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("[memory] Could not read entry {}: {}", id, e);
                    skipped += 1;
                    continue;
                }
            };
            let mut entry = match serde_json::from_str::<MemoryEntry>(&raw) {
                Ok(e) if !e.embedding.is_empty() => e,
                Ok(_) => {
                    let e = EngineError::Storage(format!("entry {} has no embedding", id));
                    warn!("[memory] {}; skipping", e);
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    let e = EngineError::Storage(format!("entry {} unreadable: {}", id, e));
                    warn!("[memory] {}; skipping", e);
                    skipped += 1;
                    continue;
                }
            };
            entry.metadata.importance = clamp_importance(entry.metadata.importance);
            entry.metadata.category = entry.metadata.kind.category();

            if let Some(set) = &pivots {
                if entry.embedding.len() != set.dims() {
                    warn!(
                        "[memory] Entry {} has {} dims, store has {}; skipping",
                        id,
                        entry.embedding.len(),
                        set.dims()
                    );
                    skipped += 1;
                    continue;
                }
                if entry.index.generation != set.generation {
                    entry.index = pivots::compute_index(&entry.embedding, set);
                    stale.push(entry.id.clone());
                }
            }
            inner.add(entry);
        }

        let evicted = inner.evict_over(self.config.capacity);
        let loaded = inner.entries.len();
        let to_persist: Vec<MemoryEntry> =
            stale.iter().filter_map(|id| inner.entries.get(id).cloned()).collect();
        *self.inner.write() = inner;

        info!(
            "[memory] Loaded {} entries ({} skipped, {} reindexed, {} evicted)",
            loaded,
            skipped,
            to_persist.len(),
            evicted.len()
        );
        for entry in &to_persist {
            self.persist_entry(entry);
        }
        for id in &evicted {
            self.forget_entry(id);
        }
        if skipped > 0 || !evicted.is_empty() {
            self.persist_ids();
        }
    }

    // ── Persistence helpers (failures are logged, never propagated) ────

    fn persist_entry(&self, entry: &MemoryEntry) {
        let result = serde_json::to_string(entry)
            .map_err(EngineError::from)
            .and_then(|json| self.kv.set(&entry_key(&entry.id), &json));
        if let Err(e) = result {
            error!("[memory] Failed to persist entry {}: {}", entry.id, e);
        }
    }

    fn forget_entry(&self, id: &str) {
        if let Err(e) = self.kv.remove(&entry_key(id)) {
            error!("[memory] Failed to remove persisted entry {}: {}", id, e);
        }
    }

    fn persist_ids(&self) {
        let _guard = self.persist_lock.lock();
        let mut ids: Vec<String> = self.inner.read().entries.keys().cloned().collect();
        ids.sort();
        let result = serde_json::to_string(&ids)
            .map_err(EngineError::from)
            .and_then(|json| self.kv.set(KV_ENTRY_IDS_KEY, &json));
        if let Err(e) = result {
            error!("[memory] Failed to persist entry id list: {}", e);
        }
    }

    fn persist_pivots(&self, set: &PivotSet) {
        let result = serde_json::to_string(set)
            .map_err(EngineError::from)
            .and_then(|json| self.kv.set(KV_PIVOTS_KEY, &json));
        if let Err(e) = result {
            error!("[pivots] Failed to persist pivot set: {}", e);
        }
    }

    // ── Pivots ─────────────────────────────────────────────────────────

    /// Current pivot set, generating it once if the store has none yet.
    async fn ensure_pivots(&self) -> EngineResult<Arc<PivotSet>> {
        if let Some(set) = self.inner.read().pivots.clone() {
            return Ok(set);
        }
        let _init = self.pivot_init.lock().await;
        if let Some(set) = self.inner.read().pivots.clone() {
            return Ok(set);
        }

        let set = Arc::new(pivots::generate(self.provider.as_ref()).await?);
        self.persist_pivots(&set);
        let reindexed: Vec<MemoryEntry> = {
            let mut inner = self.inner.write();
            inner.pivots = Some(set.clone());
            let changed = inner.reindex_all(&set);
            changed.iter().filter_map(|id| inner.entries.get(id).cloned()).collect()
        };
        for entry in &reindexed {
            self.persist_entry(entry);
        }
        Ok(set)
    }

    /// Replace the reference vectors and recompute every entry's index fields.
    /// Waits for in-flight inserts and blocks new ones until done.
    pub async fn regenerate_pivots(&self) -> EngineResult<PivotSet> {
        let _exclusive = self.maintenance.write().await;
        let set = Arc::new(pivots::generate(self.provider.as_ref()).await?);

        let (reindexed, dims_mismatch) = {
            let mut inner = self.inner.write();
            let mismatched = inner
                .entries
                .values()
                .filter(|e| e.embedding.len() != set.dims())
                .count();
            inner.pivots = Some(set.clone());
            let changed = inner.reindex_all(&set);
            let entries: Vec<MemoryEntry> =
                changed.iter().filter_map(|id| inner.entries.get(id).cloned()).collect();
            (entries, mismatched)
        };
        if dims_mismatch > 0 {
            warn!("[pivots] {} entries have a different dimension than the new pivots", dims_mismatch);
        }

        self.persist_pivots(&set);
        for entry in &reindexed {
            self.persist_entry(entry);
        }
        info!(
            "[pivots] Regenerated pivots (generation {}), reindexed {} entries",
            &set.generation[..8],
            reindexed.len()
        );
        Ok((*set).clone())
    }

    pub fn pivots(&self) -> Option<PivotSet> {
        self.inner.read().pivots.as_deref().cloned()
    }

    // ── Insert ─────────────────────────────────────────────────────────

    /// Embed and store a memory. Returns the new id.
    ///
    /// Fails if the embedding provider fails; persistence failures are
    /// only logged.
    pub async fn insert(&self, memory: NewMemory) -> EngineResult<String> {
        if memory.content.trim().is_empty() {
            return Err(EngineError::Validation("memory content is empty".into()));
        }
        let _shared = self.maintenance.read().await;
        let pivots = self.ensure_pivots().await?;

        let embedding = self.provider.embed(&memory.content).await?;
        if embedding.len() != pivots.dims() {
            return Err(EngineError::provider(
                self.provider.name(),
                format!(
                    "embedding has {} dims but the store indexes {}; regenerate pivots after switching models",
                    embedding.len(),
                    pivots.dims()
                ),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let entry = MemoryEntry {
            id: id.clone(),
            content: memory.content,
            index: pivots::compute_index(&embedding, &pivots),
            embedding,
            metadata: MemoryMetadata {
                timestamp: Utc::now(),
                kind: memory.kind,
                category: memory.kind.category(),
                importance: clamp_importance(memory.importance),
                tags: memory.tags,
                context: memory.context,
            },
        };

        let evicted = {
            let mut inner = self.inner.write();
            inner.add(entry.clone());
            inner.evict_over(self.config.capacity)
        };

        self.persist_entry(&entry);
        for old in &evicted {
            self.forget_entry(old);
        }
        self.persist_ids();

        if evicted.is_empty() {
            info!(
                "[memory] Stored {} kind={} imp={:.2}",
                &id[..8],
                entry.metadata.kind,
                entry.metadata.importance
            );
        } else {
            info!(
                "[memory] Stored {} kind={} imp={:.2}, evicted {} over capacity {}",
                &id[..8],
                entry.metadata.kind,
                entry.metadata.importance,
                evicted.len(),
                self.config.capacity
            );
        }
        Ok(id)
    }

    // ── Search ─────────────────────────────────────────────────────────

    pub async fn search(&self, query: &SearchQuery) -> EngineResult<Vec<SearchHit>> {
        Ok(self.search_detailed(query).await?.0)
    }

    /// Search and report which candidate path was taken.
    ///
    /// Small stores are scanned exhaustively; larger ones go through the
    /// pivot window filter, which is best-effort and may miss neighbors.
    pub async fn search_detailed(&self, query: &SearchQuery) -> EngineResult<(Vec<SearchHit>, SearchPath)> {
        if query.limit == 0 || query.text.trim().is_empty() || self.is_empty() {
            return Ok((Vec::new(), SearchPath::Exact));
        }
        let embedding = self.provider.embed(&query.text).await?;
        let ensured = self.ensure_pivots().await?;

        let inner = self.inner.read();
        // Query windows and table fields must come from the same generation.
        let pivots = inner.pivots.clone().unwrap_or(ensured);
        let path = if inner.entries.len() < self.config.exact_scan_below {
            SearchPath::Exact
        } else {
            SearchPath::Pivot
        };

        let candidates: Vec<&MemoryEntry> = match path {
            SearchPath::Exact => inner.entries.values().collect(),
            SearchPath::Pivot => {
                let windows = pivots::query_windows(&embedding, &pivots, self.config.pivot_tolerance);
                inner
                    .table
                    .candidates(&windows)
                    .iter()
                    .filter_map(|id| inner.entries.get(id))
                    .collect()
            }
        };
        let scanned = candidates.len();

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|e| query.kind.map_or(true, |k| e.metadata.kind == k))
            .filter_map(|e| {
                let similarity = cosine_similarity(&embedding, &e.embedding);
                if similarity < query.min_similarity {
                    return None;
                }
                Some(SearchHit {
                    similarity,
                    distance: euclidean_distance(&embedding, &e.embedding),
                    entry: e.clone(),
                })
            })
            .collect();
        let total = inner.entries.len();
        drop(inner);

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.entry
                        .metadata
                        .importance
                        .partial_cmp(&a.entry.metadata.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        hits.truncate(query.limit);

        debug!(
            "[memory] search {:?}: scanned {}/{} entries, {} hits",
            path,
            scanned,
            total,
            hits.len()
        );
        Ok((hits, path))
    }

    // ── Point operations ───────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<MemoryEntry> {
        self.inner.read().entries.get(id).cloned()
    }

    /// Remove an entry. Returns false if no such id exists.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.inner.write().take(id).is_some();
        if removed {
            self.forget_entry(id);
            self.persist_ids();
            info!("[memory] Deleted {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn stats(&self) -> MemoryStats {
        let inner = self.inner.read();
        let mut by_kind = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        let mut importance_sum = 0.0f64;
        let mut oldest = None;
        let mut newest = None;

        for e in inner.entries.values() {
            *by_kind.entry(e.metadata.kind).or_insert(0) += 1;
            *by_category.entry(e.metadata.category).or_insert(0) += 1;
            importance_sum += e.metadata.importance as f64;
            let ts = e.metadata.timestamp;
            oldest = Some(oldest.map_or(ts, |o: chrono::DateTime<Utc>| o.min(ts)));
            newest = Some(newest.map_or(ts, |n: chrono::DateTime<Utc>| n.max(ts)));
        }

        let total = inner.entries.len();
        MemoryStats {
            total_entries: total,
            capacity: self.config.capacity,
            average_importance: if total == 0 { 0.0 } else { (importance_sum / total as f64) as f32 },
            by_kind,
            by_category,
            oldest,
            newest,
            dims: inner.pivots.as_ref().map(|p| p.dims()).unwrap_or(0),
            pivot_generation: inner.pivots.as_ref().map(|p| p.generation.clone()),
            pivots_created_at: inner.pivots.as_ref().map(|p| p.created_at),
        }
    }
}
