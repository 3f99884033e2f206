// ── Reference ("pivot") vectors and the distance index ─────────────────
//
// Every entry carries five index fields: its Euclidean distance to each
// pivot, encoded as a zero-padded fixed-width decimal string so that
// lexicographic order equals numeric order. A query admits as candidates the
// entries whose field falls inside a narrow window around the query's own
// distance to that pivot, for any of the five pivots.

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::memory_types::{PivotIndex, PivotSet};
use crate::atoms::traits::EmbeddingProvider;
use crate::engine::memory::vector_math::{euclidean_distance, is_finite_vector};
use chrono::Utc;
use log::info;
use std::collections::{BTreeMap, HashSet};

/// Encode a distance as a sortable fixed-width string.
///
/// Non-finite and out-of-range distances map to the sentinel, which sorts
/// after every real value. Negative input is treated as zero.
pub fn encode_distance(distance: f64) -> String {
    if !distance.is_finite() || distance >= INDEX_MAX_DISTANCE {
        return INDEX_SENTINEL.to_string();
    }
    let d = distance.max(0.0);
    format!("{:0width$.prec$}", d, width = INDEX_FIELD_WIDTH, prec = INDEX_FRAC_DIGITS)
}

/// Inclusive string range of index fields admitted around `distance`.
pub fn window(distance: f64, tolerance: f64) -> (String, String) {
    if !distance.is_finite() {
        return (INDEX_SENTINEL.to_string(), INDEX_SENTINEL.to_string());
    }
    let half = distance.abs() * tolerance.max(0.0);
    (encode_distance(distance - half), encode_distance(distance + half))
}

/// Compute an entry's five index fields against a pivot set.
pub fn compute_index(embedding: &[f32], pivots: &PivotSet) -> PivotIndex {
    let fields: [String; PIVOT_COUNT] = std::array::from_fn(|i| {
        pivots
            .vectors
            .get(i)
            .map(|p| encode_distance(euclidean_distance(embedding, p)))
            .unwrap_or_else(|| INDEX_SENTINEL.to_string())
    });
    PivotIndex { generation: pivots.generation.clone(), fields }
}

/// Embed the seed texts into a fresh pivot set with a new generation id.
pub async fn generate(provider: &dyn EmbeddingProvider) -> EngineResult<PivotSet> {
    let seed_texts: Vec<String> = PIVOT_SEED_TEXTS.iter().map(|s| s.to_string()).collect();
    let vectors = provider.embed_batch(&seed_texts).await?;

    if vectors.len() != PIVOT_COUNT {
        return Err(EngineError::provider(
            provider.name(),
            format!("expected {} pivot vectors, got {}", PIVOT_COUNT, vectors.len()),
        ));
    }
    let dims = vectors[0].len();
    if dims == 0 || vectors.iter().any(|v| v.len() != dims || !is_finite_vector(v)) {
        return Err(EngineError::provider(provider.name(), "pivot vectors are empty or inconsistent"));
    }

    let set = PivotSet {
        generation: uuid::Uuid::new_v4().to_string(),
        vectors,
        seed_texts,
        created_at: Utc::now(),
    };
    info!("[pivots] Generated pivot set {} ({} dims)", &set.generation[..8], dims);
    Ok(set)
}

/// Check a persisted pivot set before trusting it.
pub fn is_valid(set: &PivotSet) -> bool {
    let dims = set.dims();
    set.vectors.len() == PIVOT_COUNT
        && dims > 0
        && set.vectors.iter().all(|v| v.len() == dims && is_finite_vector(v))
}

/// In-memory ordered index: one `field → ids` map per pivot.
#[derive(Debug, Default)]
pub struct PivotTable {
    maps: [BTreeMap<String, Vec<String>>; PIVOT_COUNT],
}

impl PivotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str, index: &PivotIndex) {
        for (map, field) in self.maps.iter_mut().zip(index.fields.iter()) {
            map.entry(field.clone()).or_default().push(id.to_string());
        }
    }

    pub fn remove(&mut self, id: &str, index: &PivotIndex) {
        for (map, field) in self.maps.iter_mut().zip(index.fields.iter()) {
            if let Some(ids) = map.get_mut(field) {
                ids.retain(|x| x != id);
                if ids.is_empty() {
                    map.remove(field);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        for map in self.maps.iter_mut() {
            map.clear();
        }
    }

    /// Union of ids whose field lies inside the window of any pivot.
    pub fn candidates(&self, windows: &[(String, String); PIVOT_COUNT]) -> HashSet<String> {
        let mut out = HashSet::new();
        for (map, (lo, hi)) in self.maps.iter().zip(windows.iter()) {
            if lo > hi {
                continue;
            }
            for ids in map.range(lo.clone()..=hi.clone()).map(|(_, ids)| ids) {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }
}

/// Windows for all five pivots around the query embedding.
pub fn query_windows(query: &[f32], pivots: &PivotSet, tolerance: f64) -> [(String, String); PIVOT_COUNT] {
    std::array::from_fn(|i| match pivots.vectors.get(i) {
        Some(p) => window(euclidean_distance(query, p), tolerance),
        None => (INDEX_SENTINEL.to_string(), INDEX_SENTINEL.to_string()),
    })
}
