// ── Presence Atoms: Vector Memory Types ────────────────────────────────────
//
// Data types for the pivot-indexed vector memory store. Pure data: no DB
// access, no embedding calls.
//
// Two enums describe what a memory is:
//   MemoryKind     the API-level type callers insert, filter and display.
//   StoreCategory  the coarser bucket the storage layer keeps.
// `MemoryKind::category()` is the single total mapping between them.

use crate::atoms::constants::PIVOT_COUNT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Memory kinds
// ═══════════════════════════════════════════════════════════════════════════

/// API-level memory type. Closed set, stable across store and search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Conversation,
    Reflection,
    Insight,
    Preference,
    Fact,
}

/// Storage-level bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum StoreCategory {
    Conversation,
    Reflection,
    /// Durable knowledge about the user: insights, preferences, facts.
    Memory,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 5] = [
        MemoryKind::Conversation,
        MemoryKind::Reflection,
        MemoryKind::Insight,
        MemoryKind::Preference,
        MemoryKind::Fact,
    ];

    /// Total mapping from API kind to storage category.
    pub fn category(self) -> StoreCategory {
        match self {
            MemoryKind::Conversation => StoreCategory::Conversation,
            MemoryKind::Reflection => StoreCategory::Reflection,
            MemoryKind::Insight | MemoryKind::Preference | MemoryKind::Fact => {
                StoreCategory::Memory
            }
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryKind::Conversation => write!(f, "conversation"),
            MemoryKind::Reflection => write!(f, "reflection"),
            MemoryKind::Insight => write!(f, "insight"),
            MemoryKind::Preference => write!(f, "preference"),
            MemoryKind::Fact => write!(f, "fact"),
        }
    }
}

impl std::fmt::Display for StoreCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreCategory::Conversation => write!(f, "conversation"),
            StoreCategory::Reflection => write!(f, "reflection"),
            StoreCategory::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;
    /// Transport-level subtypes ("user_message", "assistant message", …)
    /// fold into `Conversation`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_lowercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "conversation" | "message" | "user_message" | "assistant_message" | "chat" => {
                Ok(MemoryKind::Conversation)
            }
            "reflection" => Ok(MemoryKind::Reflection),
            "insight" => Ok(MemoryKind::Insight),
            "preference" | "user_preference" => Ok(MemoryKind::Preference),
            "fact" => Ok(MemoryKind::Fact),
            other => Err(format!("unknown memory type '{}'", other)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Entries
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryMetadata {
    pub timestamp: DateTime<Utc>,
    pub kind: MemoryKind,
    /// Derived from `kind`; persisted so storage-level queries need no mapping.
    pub category: StoreCategory,
    /// Always within [0, 1].
    pub importance: f32,
    pub tags: Vec<String>,
    pub context: Option<String>,
}

/// The five pivot-distance index fields of an entry, plus the generation of
/// the reference vectors they were computed against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PivotIndex {
    pub generation: String,
    pub fields: [String; PIVOT_COUNT],
}

/// A stored memory. Never mutated in place; content changes are delete +
/// re-insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: MemoryMetadata,
    pub index: PivotIndex,
}

/// Caller-side description of a memory to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    pub content: String,
    pub kind: MemoryKind,
    pub importance: f32,
    pub tags: Vec<String>,
    pub context: Option<String>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>, kind: MemoryKind, importance: f32) -> Self {
        Self {
            content: content.into(),
            kind,
            importance,
            tags: Vec::new(),
            context: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Reference vectors
// ═══════════════════════════════════════════════════════════════════════════

/// The five reference ("pivot") vectors shared by every entry and query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PivotSet {
    /// Changes on every (re)generation; entries carry the id they were
    /// indexed with.
    pub generation: String,
    pub vectors: Vec<Vec<f32>>,
    pub seed_texts: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PivotSet {
    pub fn dims(&self) -> usize {
        self.vectors.first().map(|v| v.len()).unwrap_or(0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Search & stats
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub limit: usize,
    pub min_similarity: f64,
    pub kind: Option<MemoryKind>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, limit: usize, min_similarity: f64) -> Self {
        Self { text: text.into(), limit, min_similarity, kind: None }
    }

    pub fn of_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry: MemoryEntry,
    /// Cosine similarity in [-1, 1]; 0 for degenerate vectors.
    pub similarity: f64,
    /// Euclidean distance; `f64::INFINITY` when incomparable.
    pub distance: f64,
}

/// How a search produced its candidate set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchPath {
    Exact,
    Pivot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryStats {
    pub total_entries: usize,
    pub capacity: usize,
    pub average_importance: f32,
    pub by_kind: BTreeMap<MemoryKind, usize>,
    pub by_category: BTreeMap<StoreCategory, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub dims: usize,
    pub pivot_generation: Option<String>,
    pub pivots_created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping_is_total() {
        for kind in MemoryKind::ALL {
            let _ = kind.category();
        }
        assert_eq!(MemoryKind::Fact.category(), StoreCategory::Memory);
        assert_eq!(MemoryKind::Preference.category(), StoreCategory::Memory);
        assert_eq!(MemoryKind::Insight.category(), StoreCategory::Memory);
        assert_eq!(MemoryKind::Reflection.category(), StoreCategory::Reflection);
        assert_eq!(MemoryKind::Conversation.category(), StoreCategory::Conversation);
    }

    #[test]
    fn transport_subtypes_fold_into_conversation() {
        assert_eq!("user message".parse::<MemoryKind>().unwrap(), MemoryKind::Conversation);
        assert_eq!("assistant_message".parse::<MemoryKind>().unwrap(), MemoryKind::Conversation);
        assert_eq!("Preference".parse::<MemoryKind>().unwrap(), MemoryKind::Preference);
        assert!("dream".parse::<MemoryKind>().is_err());
    }

    #[test]
    fn kind_serializes_lowercase() {
        let s = serde_json::to_string(&MemoryKind::Insight).unwrap();
        assert_eq!(s, "\"insight\"");
    }
}
