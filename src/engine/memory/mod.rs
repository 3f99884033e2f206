// Pawz Presence: Vector Memory
//
// Long-term semantic memory indexed by distance to five reference vectors.
//
// Module layout:
//   vector_math.rs  cosine / euclidean / normalize, degenerate-safe
//   embedding.rs    Ollama client, hashing embedder, content-hash cache
//   pivots.rs       pivot generation, index-field encoding, range table
//   kv.rs           SQLite and in-memory key-value stores
//   store.rs        VectorMemoryStore (insert, search, evict, persist)

pub mod embedding;
pub mod kv;
pub mod pivots;
pub mod store;
pub mod vector_math;

pub use embedding::{provider_from_config, CachedEmbedder, HashingEmbedder, OllamaEmbeddingClient};
pub use kv::{InMemoryKvStore, SqliteKvStore};
pub use store::VectorMemoryStore;
