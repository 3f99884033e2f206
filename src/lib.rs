// Pawz Presence
//
//   atoms/   pure types, constants, errors, collaborator traits
//   engine/  state builder, analysis pipeline, vector memory, config

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::memory_types::{MemoryEntry, MemoryKind, MemoryStats, NewMemory, SearchHit, SearchQuery};
pub use atoms::traits::{DecisionService, EmbeddingProvider, KeyValueStore, ProactiveSink, ReflectionService};
pub use atoms::types::{ConversationState, Decision, PresenceConfig, ProactiveMessage, Reflection};
pub use engine::analysis::{AnalysisPipeline, PipelineEvent, PipelineServices};
pub use engine::local_services::{LocalDecisionService, LocalReflectionService};
pub use engine::memory::VectorMemoryStore;
pub use engine::state_builder::{build_state, SignalTracker};
