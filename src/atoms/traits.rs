// ── Presence Atoms: Collaborator Traits ────────────────────────────────────
// The engine talks to everything outside itself through these seams:
//   EmbeddingProvider   text → vector
//   DecisionService     snapshot → raw decision payload
//   ReflectionService   snapshot → raw reflection payload (or nothing)
//   KeyValueStore       string keys → string values (persistence)
//   ProactiveSink       where proactive messages are rendered
//
// Decision and reflection services return raw JSON payloads rather than typed
// records: the pipeline owns validation, so a malformed response from any
// backend goes through the same coercion path.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ConversationState, Decision, ProactiveMessage};
use async_trait::async_trait;

/// Untyped response body from a decision / reflection service.
pub type ServicePayload = serde_json::Value;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Embed one text. Fails with `EngineError::Provider` on quota, network
    /// or auth failure; never returns an empty vector.
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Embed several texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        futures::future::try_join_all(texts.iter().map(|t| self.embed(t))).await
    }
}

#[async_trait]
pub trait DecisionService: Send + Sync {
    fn name(&self) -> &str;

    /// Decide whether to act proactively on this snapshot.
    async fn decide(&self, state: &ConversationState) -> EngineResult<ServicePayload>;

    /// Produce message text for a decision to act that carried no suggestion.
    async fn compose_message(
        &self,
        _decision: &Decision,
        _state: &ConversationState,
    ) -> EngineResult<Option<String>> {
        Ok(None)
    }
}

#[async_trait]
pub trait ReflectionService: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means "nothing to reflect on right now".
    async fn reflect(&self, state: &ConversationState) -> EngineResult<Option<ServicePayload>>;
}

/// Host persistence. Synchronous: every implementation is local.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> EngineResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> EngineResult<()>;
    fn remove(&self, key: &str) -> EngineResult<()>;
}

#[async_trait]
pub trait ProactiveSink: Send + Sync {
    async fn emit(&self, message: &ProactiveMessage) -> EngineResult<()>;
}
