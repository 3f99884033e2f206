// ── Local heuristic services ───────────────────────────────────────────────
//
// Offline stand-ins for the LLM-backed decision and reflection services.
// They score the draft with the affect lexicons and answer with the same JSON
// shape a remote service would, so their output goes through the normal
// validation path.

use crate::atoms::error::EngineResult;
use crate::atoms::traits::{DecisionService, ReflectionService, ServicePayload};
use crate::atoms::types::{ActionType, ConversationState, Decision, Priority};
use crate::engine::affect::{count_marker_hits, emotions_for, infer_needs, score_affect, state_label, AffectScore};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

/// Do not act again within this many seconds of the last autonomous action.
const ACTION_COOLDOWN_SECS: i64 = 120;

static NORWEGIAN_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(jeg|ikke|det|og|du|meg|har|hva|hvordan|være|også)\b|[æøå]").unwrap()
});

const PREFERENCE_MARKERS: &[&str] = &[
    "i love", "i like", "i prefer", "my favorite", "my favourite", "i enjoy",
    "jeg elsker", "jeg liker", "jeg foretrekker", "favoritt",
];

const FACT_MARKERS: &[&str] = &[
    "my name is", "i work", "i live", "i study", "i am a", "i'm a",
    "jeg heter", "jeg jobber", "jeg bor", "jeg studerer",
];

const UNCERTAIN_MARKERS: &[&str] = &[
    "not sure", "don't know", "confused", "maybe", "vet ikke", "usikker", "kanskje", "skjønner ikke",
];

fn is_norwegian(text: &str) -> bool {
    NORWEGIAN_WORDS.find_iter(text).count() >= 2
}

fn canned_message(action: ActionType, norwegian: bool) -> Option<&'static str> {
    let text = match (action, norwegian) {
        (ActionType::Support, false) => "That sounds like a lot. I'm here if you want to talk it through.",
        (ActionType::Support, true) => "Det høres tungt ut. Jeg er her hvis du vil snakke om det.",
        (ActionType::Clarify, false) => "No rush. Want me to help you sort out what you're trying to say?",
        (ActionType::Clarify, true) => "Ingen hast. Vil du at jeg hjelper deg å sortere tankene?",
        (ActionType::Encourage, false) => "Take your time, you're doing fine.",
        (ActionType::Encourage, true) => "Ta den tiden du trenger, du gjør det bra.",
        (ActionType::CheckIn, false) => "Still there? Just checking in.",
        (ActionType::CheckIn, true) => "Er du der fortsatt? Ville bare høre hvordan det går.",
        (ActionType::Reflect, false) => "It sounds like this matters to you.",
        (ActionType::Reflect, true) => "Det høres ut som dette betyr mye for deg.",
        _ => return None,
    };
    Some(text)
}

fn recently_acted(state: &ConversationState) -> bool {
    state
        .last_action
        .as_ref()
        .is_some_and(|a| (state.created_at - a.timestamp).num_seconds() < ACTION_COOLDOWN_SECS)
}

fn wait_payload(reasoning: &str) -> ServicePayload {
    json!({
        "shouldAct": false,
        "actionType": "wait",
        "priority": "low",
        "delayMs": 500,
        "reasoning": reasoning,
        "confidence": 0.6,
    })
}

/// Heuristic decision service. Acts on strong negative affect, visible
/// struggle while typing, or stated uncertainty; waits otherwise.
#[derive(Debug, Default, Clone)]
pub struct LocalDecisionService;

impl LocalDecisionService {
    pub fn new() -> Self {
        Self
    }

    fn choose(&self, state: &ConversationState, score: &AffectScore) -> Option<(ActionType, Priority, u64, f32, String)> {
        let text = state.input_text.to_lowercase();
        let typing = &state.typing;

        if score.valence < -0.4 {
            let priority = if score.intensity > 0.6 { Priority::High } else { Priority::Medium };
            return Some((
                ActionType::Support,
                priority,
                3_000,
                0.55 + score.intensity * 0.3,
                format!("negative affect (valence {:.2})", score.valence),
            ));
        }
        if count_marker_hits(&text, UNCERTAIN_MARKERS) > 0 && typing.hesitation_positions.len() >= 2 {
            return Some((
                ActionType::Clarify,
                Priority::Medium,
                4_000,
                0.6,
                format!("uncertain wording with {} hesitations", typing.hesitation_positions.len()),
            ));
        }
        if typing.corrections.len() >= 3 && typing.backspace_count >= 15 {
            return Some((
                ActionType::Encourage,
                Priority::Low,
                6_000,
                0.5,
                format!("{} corrections, {} backspaces", typing.corrections.len(), typing.backspace_count),
            ));
        }
        None
    }
}

#[async_trait]
impl DecisionService for LocalDecisionService {
    fn name(&self) -> &str {
        "local-heuristic"
    }

    async fn decide(&self, state: &ConversationState) -> EngineResult<ServicePayload> {
        if !state.focus.is_focused {
            return Ok(wait_payload("user is not looking at the conversation"));
        }
        if recently_acted(state) {
            return Ok(wait_payload("acted recently"));
        }

        let score = score_affect(&state.input_text);
        let Some((action, priority, delay_ms, confidence, reasoning)) = self.choose(state, &score) else {
            return Ok(wait_payload("nothing calls for a proactive message"));
        };

        let mut payload = json!({
            "shouldAct": true,
            "actionType": action.to_string(),
            "priority": priority.to_string(),
            "delayMs": delay_ms,
            "reasoning": reasoning,
            "confidence": confidence.min(0.95),
        });
        if let Some(message) = canned_message(action, is_norwegian(&state.input_text)) {
            payload["suggestedMessage"] = Value::String(message.to_string());
        }
        Ok(payload)
    }

    async fn compose_message(&self, decision: &Decision, state: &ConversationState) -> EngineResult<Option<String>> {
        Ok(canned_message(decision.action_type, is_norwegian(&state.input_text)).map(String::from))
    }
}

/// Heuristic reflection service. Skips empty drafts; proposes a memory write
/// when the draft states a preference, a fact about the user, or strong
/// feeling.
#[derive(Debug, Default, Clone)]
pub struct LocalReflectionService;

impl LocalReflectionService {
    pub fn new() -> Self {
        Self
    }
}

fn memory_action(text: &str, score: &AffectScore) -> Value {
    let lower = text.to_lowercase();
    let (kind, importance, tag) = if count_marker_hits(&lower, FACT_MARKERS) > 0 {
        ("fact", 0.7, "about-user")
    } else if count_marker_hits(&lower, PREFERENCE_MARKERS) > 0 {
        ("preference", 0.6, "preference")
    } else if score.intensity > 0.6 {
        ("insight", 0.5, "emotional")
    } else {
        return json!({ "shouldSave": false, "content": "", "memoryType": "reflection", "importance": 0.0 });
    };
    json!({
        "shouldSave": true,
        "content": text,
        "memoryType": kind,
        "importance": importance,
        "tags": [tag],
        "reasoning": format!("draft reads as a {}", kind),
    })
}

#[async_trait]
impl ReflectionService for LocalReflectionService {
    fn name(&self) -> &str {
        "local-heuristic"
    }

    async fn reflect(&self, state: &ConversationState) -> EngineResult<Option<ServicePayload>> {
        let text = state.input_text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let score = score_affect(text);
        let label = state_label(&score);
        let excerpt: String = text.chars().take(120).collect();

        Ok(Some(json!({
            "summary": format!("User is writing ({}): \"{}\"", label, excerpt),
            "emotions": emotions_for(&score, text, 4),
            "emotionalState": label,
            "valence": score.valence,
            "intensity": score.intensity,
            "needs": infer_needs(&score, text),
            "memoryAction": memory_action(text, &score),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::memory_types::MemoryKind;
    use crate::atoms::types::LastAction;
    use crate::engine::analysis::validation::{validate_decision, validate_reflection};
    use crate::engine::state_builder::{build_state, SignalTracker, SnapshotContext};
    use chrono::Utc;

    fn state_with(text: &str, ctx: &SnapshotContext) -> ConversationState {
        let mut tracker = SignalTracker::new();
        tracker.on_input(text, Utc::now());
        build_state(&tracker.raw_signals(Utc::now().fixed_offset()), ctx)
    }

    #[tokio::test]
    async fn distress_leads_to_support() {
        let state = state_with("I'm so stressed and exhausted, everything is awful", &SnapshotContext::default());
        let payload = LocalDecisionService::new().decide(&state).await.unwrap();
        let d = validate_decision(&payload, Utc::now()).unwrap();
        assert!(d.should_act);
        assert_eq!(d.action_type, ActionType::Support);
        assert!(d.suggested_message.is_some());
    }

    #[tokio::test]
    async fn neutral_draft_waits() {
        let state = state_with("The meeting is at three tomorrow", &SnapshotContext::default());
        let payload = LocalDecisionService::new().decide(&state).await.unwrap();
        let d = validate_decision(&payload, Utc::now()).unwrap();
        assert!(!d.should_act);
        assert_eq!(d.action_type, ActionType::Wait);
    }

    #[tokio::test]
    async fn cooldown_after_recent_action() {
        let ctx = SnapshotContext {
            last_action: Some(LastAction {
                action_type: ActionType::Support,
                timestamp: Utc::now(),
                reason: "earlier".into(),
            }),
            ..Default::default()
        };
        let state = state_with("I'm so stressed and exhausted", &ctx);
        let payload = LocalDecisionService::new().decide(&state).await.unwrap();
        assert_eq!(payload["shouldAct"], false);
    }

    #[tokio::test]
    async fn norwegian_message_for_norwegian_draft() {
        let state = state_with("Jeg er så sliten og trist, orker ikke mer", &SnapshotContext::default());
        let payload = LocalDecisionService::new().decide(&state).await.unwrap();
        let message = payload["suggestedMessage"].as_str().unwrap();
        assert!(message.contains("Jeg er her"));
    }

    #[tokio::test]
    async fn preference_draft_proposes_memory() {
        let state = state_with("I love a strong cup of coffee in the morning", &SnapshotContext::default());
        let payload = LocalReflectionService::new().reflect(&state).await.unwrap().unwrap();
        let r = validate_reflection(&payload, Utc::now()).unwrap();
        let action = r.memory_action.unwrap();
        assert!(action.should_save);
        assert_eq!(action.memory_type, MemoryKind::Preference);
        assert!(!r.emotions.is_empty());
    }

    #[tokio::test]
    async fn empty_draft_has_nothing_to_reflect_on() {
        let state = state_with("   ", &SnapshotContext::default());
        assert!(LocalReflectionService::new().reflect(&state).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compose_uses_canned_text() {
        let state = state_with("hello there", &SnapshotContext::default());
        let mut decision = Decision::fallback("test");
        decision.action_type = ActionType::CheckIn;
        let text = LocalDecisionService::new().compose_message(&decision, &state).await.unwrap();
        assert_eq!(text.as_deref(), Some("Still there? Just checking in."));
    }
}
