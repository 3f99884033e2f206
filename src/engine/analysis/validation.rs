// ── Service payload validation ─────────────────────────────────────────────
//
// Decision and reflection services hand back untyped JSON. Everything is
// coerced here:
//   decision    only `shouldAct` is required; other fields fall back to
//               safe defaults and numeric fields are clamped.
//   reflection  needs a non-empty summary and at least one emotion; anything
//               less is discarded.
// Field names are accepted in camelCase and snake_case.

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::memory_types::MemoryKind;
use crate::atoms::traits::ServicePayload;
use crate::atoms::types::*;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_MEMORY_IMPORTANCE: f32 = 0.5;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDecision {
    #[serde(alias = "shouldAct")]
    should_act: Option<Value>,
    #[serde(alias = "actionType", alias = "action")]
    action_type: Option<Value>,
    priority: Option<Value>,
    #[serde(alias = "delayMs", alias = "delay")]
    delay_ms: Option<Value>,
    #[serde(alias = "reason")]
    reasoning: Option<Value>,
    confidence: Option<Value>,
    #[serde(alias = "suggestedMessage", alias = "message")]
    suggested_message: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReflection {
    #[serde(alias = "reflection")]
    summary: Option<Value>,
    emotions: Option<Value>,
    #[serde(alias = "emotionalState", alias = "state")]
    emotional_state: Option<Value>,
    valence: Option<Value>,
    intensity: Option<Value>,
    needs: Option<Value>,
    #[serde(alias = "memoryAction", alias = "memory")]
    memory_action: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMemoryAction {
    #[serde(alias = "shouldSave")]
    should_save: Option<Value>,
    content: Option<Value>,
    #[serde(alias = "memoryType", alias = "type")]
    memory_type: Option<Value>,
    importance: Option<Value>,
    tags: Option<Value>,
    reasoning: Option<Value>,
}

// ── Scalar coercion ────────────────────────────────────────────────────────

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Arrays of strings, or a single comma/space separated string.
fn as_string_list(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items.iter().filter_map(as_text).collect(),
        Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn clamp_unit(v: f64) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0) as f32
    }
}

fn clamp_delay(v: Option<f64>) -> u64 {
    match v {
        Some(d) if d.is_finite() => d.round().clamp(DECISION_DELAY_MIN_MS as f64, DECISION_DELAY_MAX_MS as f64) as u64,
        _ => DECISION_DELAY_MIN_MS,
    }
}

// ── Decision ───────────────────────────────────────────────────────────────

/// Coerce a decision payload. Fails only if the payload is not an object or
/// has no usable `shouldAct`; the caller substitutes the fallback decision.
pub fn validate_decision(payload: &ServicePayload, now: DateTime<Utc>) -> EngineResult<Decision> {
    if !payload.is_object() {
        return Err(EngineError::Validation("decision payload is not an object".into()));
    }
    let raw: RawDecision = serde_json::from_value(payload.clone())
        .map_err(|e| EngineError::Validation(format!("decision payload: {}", e)))?;

    let should_act = raw
        .should_act
        .as_ref()
        .and_then(as_bool)
        .ok_or_else(|| EngineError::Validation("decision payload has no shouldAct".into()))?;

    let action_type = match raw.action_type.as_ref().and_then(as_text) {
        Some(s) => s.parse::<ActionType>().unwrap_or_else(|e| {
            debug!("[decision] {}; treating as wait", e);
            ActionType::Wait
        }),
        None => ActionType::Wait,
    };

    let priority = raw
        .priority
        .as_ref()
        .and_then(as_text)
        .and_then(|s| s.parse::<Priority>().ok())
        .unwrap_or_default();

    let confidence = raw.confidence.as_ref().and_then(as_f64).map(clamp_unit).unwrap_or(DEFAULT_CONFIDENCE);

    Ok(Decision {
        should_act: should_act && action_type != ActionType::Wait,
        action_type,
        priority,
        delay_ms: clamp_delay(raw.delay_ms.as_ref().and_then(as_f64)),
        reasoning: raw.reasoning.as_ref().and_then(as_text).unwrap_or_default(),
        confidence,
        suggested_message: raw.suggested_message.as_ref().and_then(as_text),
        source: DecisionSource::Service,
        decided_at: now,
    })
}

// ── Reflection ─────────────────────────────────────────────────────────────

fn validate_memory_action(v: &Value, summary: &str) -> Option<MemoryAction> {
    let raw: RawMemoryAction = serde_json::from_value(v.clone()).ok()?;
    let should_save = raw.should_save.as_ref().and_then(as_bool).unwrap_or(false);
    let content = raw
        .content
        .as_ref()
        .and_then(as_text)
        .unwrap_or_else(|| summary.to_string());
    let memory_type = raw
        .memory_type
        .as_ref()
        .and_then(as_text)
        .and_then(|s| s.parse::<MemoryKind>().ok())
        .unwrap_or(MemoryKind::Reflection);

    Some(MemoryAction {
        should_save,
        content,
        memory_type,
        importance: raw
            .importance
            .as_ref()
            .and_then(as_f64)
            .map(clamp_unit)
            .unwrap_or(DEFAULT_MEMORY_IMPORTANCE),
        tags: raw.tags.as_ref().map(as_string_list).unwrap_or_default(),
        reasoning: raw.reasoning.as_ref().and_then(as_text).unwrap_or_default(),
    })
}

/// Validate a reflection payload. Malformed payloads are an error the
/// reflection lane turns into a silent skip.
pub fn validate_reflection(payload: &ServicePayload, now: DateTime<Utc>) -> EngineResult<Reflection> {
    if !payload.is_object() {
        return Err(EngineError::Validation("reflection payload is not an object".into()));
    }
    let raw: RawReflection = serde_json::from_value(payload.clone())
        .map_err(|e| EngineError::Validation(format!("reflection payload: {}", e)))?;

    let summary = raw
        .summary
        .as_ref()
        .and_then(as_text)
        .ok_or_else(|| EngineError::Validation("reflection has no summary".into()))?;

    let mut emotions = raw.emotions.as_ref().map(as_string_list).unwrap_or_default();
    if emotions.is_empty() {
        return Err(EngineError::Validation("reflection has no emotions".into()));
    }
    emotions.truncate(REFLECTION_MAX_EMOTIONS);

    let memory_action = raw.memory_action.as_ref().and_then(|v| validate_memory_action(v, &summary));

    Ok(Reflection {
        emotional_state: raw.emotional_state.as_ref().and_then(as_text).unwrap_or_else(|| "neutral".into()),
        valence: raw
            .valence
            .as_ref()
            .and_then(as_f64)
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(-1.0, 1.0) as f32),
        intensity: raw.intensity.as_ref().and_then(as_f64).filter(|v| v.is_finite()).map(clamp_unit),
        needs: raw.needs.as_ref().map(as_string_list).unwrap_or_default(),
        summary,
        emotions,
        memory_action,
        created_at: now,
    })
}
