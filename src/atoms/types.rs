// ── Presence Atoms: Conversation, Decision & Reflection Types ──────────────
//
// Pure data types shared by the state builder, the analysis pipeline and the
// external service traits. No logic beyond parsing, clamping and defaults.
//
// Follows the project pattern: structs in atoms/, behavior in engine/.

use crate::atoms::constants::*;
use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Conversation Snapshot
// ═══════════════════════════════════════════════════════════════════════════

/// Who authored a message in the conversation history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One message in the ordered conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryMessage {
    pub fn new(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { role, content: content.into(), timestamp }
    }
}

/// A gap in typing long enough to count as a pause.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypingPause {
    /// Draft length (in chars) when the pause began.
    pub at_char: usize,
    pub duration_ms: i64,
}

/// A run of consecutive deletions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectionEvent {
    /// Draft length (in chars) before the first deletion of the run.
    pub at_char: usize,
    pub removed_chars: usize,
    pub timestamp: DateTime<Utc>,
}

/// Derived keystroke statistics for the current draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TypingPattern {
    pub average_interval_ms: f64,
    pub pauses: Vec<TypingPause>,
    pub hesitation_positions: Vec<usize>,
    pub corrections: Vec<CorrectionEvent>,
    pub backspace_count: usize,
    pub chars_per_minute: f64,
}

impl TypingPattern {
    pub fn longest_pause_ms(&self) -> i64 {
        self.pauses.iter().map(|p| p.duration_ms).max().unwrap_or(0)
    }
}

/// Coarse wall-clock bucket, in the user's local time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Night,
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    /// 05–11 morning, 12–16 afternoon, 17–21 evening, otherwise night.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemporalContext {
    pub time_of_day: TimeOfDay,
    pub weekday: Weekday,
    pub hour: u32,
    pub is_weekend: bool,
    /// Minutes since the newest history message, if any.
    pub minutes_since_last_message: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FocusState {
    pub is_focused: bool,
    pub last_focus_at: Option<DateTime<Utc>>,
    pub last_blur_at: Option<DateTime<Utc>>,
}

/// One entry of the rolling emotional history, derived from a reflection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmotionalHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub emotions: Vec<String>,
    /// -1.0 (unpleasant) .. 1.0 (pleasant).
    pub valence: f32,
    /// 0.0 .. 1.0.
    pub intensity: f32,
    pub needs: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EngagementLevel {
    Low,
    Medium,
    High,
}

/// The most recent proactive action the agent took on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastAction {
    pub action_type: ActionType,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Immutable snapshot of everything the analysis lanes may look at.
///
/// Built fresh by `engine::state_builder::build_state` from the latest
/// signals; never mutated after creation. The pipeline passes snapshots
/// around as `Arc<ConversationState>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    pub input_text: String,
    pub input_started_at: Option<DateTime<Utc>>,
    pub last_keystroke_at: Option<DateTime<Utc>>,
    pub typing: TypingPattern,
    pub history: Vec<HistoryMessage>,
    pub temporal: TemporalContext,
    pub focus: FocusState,
    pub emotional_history: Vec<EmotionalHistoryEntry>,
    pub engagement: EngagementLevel,
    pub last_action: Option<LastAction>,
    pub created_at: DateTime<Utc>,
}

impl ConversationState {
    /// Number of chars in the trimmed draft.
    pub fn trimmed_len(&self) -> usize {
        self.input_text.trim().chars().count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Decision
// ═══════════════════════════════════════════════════════════════════════════

/// What the agent intends to do proactively.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Wait,
    Reflect,
    Support,
    Clarify,
    Encourage,
    CheckIn,
    Apologize,
    Redirect,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Wait => write!(f, "wait"),
            ActionType::Reflect => write!(f, "reflect"),
            ActionType::Support => write!(f, "support"),
            ActionType::Clarify => write!(f, "clarify"),
            ActionType::Encourage => write!(f, "encourage"),
            ActionType::CheckIn => write!(f, "check_in"),
            ActionType::Apologize => write!(f, "apologize"),
            ActionType::Redirect => write!(f, "redirect"),
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "wait" => Ok(ActionType::Wait),
            "reflect" => Ok(ActionType::Reflect),
            "support" => Ok(ActionType::Support),
            "clarify" => Ok(ActionType::Clarify),
            "encourage" => Ok(ActionType::Encourage),
            "check_in" | "checkin" => Ok(ActionType::CheckIn),
            "apologize" | "apologise" => Ok(ActionType::Apologize),
            "redirect" => Ok(ActionType::Redirect),
            other => Err(format!("unknown action type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "normal" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" | "critical" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Service,
    /// Substituted after a timeout, service error or malformed payload.
    Fallback,
}

/// Validated output of the decision lane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub should_act: bool,
    pub action_type: ActionType,
    pub priority: Priority,
    /// Always within [DECISION_DELAY_MIN_MS, DECISION_DELAY_MAX_MS].
    pub delay_ms: u64,
    pub reasoning: String,
    /// Always within [0, 1].
    pub confidence: f32,
    pub suggested_message: Option<String>,
    pub source: DecisionSource,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    /// The safe default: wait, low priority, low confidence.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            should_act: false,
            action_type: ActionType::Wait,
            priority: Priority::Low,
            delay_ms: DECISION_DELAY_MIN_MS,
            reasoning: reason.into(),
            confidence: FALLBACK_CONFIDENCE,
            suggested_message: None,
            source: DecisionSource::Fallback,
            decided_at: Utc::now(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == DecisionSource::Fallback
    }
}

/// A message the agent sends on its own, handed to the `ProactiveSink`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProactiveMessage {
    pub text: String,
    pub action_type: ActionType,
    pub priority: Priority,
    pub reasoning: String,
    pub decided_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Reflection
// ═══════════════════════════════════════════════════════════════════════════

/// Instruction attached to a reflection asking for a long-term memory write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAction {
    pub should_save: bool,
    pub content: String,
    pub memory_type: crate::atoms::memory_types::MemoryKind,
    /// Clamped to [0, 1].
    pub importance: f32,
    pub tags: Vec<String>,
    pub reasoning: String,
}

/// Validated output of the reflection lane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    pub summary: String,
    /// 1..=4 short emotion symbols (emoji or words).
    pub emotions: Vec<String>,
    pub emotional_state: String,
    pub valence: Option<f32>,
    pub intensity: Option<f32>,
    pub needs: Vec<String>,
    pub memory_action: Option<MemoryAction>,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Timing and bounds of the analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Quiet period that collapses a burst of snapshots into one.
    pub settle_ms: u64,
    /// Trimmed draft length below which nothing is analyzed.
    pub min_input_chars: usize,
    /// Trimmed draft length below which the reflection service is not called.
    pub reflection_min_chars: usize,
    /// Buffer window of the reflection lane (latest snapshot wins).
    pub reflection_window_ms: u64,
    pub decision_timeout_ms: u64,
    pub reflection_timeout_ms: u64,
    /// Shared cutoff that abandons in-flight rounds.
    pub round_timeout_ms: u64,
    pub decision_history_limit: usize,
    pub reflection_history_limit: usize,
    pub emotional_history_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            settle_ms: DEFAULT_SETTLE_MS,
            min_input_chars: DEFAULT_MIN_INPUT_CHARS,
            reflection_min_chars: DEFAULT_REFLECTION_MIN_CHARS,
            reflection_window_ms: DEFAULT_REFLECTION_WINDOW_MS,
            decision_timeout_ms: DEFAULT_DECISION_TIMEOUT_MS,
            reflection_timeout_ms: DEFAULT_REFLECTION_TIMEOUT_MS,
            round_timeout_ms: DEFAULT_ROUND_TIMEOUT_MS,
            decision_history_limit: DEFAULT_DECISION_HISTORY_LIMIT,
            reflection_history_limit: DEFAULT_REFLECTION_HISTORY_LIMIT,
            emotional_history_limit: DEFAULT_EMOTIONAL_HISTORY_LIMIT,
        }
    }
}

/// Vector memory store tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryStoreConfig {
    pub capacity: usize,
    pub pivot_tolerance: f64,
    pub exact_scan_below: usize,
    pub embedding_cache_capacity: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMORY_CAPACITY,
            pivot_tolerance: DEFAULT_PIVOT_TOLERANCE,
            exact_scan_below: DEFAULT_EXACT_SCAN_BELOW,
            embedding_cache_capacity: DEFAULT_EMBEDDING_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Deterministic local feature hashing; no network.
    #[default]
    Hashing,
    /// Ollama (or any OpenAI-compatible) embedding endpoint.
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub base_url: String,
    pub model: String,
    pub dims: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Hashing,
            base_url: "http://localhost:11434".into(),
            model: "all-minilm".into(),
            dims: DEFAULT_EMBEDDING_DIMS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file backing the key-value store. `None` → platform data dir.
    pub db_path: Option<std::path::PathBuf>,
}

/// Top-level configuration. Every previously hardcoded value lives here with
/// a documented default; a TOML file may override any subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceConfig {
    pub pipeline: PipelineConfig,
    pub memory: MemoryStoreConfig,
    pub embedding: EmbeddingConfig,
    pub storage: StorageConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_parsing_accepts_variants() {
        assert_eq!("check_in".parse::<ActionType>().unwrap(), ActionType::CheckIn);
        assert_eq!("check-in".parse::<ActionType>().unwrap(), ActionType::CheckIn);
        assert_eq!(" Support ".parse::<ActionType>().unwrap(), ActionType::Support);
        assert!("dance".parse::<ActionType>().is_err());
    }

    #[test]
    fn action_type_display_round_trips() {
        for t in [
            ActionType::Wait,
            ActionType::Reflect,
            ActionType::Support,
            ActionType::Clarify,
            ActionType::Encourage,
            ActionType::CheckIn,
            ActionType::Apologize,
            ActionType::Redirect,
        ] {
            assert_eq!(t.to_string().parse::<ActionType>().unwrap(), t);
        }
    }

    #[test]
    fn priority_default_is_low() {
        assert_eq!(Priority::default(), Priority::Low);
        assert!(Priority::Urgent > Priority::High);
    }

    #[test]
    fn fallback_decision_is_safe() {
        let d = Decision::fallback("timeout");
        assert!(!d.should_act);
        assert_eq!(d.action_type, ActionType::Wait);
        assert!(d.confidence < 0.5);
        assert!(d.is_fallback());
    }

    #[test]
    fn time_of_day_buckets() {
        assert_eq!(TimeOfDay::from_hour(3), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(7), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(13), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(20), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(23), TimeOfDay::Night);
    }

    #[test]
    fn config_partial_toml_keeps_defaults() {
        let cfg: PresenceConfig = toml::from_str("[pipeline]\nsettle_ms = 250\n").unwrap();
        assert_eq!(cfg.pipeline.settle_ms, 250);
        assert_eq!(cfg.pipeline.decision_timeout_ms, DEFAULT_DECISION_TIMEOUT_MS);
        assert_eq!(cfg.memory.capacity, DEFAULT_MEMORY_CAPACITY);
    }
}
