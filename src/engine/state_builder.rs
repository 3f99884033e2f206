// ── Conversation state builder ─────────────────────────────────────────────
//
// `build_state` is a pure function: raw signals + pipeline-owned context in,
// immutable `ConversationState` out. No clock reads, no I/O; the caller
// supplies "now" inside `RawSignals`.
//
// `SignalTracker` is the host-side accumulator that turns draft-text updates,
// focus changes and sent messages into `RawSignals`.

use crate::atoms::constants::*;
use crate::atoms::types::*;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Keystroke log is capped; older events carry no signal for the current draft.
const MAX_KEYSTROKES: usize = 4_096;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Insert,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeystrokeEvent {
    pub at: DateTime<Utc>,
    pub kind: KeyKind,
    /// Chars inserted or removed by this event.
    pub chars: usize,
    /// Draft length (in chars) after the event.
    pub length_after: usize,
}

/// Everything the host observed, as of `now`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignals {
    pub input_text: String,
    pub keystrokes: Vec<KeystrokeEvent>,
    pub history: Vec<HistoryMessage>,
    pub focus: FocusState,
    /// Local wall-clock time; the offset decides time-of-day and weekday.
    pub now: DateTime<FixedOffset>,
}

/// State owned by the pipeline and passed explicitly into each build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotContext {
    pub emotional_history: Vec<EmotionalHistoryEntry>,
    pub last_action: Option<LastAction>,
}

pub fn build_state(raw: &RawSignals, ctx: &SnapshotContext) -> ConversationState {
    let now_utc = raw.now.with_timezone(&Utc);
    ConversationState {
        input_text: raw.input_text.clone(),
        input_started_at: raw.keystrokes.first().map(|k| k.at),
        last_keystroke_at: raw.keystrokes.last().map(|k| k.at),
        typing: derive_typing_pattern(&raw.keystrokes),
        history: raw.history.clone(),
        temporal: temporal_context(raw.now, &raw.history),
        focus: raw.focus.clone(),
        emotional_history: ctx.emotional_history.clone(),
        engagement: engagement_level(&raw.history, now_utc),
        last_action: ctx.last_action.clone(),
        created_at: now_utc,
    }
}

// ── Typing pattern ─────────────────────────────────────────────────────────

pub fn derive_typing_pattern(keystrokes: &[KeystrokeEvent]) -> TypingPattern {
    let mut pattern = TypingPattern::default();
    if keystrokes.is_empty() {
        return pattern;
    }

    let intervals: Vec<i64> = keystrokes
        .windows(2)
        .map(|w| (w[1].at - w[0].at).num_milliseconds().max(0))
        .collect();
    if !intervals.is_empty() {
        pattern.average_interval_ms = intervals.iter().sum::<i64>() as f64 / intervals.len() as f64;
    }

    // Pauses and hesitations. A hesitation is a pause followed by a deletion,
    // or any gap well above the typist's own average.
    for (i, gap) in intervals.iter().enumerate() {
        let before = &keystrokes[i];
        let after = &keystrokes[i + 1];
        let is_pause = *gap >= PAUSE_THRESHOLD_MS;
        if is_pause {
            pattern.pauses.push(TypingPause { at_char: before.length_after, duration_ms: *gap });
        }
        let unusually_long = pattern.average_interval_ms > 0.0
            && *gap as f64 > HESITATION_INTERVAL_FACTOR * pattern.average_interval_ms;
        if (is_pause && after.kind == KeyKind::Delete) || unusually_long {
            if pattern.hesitation_positions.last() != Some(&before.length_after) {
                pattern.hesitation_positions.push(before.length_after);
            }
        }
    }

    // Corrections: runs of consecutive deletions.
    let mut run: Option<CorrectionEvent> = None;
    for k in keystrokes {
        match k.kind {
            KeyKind::Delete => {
                pattern.backspace_count += k.chars;
                match run.as_mut() {
                    Some(r) => r.removed_chars += k.chars,
                    None => {
                        run = Some(CorrectionEvent {
                            at_char: k.length_after + k.chars,
                            removed_chars: k.chars,
                            timestamp: k.at,
                        })
                    }
                }
            }
            KeyKind::Insert => {
                if let Some(r) = run.take() {
                    pattern.corrections.push(r);
                }
            }
        }
    }
    if let Some(r) = run {
        pattern.corrections.push(r);
    }

    let inserted: usize = keystrokes.iter().filter(|k| k.kind == KeyKind::Insert).map(|k| k.chars).sum();
    let span_ms = (keystrokes[keystrokes.len() - 1].at - keystrokes[0].at).num_milliseconds();
    if span_ms > 0 {
        pattern.chars_per_minute = inserted as f64 / (span_ms as f64 / 60_000.0);
    }
    pattern
}

// ── Temporal context & engagement ──────────────────────────────────────────

pub fn temporal_context(now: DateTime<FixedOffset>, history: &[HistoryMessage]) -> TemporalContext {
    let weekday = now.weekday();
    TemporalContext {
        time_of_day: TimeOfDay::from_hour(now.hour()),
        weekday,
        hour: now.hour(),
        is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
        minutes_since_last_message: history
            .last()
            .map(|m| (now.with_timezone(&Utc) - m.timestamp).num_minutes().max(0)),
    }
}

/// Frequency of recent user messages times their average length.
pub fn engagement_level(history: &[HistoryMessage], now: DateTime<Utc>) -> EngagementLevel {
    let window_start = now - Duration::minutes(ENGAGEMENT_WINDOW_MINUTES);
    let recent: Vec<&HistoryMessage> = history
        .iter()
        .filter(|m| m.role == Role::User && m.timestamp >= window_start && m.timestamp <= now)
        .collect();
    if recent.is_empty() {
        return EngagementLevel::Low;
    }
    let avg_len = recent.iter().map(|m| m.content.chars().count()).sum::<usize>() as f64 / recent.len() as f64;
    let score = recent.len() as f64 * (avg_len / ENGAGEMENT_LENGTH_UNIT);
    if score < 1.0 {
        EngagementLevel::Low
    } else if score < 4.0 {
        EngagementLevel::Medium
    } else {
        EngagementLevel::High
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Signal tracker
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct SignalTracker {
    text: String,
    keystrokes: Vec<KeystrokeEvent>,
    history: Vec<HistoryMessage>,
    focus: FocusState,
}

impl SignalTracker {
    pub fn new() -> Self {
        Self { focus: FocusState { is_focused: true, ..Default::default() }, ..Default::default() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn history(&self) -> &[HistoryMessage] {
        &self.history
    }

    /// Record a new draft value, diffed against the previous one.
    pub fn on_input(&mut self, new_text: &str, at: DateTime<Utc>) {
        let old: Vec<char> = self.text.chars().collect();
        let new: Vec<char> = new_text.chars().collect();
        let prefix = old.iter().zip(new.iter()).take_while(|(a, b)| a == b).count();
        let removed = old.len() - prefix;
        let added = new.len() - prefix;

        if removed > 0 {
            self.push_key(KeystrokeEvent { at, kind: KeyKind::Delete, chars: removed, length_after: prefix });
        }
        if added > 0 {
            self.push_key(KeystrokeEvent { at, kind: KeyKind::Insert, chars: added, length_after: new.len() });
        }
        if new_text.is_empty() {
            self.keystrokes.clear();
        }
        self.text = new_text.to_string();
    }

    fn push_key(&mut self, event: KeystrokeEvent) {
        if self.keystrokes.len() >= MAX_KEYSTROKES {
            self.keystrokes.remove(0);
        }
        self.keystrokes.push(event);
    }

    pub fn on_focus(&mut self, at: DateTime<Utc>) {
        self.focus.is_focused = true;
        self.focus.last_focus_at = Some(at);
    }

    pub fn on_blur(&mut self, at: DateTime<Utc>) {
        self.focus.is_focused = false;
        self.focus.last_blur_at = Some(at);
    }

    /// Append a message. A user message is the sent draft, so the draft
    /// and its keystroke log reset.
    pub fn on_message(&mut self, role: Role, content: impl Into<String>, at: DateTime<Utc>) {
        self.history.push(HistoryMessage::new(role, content, at));
        if role == Role::User {
            self.text.clear();
            self.keystrokes.clear();
        }
    }

    pub fn raw_signals(&self, now: DateTime<FixedOffset>) -> RawSignals {
        RawSignals {
            input_text: self.text.clone(),
            keystrokes: self.keystrokes.clone(),
            history: self.history.clone(),
            focus: self.focus.clone(),
            now,
        }
    }
}
