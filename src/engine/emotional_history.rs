// ── Rolling emotional history ──────────────────────────────────────────────
//
// The reflection lane derives one entry per accepted reflection; the state
// builder copies the ring into every snapshot so the decision service sees
// how the user has been feeling, not just what they typed last.

use crate::atoms::types::{EmotionalHistoryEntry, Reflection};
use crate::engine::affect::{score_affect, valence_of_emotions};
use crate::engine::history::BoundedHistory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum change in mean valence between the older and newer half of the
/// ring that counts as a trend.
const TREND_THRESHOLD: f32 = 0.15;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalTrend {
    Improving,
    Declining,
    Stable,
}

/// Derive a history entry from a validated reflection.
///
/// Missing valence is taken from the emotion symbols, then from the summary
/// text; missing intensity from the summary's lexicon score.
pub fn entry_from_reflection(reflection: &Reflection) -> EmotionalHistoryEntry {
    let text = format!("{} {}", reflection.summary, reflection.emotional_state);
    let scored = score_affect(&text);

    let valence = reflection
        .valence
        .filter(|v| v.is_finite())
        .or_else(|| valence_of_emotions(&reflection.emotions))
        .unwrap_or(scored.valence)
        .clamp(-1.0, 1.0);

    let intensity = reflection
        .intensity
        .filter(|v| v.is_finite())
        .unwrap_or_else(|| scored.intensity.max(valence.abs() * 0.5))
        .clamp(0.0, 1.0);

    EmotionalHistoryEntry {
        timestamp: reflection.created_at,
        emotions: reflection.emotions.clone(),
        valence,
        intensity,
        needs: reflection.needs.clone(),
    }
}

#[derive(Debug, Clone)]
pub struct EmotionalHistory {
    ring: BoundedHistory<EmotionalHistoryEntry>,
}

impl EmotionalHistory {
    pub fn new(capacity: usize) -> Self {
        Self { ring: BoundedHistory::new(capacity) }
    }

    pub fn push(&mut self, entry: EmotionalHistoryEntry) {
        self.ring.push(entry);
    }

    pub fn entries(&self) -> Vec<EmotionalHistoryEntry> {
        self.ring.to_vec()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn latest(&self) -> Option<&EmotionalHistoryEntry> {
        self.ring.latest()
    }

    pub fn average_valence(&self) -> Option<f32> {
        if self.ring.is_empty() {
            return None;
        }
        Some(self.ring.iter().map(|e| e.valence).sum::<f32>() / self.ring.len() as f32)
    }

    /// Compare the mean valence of the newer half against the older half.
    pub fn trend(&self) -> EmotionalTrend {
        let all = self.ring.to_vec();
        if all.len() < 2 {
            return EmotionalTrend::Stable;
        }
        let mid = all.len() / 2;
        let mean = |s: &[EmotionalHistoryEntry]| s.iter().map(|e| e.valence).sum::<f32>() / s.len() as f32;
        let delta = mean(&all[mid..]) - mean(&all[..mid]);
        if delta > TREND_THRESHOLD {
            EmotionalTrend::Improving
        } else if delta < -TREND_THRESHOLD {
            EmotionalTrend::Declining
        } else {
            EmotionalTrend::Stable
        }
    }

    /// Most frequent emotion symbols, most recent first among equals.
    pub fn dominant_emotions(&self, n: usize) -> Vec<String> {
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (pos, entry) in self.ring.iter().enumerate() {
            for emotion in &entry.emotions {
                let slot = counts.entry(emotion.as_str()).or_insert((0, pos));
                slot.0 += 1;
                slot.1 = pos;
            }
        }
        let mut ranked: Vec<(&str, usize, usize)> = counts.into_iter().map(|(k, (c, p))| (k, c, p)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.2.cmp(&a.2)));
        ranked.into_iter().take(n).map(|(k, _, _)| k.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(valence: f32, emotions: &[&str]) -> EmotionalHistoryEntry {
        EmotionalHistoryEntry {
            timestamp: Utc::now(),
            emotions: emotions.iter().map(|s| s.to_string()).collect(),
            valence,
            intensity: 0.5,
            needs: vec![],
        }
    }

    fn reflection(valence: Option<f32>, emotions: &[&str], summary: &str) -> Reflection {
        Reflection {
            summary: summary.into(),
            emotions: emotions.iter().map(|s| s.to_string()).collect(),
            emotional_state: "neutral".into(),
            valence,
            intensity: None,
            needs: vec!["support".into()],
            memory_action: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn bounded_to_capacity() {
        let mut h = EmotionalHistory::new(3);
        for v in [0.1, 0.2, 0.3, 0.4] {
            h.push(entry(v, &["🙂"]));
        }
        assert_eq!(h.len(), 3);
        assert!((h.average_valence().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn trend_detection() {
        let mut h = EmotionalHistory::new(10);
        assert_eq!(h.trend(), EmotionalTrend::Stable);
        for v in [-0.6, -0.5, 0.2, 0.4] {
            h.push(entry(v, &[]));
        }
        assert_eq!(h.trend(), EmotionalTrend::Improving);

        let mut h = EmotionalHistory::new(10);
        for v in [0.5, 0.4, -0.3, -0.6] {
            h.push(entry(v, &[]));
        }
        assert_eq!(h.trend(), EmotionalTrend::Declining);
    }

    #[test]
    fn dominant_emotions_by_frequency_then_recency() {
        let mut h = EmotionalHistory::new(10);
        h.push(entry(0.0, &["😟", "🤔"]));
        h.push(entry(0.0, &["😟"]));
        h.push(entry(0.0, &["😊"]));
        assert_eq!(h.dominant_emotions(2), vec!["😟".to_string(), "😊".to_string()]);
    }

    #[test]
    fn derived_entry_prefers_explicit_valence() {
        let e = entry_from_reflection(&reflection(Some(0.9), &["😢"], "Feeling down"));
        assert!((e.valence - 0.9).abs() < 1e-6);
        assert_eq!(e.needs, vec!["support".to_string()]);
    }

    #[test]
    fn derived_entry_falls_back_to_emotion_symbols() {
        let e = entry_from_reflection(&reflection(None, &["😢", "😟"], "Brukeren virker nedfor"));
        assert!((e.valence + 0.6).abs() < 1e-6);
        assert!(e.intensity > 0.0 && e.intensity <= 1.0);
    }
}
