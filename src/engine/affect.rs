// ── Affect heuristics ──────────────────────────────────────────────────────
//
// Lexicon scoring of free text into valence / intensity / arousal, with
// English and Norwegian markers. No LLM, single pass, sub-millisecond.
//
// Used in two places:
//   - deriving an emotional-history entry when a reflection payload omits
//     valence or intensity (scored from its emotion symbols and summary)
//   - the local heuristic decision and reflection services

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AffectScore {
    /// -1.0 (unpleasant) .. 1.0 (pleasant)
    pub valence: f32,
    /// 0.0 .. 1.0
    pub intensity: f32,
    /// 0.0 .. 1.0
    pub arousal: f32,
}

impl AffectScore {
    pub fn is_neutral(&self) -> bool {
        self.valence.abs() < 0.1 && self.intensity < 0.1
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Lexicons
// ═════════════════════════════════════════════════════════════════════════════

const POSITIVE_MARKERS: &[&str] = &[
    "thank", "great", "love", "happy", "glad", "excited", "awesome", "nice", "good news",
    "relieved", "proud", "fun", "wonderful", "looking forward",
    // Norwegian
    "takk", "glad i", "elsker", "flott", "gøy", "morsomt", "herlig", "fantastisk", "lettet",
    "stolt", "digg", "koselig", "gleder meg", "fornøyd",
];

const NEGATIVE_MARKERS: &[&str] = &[
    "sad", "tired", "stressed", "stress", "worried", "anxious", "angry", "frustrated", "lonely",
    "hate", "awful", "terrible", "exhausted", "overwhelmed", "upset", "afraid", "hurt", "cry",
    // Norwegian
    "trist", "sliten", "stresset", "bekymret", "redd", "sint", "frustrert", "ensom", "lei meg",
    "forferdelig", "utslitt", "engstelig", "gråte", "vondt", "orker ikke", "hater",
];

const AROUSAL_MARKERS: &[&str] = &[
    "urgent", "now", "asap", "deadline", "panic", "help", "immediately", "can't",
    // Norwegian
    "haster", "nå", "frist", "panikk", "hjelp", "med en gang", "klarer ikke",
];

const UNCERTAIN_MARKERS: &[&str] = &[
    "maybe", "not sure", "i think", "perhaps", "don't know", "confused",
    // Norwegian
    "kanskje", "usikker", "vet ikke", "tror", "forvirret", "skjønner ikke",
];

const FATIGUE_MARKERS: &[&str] = &[
    "tired", "exhausted", "sleepy", "no energy",
    "sliten", "trøtt", "utslitt", "orker ikke",
];

const SOCIAL_MARKERS: &[&str] = &[
    "lonely", "alone", "miss", "nobody",
    "ensom", "alene", "savner", "ingen",
];

/// Emotion symbols (emoji and words) with a signed valence.
const EMOTION_VALENCE: &[(&str, f32)] = &[
    ("😊", 0.7), ("😄", 0.8), ("🙂", 0.4), ("🥰", 0.9), ("😌", 0.5), ("🎉", 0.9),
    ("🤔", 0.0), ("😐", 0.0), ("😕", -0.3), ("😟", -0.5), ("😢", -0.7), ("😭", -0.9),
    ("😠", -0.7), ("😤", -0.6), ("😰", -0.7), ("😩", -0.6), ("😴", -0.2), ("💪", 0.6),
    ("happy", 0.7), ("calm", 0.4), ("curious", 0.3), ("hopeful", 0.5), ("excited", 0.8),
    ("sad", -0.7), ("anxious", -0.6), ("stressed", -0.6), ("angry", -0.7), ("tired", -0.3),
    ("frustrated", -0.6), ("lonely", -0.6), ("confused", -0.3), ("neutral", 0.0),
];

// ═════════════════════════════════════════════════════════════════════════════
// Scoring
// ═════════════════════════════════════════════════════════════════════════════

/// Score free text.
///
/// Valence: balance of positive vs negative markers. Intensity: marker
/// density plus emphasis (exclamation marks, caps words). Arousal: urgency
/// markers plus emphasis.
pub fn score_affect(content: &str) -> AffectScore {
    let lower = content.to_lowercase();
    let words: Vec<&str> = content.split_whitespace().collect();
    let word_count = words.len().max(1) as f32;

    let positive = count_marker_hits(&lower, POSITIVE_MARKERS);
    let negative = count_marker_hits(&lower, NEGATIVE_MARKERS);
    let valence = if positive + negative > 0 {
        (positive as f32 - negative as f32) / (positive + negative) as f32
    } else {
        0.0
    };

    let exclamations = content.chars().filter(|c| *c == '!').count();
    let caps_words = words
        .iter()
        .filter(|w| w.chars().count() > 2 && w.chars().all(|c| !c.is_alphabetic() || c.is_uppercase()))
        .filter(|w| w.chars().any(char::is_alphabetic))
        .count();
    let emphasis = (exclamations as f32 * 0.15 + caps_words as f32 * 0.1).min(1.0);

    let density = ((positive + negative) as f32 * 2.0 / word_count).min(1.0);
    let intensity = density.max(emphasis).max((positive + negative) as f32 * 0.2).clamp(0.0, 1.0);

    let urgency = count_marker_hits(&lower, AROUSAL_MARKERS) as f32 * 0.2;
    let arousal = (urgency + emphasis * 0.5).clamp(0.0, 1.0);

    AffectScore { valence: valence.clamp(-1.0, 1.0), intensity, arousal }
}

/// Valence of a single emotion symbol, if known.
pub fn emotion_valence(symbol: &str) -> Option<f32> {
    let s = symbol.trim().to_lowercase();
    EMOTION_VALENCE.iter().find(|(k, _)| *k == s).map(|(_, v)| *v)
}

/// Mean valence of the recognized symbols; `None` when none are recognized.
pub fn valence_of_emotions(emotions: &[String]) -> Option<f32> {
    let known: Vec<f32> = emotions.iter().filter_map(|e| emotion_valence(e)).collect();
    if known.is_empty() {
        None
    } else {
        Some(known.iter().sum::<f32>() / known.len() as f32)
    }
}

/// Pick up to `max` emoji that fit a score.
pub fn emotions_for(score: &AffectScore, text: &str, max: usize) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut out: Vec<&str> = Vec::new();

    if score.valence > 0.3 {
        out.push(if score.intensity > 0.5 { "😄" } else { "😊" });
    } else if score.valence < -0.3 {
        out.push(if score.intensity > 0.5 { "😢" } else { "😟" });
    } else {
        out.push("🙂");
    }
    if score.arousal > 0.4 {
        out.push("😰");
    }
    if count_marker_hits(&lower, UNCERTAIN_MARKERS) > 0 {
        out.push("🤔");
    }
    if count_marker_hits(&lower, FATIGUE_MARKERS) > 0 {
        out.push("😴");
    }
    if count_marker_hits(&lower, SOCIAL_MARKERS) > 0 {
        out.push("🥺");
    }

    out.dedup();
    out.into_iter().take(max.max(1)).map(String::from).collect()
}

/// Inferred needs behind a text: support, clarity, rest, connection, celebration.
pub fn infer_needs(score: &AffectScore, text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut needs = Vec::new();
    if score.valence < -0.3 {
        needs.push("support");
    }
    if count_marker_hits(&lower, UNCERTAIN_MARKERS) > 0 {
        needs.push("clarity");
    }
    if count_marker_hits(&lower, FATIGUE_MARKERS) > 0 {
        needs.push("rest");
    }
    if count_marker_hits(&lower, SOCIAL_MARKERS) > 0 {
        needs.push("connection");
    }
    if score.valence > 0.5 && score.intensity > 0.4 {
        needs.push("celebration");
    }
    needs.into_iter().map(String::from).collect()
}

/// Short label for an affect score.
pub fn state_label(score: &AffectScore) -> &'static str {
    match (score.valence, score.arousal) {
        (v, a) if v < -0.3 && a > 0.4 => "distressed",
        (v, _) if v < -0.3 => "low",
        (v, a) if v > 0.3 && a > 0.4 => "excited",
        (v, _) if v > 0.3 => "content",
        (_, a) if a > 0.4 => "tense",
        _ => "neutral",
    }
}

/// Count how many markers appear in the text (lowercased substring match).
pub(crate) fn count_marker_hits(text: &str, markers: &[&str]) -> usize {
    markers.iter().filter(|m| text.contains(**m)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_text_scores_neutral() {
        let s = score_affect("The meeting is at three.");
        assert!(s.is_neutral());
        assert_eq!(state_label(&s), "neutral");
    }

    #[test]
    fn norwegian_negative_markers() {
        let s = score_affect("Jeg er så sliten og stresset i dag");
        assert!(s.valence < 0.0);
        assert!(s.intensity > 0.0);
        let needs = infer_needs(&s, "Jeg er så sliten og stresset i dag");
        assert!(needs.contains(&"support".to_string()));
        assert!(needs.contains(&"rest".to_string()));
    }

    #[test]
    fn english_positive_with_emphasis() {
        let s = score_affect("I got the job, this is GREAT!!");
        assert!(s.valence > 0.5);
        assert!(s.arousal > 0.0);
        assert_eq!(state_label(&s), "content");
        assert_eq!(emotions_for(&s, "I got the job", 4)[0], "😊");
    }

    #[test]
    fn emotion_symbols_have_valence() {
        assert_eq!(emotion_valence("😢"), Some(-0.7));
        assert_eq!(emotion_valence(" Happy "), Some(0.7));
        assert_eq!(emotion_valence("🦀"), None);
        let v = valence_of_emotions(&["😊".into(), "😢".into(), "🦀".into()]).unwrap();
        assert!(v.abs() < 1e-6);
        assert!(valence_of_emotions(&["🦀".into()]).is_none());
    }

    #[test]
    fn emotions_are_capped() {
        let text = "kanskje jeg er sliten og ensom, hjelp nå!!!";
        let s = score_affect(text);
        assert!(emotions_for(&s, text, 2).len() <= 2);
        assert!(!emotions_for(&s, text, 4).is_empty());
    }
}
