// ── Presence Atoms: Constants ──────────────────────────────────────────────
// All named constants for the crate live here.
// Tunable values also appear as defaults in `PresenceConfig`; the constants
// below are the defaults and the hard invariants the config cannot change.

// ── Decision payload bounds ───────────────────────────────────────────────
// The delay a decision may request before the proactive message goes out.
pub const DECISION_DELAY_MIN_MS: u64 = 500;
pub const DECISION_DELAY_MAX_MS: u64 = 10_000;

/// Confidence assigned to the substitute decision on timeout / failure.
pub const FALLBACK_CONFIDENCE: f32 = 0.1;

// ── Reflection payload bounds ─────────────────────────────────────────────
pub const REFLECTION_MAX_EMOTIONS: usize = 4;

// ── Pipeline defaults ─────────────────────────────────────────────────────
pub const DEFAULT_SETTLE_MS: u64 = 1_000;
pub const DEFAULT_MIN_INPUT_CHARS: usize = 3;
pub const DEFAULT_REFLECTION_MIN_CHARS: usize = 10;
pub const DEFAULT_REFLECTION_WINDOW_MS: u64 = 1_000;
pub const DEFAULT_DECISION_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_REFLECTION_TIMEOUT_MS: u64 = 8_000;
// Must exceed the slowest lane timeout, otherwise it cuts healthy rounds.
pub const DEFAULT_ROUND_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DECISION_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_REFLECTION_HISTORY_LIMIT: usize = 5;
pub const DEFAULT_EMOTIONAL_HISTORY_LIMIT: usize = 10;

/// Capacity of the pipeline event broadcast channel.
pub const PIPELINE_EVENT_CAPACITY: usize = 256;
/// Bound on queued, not-yet-settled snapshots.
pub const PIPELINE_INGEST_CAPACITY: usize = 128;

// ── Typing pattern thresholds ─────────────────────────────────────────────
/// Gap between two keystrokes that counts as a pause.
pub const PAUSE_THRESHOLD_MS: i64 = 1_500;
/// A gap longer than this multiple of the average interval is a hesitation.
pub const HESITATION_INTERVAL_FACTOR: f64 = 3.0;

// ── Engagement ────────────────────────────────────────────────────────────
pub const ENGAGEMENT_WINDOW_MINUTES: i64 = 60;
pub const ENGAGEMENT_LENGTH_UNIT: f64 = 40.0;

// ── Vector memory store ───────────────────────────────────────────────────
pub const DEFAULT_MEMORY_CAPACITY: usize = 2_000;
pub const DEFAULT_EMBEDDING_DIMS: usize = 384;
/// Exactly five reference vectors index every entry.
pub const PIVOT_COUNT: usize = 5;
/// Pivot window half-width as a fraction of the query→pivot distance (±0.3%).
pub const DEFAULT_PIVOT_TOLERANCE: f64 = 0.003;
/// Below this many entries search scans exhaustively instead of via pivots.
pub const DEFAULT_EXACT_SCAN_BELOW: usize = 256;
pub const DEFAULT_EMBEDDING_CACHE_CAPACITY: usize = 512;

/// Index field encoding: 8 integer digits, 8 fractional digits → 17 chars.
pub const INDEX_INT_DIGITS: usize = 8;
pub const INDEX_FRAC_DIGITS: usize = 8;
pub const INDEX_FIELD_WIDTH: usize = INDEX_INT_DIGITS + 1 + INDEX_FRAC_DIGITS;
/// Distances at or above this (and non-finite ones) encode to the sentinel.
pub const INDEX_MAX_DISTANCE: f64 = 99_999_999.0;
pub const INDEX_SENTINEL: &str = "99999999.99999999";

/// Seed texts the reference vectors are embedded from.
pub const PIVOT_SEED_TEXTS: [&str; PIVOT_COUNT] = [
    "everyday life, routines, food and small talk",
    "feelings, worries, stress and emotional wellbeing",
    "work, school, projects and deadlines",
    "family, friends, relationships and people",
    "plans, preferences, hobbies and ideas for the future",
];

// ── Key-value store keys ──────────────────────────────────────────────────
// Stable identifiers: renaming them orphans persisted data.
pub const KV_PIVOTS_KEY: &str = "presence.memory.pivots";
pub const KV_ENTRY_IDS_KEY: &str = "presence.memory.ids";
pub const KV_ENTRY_PREFIX: &str = "presence.memory.entry.";

// ── Paths ─────────────────────────────────────────────────────────────────
pub const APP_DIR_NAME: &str = "pawz-presence";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "presence.db";
pub const CONFIG_ENV_VAR: &str = "PAWZ_PRESENCE_CONFIG";
