// Pawz Presence: Configuration Loader
//
// Reads `PresenceConfig` from TOML. Lookup order:
//   1. the path in $PAWZ_PRESENCE_CONFIG
//   2. <config_dir>/pawz-presence/config.toml
// A missing file is not an error: every field has a default. A file that
// exists but does not parse, or parses into invalid values, is.

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::PresenceConfig;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Where the config file is looked for, honoring the env override.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Default database location: <data_dir>/pawz-presence/presence.db.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join(DB_FILE_NAME)
}

/// Load from the default location.
pub fn load() -> EngineResult<PresenceConfig> {
    match config_path() {
        Some(path) => load_from(&path),
        None => {
            warn!("[config] No config directory on this platform, using defaults");
            Ok(PresenceConfig::default())
        }
    }
}

/// Load from `path`; defaults when the file does not exist.
pub fn load_from(path: &Path) -> EngineResult<PresenceConfig> {
    if !path.exists() {
        info!("[config] {} not found, using defaults", path.display());
        return Ok(PresenceConfig::default());
    }
    let raw = std::fs::read_to_string(path)?;
    let config = parse(&raw)?;
    info!("[config] Loaded {}", path.display());
    Ok(config)
}

/// Parse and validate TOML text.
pub fn parse(raw: &str) -> EngineResult<PresenceConfig> {
    let config: PresenceConfig = toml::from_str(raw)?;
    validate(&config)?;
    Ok(config)
}

pub fn to_toml(config: &PresenceConfig) -> EngineResult<String> {
    toml::to_string_pretty(config).map_err(|e| EngineError::Config(e.to_string()))
}

/// The database file the config points at, or the platform default.
pub fn resolve_db_path(config: &PresenceConfig) -> PathBuf {
    config.storage.db_path.clone().unwrap_or_else(default_db_path)
}

const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1_000;

fn check_timeout(name: &str, ms: u64) -> EngineResult<()> {
    if ms == 0 || ms > MAX_TIMEOUT_MS {
        return Err(EngineError::Config(format!(
            "pipeline.{} must be between 1 and {} ms, got {}",
            name, MAX_TIMEOUT_MS, ms
        )));
    }
    Ok(())
}

pub fn validate(config: &PresenceConfig) -> EngineResult<()> {
    let p = &config.pipeline;
    check_timeout("settle_ms", p.settle_ms)?;
    check_timeout("reflection_window_ms", p.reflection_window_ms)?;
    check_timeout("decision_timeout_ms", p.decision_timeout_ms)?;
    check_timeout("reflection_timeout_ms", p.reflection_timeout_ms)?;
    check_timeout("round_timeout_ms", p.round_timeout_ms)?;

    if p.reflection_min_chars < p.min_input_chars {
        return Err(EngineError::Config(format!(
            "pipeline.reflection_min_chars ({}) is below pipeline.min_input_chars ({})",
            p.reflection_min_chars, p.min_input_chars
        )));
    }
    if p.round_timeout_ms <= p.decision_timeout_ms.max(p.reflection_timeout_ms) {
        warn!(
            "[config] round_timeout_ms={} does not exceed the lane timeouts; slow rounds will be abandoned",
            p.round_timeout_ms
        );
    }
    for (name, limit) in [
        ("decision_history_limit", p.decision_history_limit),
        ("reflection_history_limit", p.reflection_history_limit),
        ("emotional_history_limit", p.emotional_history_limit),
    ] {
        if limit == 0 {
            return Err(EngineError::Config(format!("pipeline.{} must be at least 1", name)));
        }
    }

    let m = &config.memory;
    if m.capacity == 0 {
        return Err(EngineError::Config("memory.capacity must be at least 1".into()));
    }
    if !m.pivot_tolerance.is_finite() || m.pivot_tolerance < 0.0 {
        return Err(EngineError::Config(format!(
            "memory.pivot_tolerance must be a non-negative number, got {}",
            m.pivot_tolerance
        )));
    }
    if config.embedding.dims == 0 {
        return Err(EngineError::Config("embedding.dims must be at least 1".into()));
    }
    if config.embedding.base_url.trim().is_empty() {
        return Err(EngineError::Config("embedding.base_url is empty".into()));
    }
    Ok(())
}
