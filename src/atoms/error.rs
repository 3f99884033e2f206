// ── Presence Atoms: Error Types ────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Provider, Service…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Service / timeout / validation errors never leave the analysis pipeline;
//     they are converted to a safe default or a silent skip at the lane.
//   • Provider errors (embedding) DO propagate out of memory insert/search.
//   • No variant carries secret material (API keys, passwords) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML config file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Embedding provider failure (quota, network, auth, empty vector).
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Decision / reflection service failure (transport or service-side).
    #[error("Service error: {service}: {message}")]
    Service { service: String, message: String },

    /// A bounded operation did not finish in time.
    #[error("Timeout: {operation} exceeded {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// Payload from a service is structurally invalid or missing required fields.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persisted data is unreadable.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Engine configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The pipeline has been shut down and no longer accepts work.
    #[error("Closed: {0}")]
    Closed(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    /// Create a service error with name and message.
    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service { service: service.into(), message: message.into() }
    }

    /// Create a timeout error for a named operation.
    pub fn timeout(operation: impl Into<String>, after_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), after_ms }
    }

    /// True for failures the pipeline recovers from locally
    /// (timeouts, service transport errors, malformed payloads).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Service { .. }
                | EngineError::Timeout { .. }
                | EngineError::Validation(_)
                | EngineError::Network(_)
        )
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;
