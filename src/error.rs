//! Error types for the agent router

use thiserror::Error;

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Backend Errors
    // =============================

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Retrieval error: {0}")]
    RetrievalError(String),

    #[error("Identity resolution error: {0}")]
    IdentityError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // =============================
    // State & Graph Errors
    // =============================

    #[error("Session store error: {0}")]
    StoreError(String),

    #[error("Unknown patch field(s): {0}")]
    UnknownField(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// In-band text that replaces a failed generation
    pub fn user_apology(&self) -> String {
        format!(
            "I'm sorry, an error occurred while generating the response: {}",
            self
        )
    }
}
