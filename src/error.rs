//! Error types for the masking engine.
//!
//! Most failures inside the engine are fail-soft and only logged. These
//! variants cover the operations that report failure back to the caller.

use thiserror::Error;

/// Errors surfaced by the masking engine
#[derive(Debug, Error)]
pub enum MaskingError {
    /// Reading or writing the mapping file failed
    #[error("mapping store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Mapping data could not be encoded or decoded
    #[error("mapping serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Custom replacement rejected because original or replacement is empty
    #[error("custom replacement requires a non-empty original and replacement")]
    InvalidReplacement,

    /// Replacement token already stands for a different original
    #[error("replacement '{replacement}' is already assigned to another value")]
    ReplacementInUse { replacement: String },

    /// A detection pattern failed to compile
    #[error("invalid pattern for {entity_type}: {source}")]
    InvalidPattern {
        entity_type: String,
        #[source]
        source: regex::Error,
    },

    /// External entity detector failed
    #[error("entity detector failed: {0}")]
    Detector(String),

    /// Strategy name not recognised
    #[error("unknown masking strategy: {0}")]
    UnknownStrategy(String),
}
