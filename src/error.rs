//! Crate-wide error taxonomy.
//!
//! Mirrors the error *kinds* from the design's error-handling policy rather
//! than one type per call site: input-malformed records are isolated and
//! logged, not propagated; data-incomplete resolutions downgrade a single
//! verdict to `UNABLE`; invariant violations are fatal for the current
//! operation and always name the invariant they broke.

use thiserror::Error;

/// Crate-wide result alias.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error taxonomy, grouped by kind rather than by subsystem.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A single record (IFC entity, rule, dataset row) could not be parsed.
    /// Policy: isolate the bad record, emit a diagnostic, continue with the rest.
    #[error("malformed input at {locus}: {reason}")]
    InputMalformed { locus: String, reason: String },

    /// An invariant named in the data model was violated.
    #[error("invariant {invariant} violated: {detail}")]
    InvariantViolation { invariant: &'static str, detail: String },

    /// A write could not complete without corrupting persisted state on disk.
    #[error("resource exhausted during {operation}: {reason}")]
    ResourceExhausted { operation: String, reason: String },

    /// The caller's cancellation signal fired or the deadline passed.
    #[error("operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// A requested id does not exist.
    #[error("not found: {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },

    /// Filesystem I/O failure underneath any of the stores.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failure for a persisted record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// bincode (de)serialization failure for a checkpoint or sample blob.
    #[error("binary encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        CoreError::Io { path: path.into(), source }
    }

    pub fn input_malformed(locus: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InputMalformed { locus: locus.into(), reason: reason.into() }
    }

    pub fn invariant(invariant: &'static str, detail: impl Into<String>) -> Self {
        CoreError::InvariantViolation { invariant, detail: detail.into() }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound { kind, id: id.into() }
    }
}

/// A non-fatal diagnostic collected while processing a batch of records
/// (IFC entities, rules, dataset rows). Distinct from `CoreError`: producing
/// one of these never aborts the surrounding operation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub locus: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(locus: impl Into<String>, message: impl Into<String>) -> Self {
        Diagnostic { locus: locus.into(), message: message.into() }
    }
}
