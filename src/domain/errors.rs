// ============================================================
// Layer 3 — Pipeline Error Taxonomy
// ============================================================
// Every failure the data and loss pipeline can report.
//
// All of these are fatal for the unit of work that raised them
// (a corpus file, a shard, a batch). Nothing here is retried:
// preprocessing and training are offline batch jobs, so errors
// are surfaced to the caller immediately.
//
// The application layer wraps these in anyhow::Error and adds
// file-path context; the library layers return them directly.

use thiserror::Error;

/// Convenience alias used by every library-level module.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A token on a corpus line carries a different number of
    /// features than the first token (or the first line) did.
    #[error("inconsistent feature count: expected {expected}, found {found} in token '{token}'")]
    InconsistentFeatureCount {
        expected: usize,
        found:    usize,
        token:    String,
    },

    /// Two corpora that must be read in parallel disagree on length.
    #[error("corpus length mismatch ({context}): '{side}' ran out after {lines} lines")]
    CorpusLengthMismatch {
        side:    String,
        lines:   usize,
        context: String,
    },

    /// A field was asked to do something its configuration cannot support.
    #[error("invalid configuration for field '{field}': {reason}")]
    InvalidFieldConfiguration { field: String, reason: String },

    /// Generator or loss inputs disagree on their shared dimensions.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A `tgt1` token could not be read as a planning integer.
    #[error("line {line}: planning token '{token}' is not an integer")]
    InvalidPlanningToken { line: usize, token: String },

    /// A pointer-file entry is not a comma-separated integer group.
    #[error("pointer line {line}: cannot parse '{entry}'")]
    PointerParse { line: usize, entry: String },

    /// A pointer group addresses a source position outside the batch.
    #[error("pointer references source position {position} but source length is {src_len}")]
    PointerOutOfRange { position: i64, src_len: usize },

    /// A value does not parse under the field's declared numeric type.
    #[error("field '{field}': cannot coerce '{value}' to {dtype}")]
    NumericCoercion {
        field: String,
        value: String,
        dtype: String,
    },

    /// Reading values back out of a tensor failed.
    #[error("tensor data: {0}")]
    TensorData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn field_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFieldConfiguration {
            field:  field.into(),
            reason: reason.into(),
        }
    }
}
