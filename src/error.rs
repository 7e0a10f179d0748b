use std::path::PathBuf;

use thiserror::Error;

/// Failures that can end a single decision, episode or quiz item.
///
/// None of these abort a batch: the driver logs them and moves on to the
/// next unit of work.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The decision maker kept failing until the retry ceiling was reached.
    #[error("decision maker failed after {attempts} attempts: {last}")]
    TransportFailure { attempts: u32, last: String },

    /// Model output could not be turned into a valid choice.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A corpus document or quiz item is missing data or is inconsistent.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("no corpus files found in {}", .0.display())]
    EmptyCorpus(PathBuf),

    #[error("failed to read corpus: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid corpus JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    pub fn malformed_response(reason: impl Into<String>) -> Self {
        Self::MalformedResponse(reason.into())
    }

    pub fn malformed_document(reason: impl Into<String>) -> Self {
        Self::MalformedDocument(reason.into())
    }
}
