use thiserror::Error;

/// Failure taxonomy of the label engine. None of these reach the caller of
/// [`crate::pipeline::LabelPipeline::label`]; they are absorbed into the fallback result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LabelError {
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("mixture solver failed: {0}")]
    SolverFailure(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal fault: {0}")]
    Internal(String),
}

impl LabelError {
    pub fn retrieval(err: impl std::fmt::Display) -> Self {
        LabelError::RetrievalUnavailable(err.to_string())
    }
}
