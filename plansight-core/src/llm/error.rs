//! Error types for Stage-2 validation.

/// Errors talking to or interpreting the vision model.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    /// No API credential was configured.
    #[error("OPENROUTER_API_KEY is not set")]
    MissingApiKey,

    /// The HTTP request itself failed (connect, TLS, ...).
    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The request did not complete within the per-batch deadline.
    #[error("LLM request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The provider answered with a non-success status.
    #[error("LLM provider returned HTTP {0}: {1}")]
    Status(u16, String),

    /// The response body was not the expected completion payload.
    #[error("unexpected LLM response payload: {0}")]
    BadPayload(String),

    /// The response exceeded the hard size cap; a runaway generation.
    #[error("LLM response of {got} bytes exceeds the {max} byte cap")]
    ResponseTooLarge {
        /// Observed body size.
        got: usize,
        /// Configured cap.
        max: usize,
    },
}

impl LlmError {
    /// True for failures worth a single retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Request(_) => true,
            Self::Status(code, _) => *code >= 500,
            _ => false,
        }
    }
}
