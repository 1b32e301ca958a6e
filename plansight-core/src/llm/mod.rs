//! Stage 2: vision-model validation of surviving candidates.
//!
//! Candidate crops are batched into multi-image prompts together with
//! pre-recorded few-shot exemplars; the model's JSON output is parsed,
//! guarded against hallucination, fuzzy-matched against the project sheet
//! list and turned into [`crate::markers::Marker`]s.

mod client;
mod error;
mod parse;
mod prompt;
mod validator;

pub use client::{DEFAULT_MODEL, OpenRouterClient};
pub use error::LlmError;
pub use prompt::{ExemplarSet, build_prompt};
pub use validator::{CandidateCrop, MarkerValidator, ValidationOutcome, ValidatorOptions};

/// Transport to a vision-capable model.
///
/// Implementations receive the full prompt text plus exemplar and candidate
/// images and return the raw completion text; interpretation and all
/// guards live in [`MarkerValidator`]. Must be safe for concurrent use.
#[async_trait::async_trait]
pub trait ValidatorClient: Send + Sync {
    /// Sends one batch and returns the model's raw completion text.
    async fn validate_batch(
        &self,
        prompt: &str,
        exemplars: &[&[u8]],
        crops: &[Vec<u8>],
    ) -> Result<String, LlmError>;
}
