//! The six-stage enhancement pipeline.
//!
//! Each stage is a stateless function over plain data. Model-backed stages
//! return `StageOutput` so the orchestrator can sequence degraded fallbacks
//! without treating them as errors; only `StageFatal` halts a job.

pub mod classifier;
pub mod detector;
pub mod knowledge;
pub mod orchestrator;
pub mod planner;
pub mod scorer;
pub mod strategy;

use crate::services::llm::{LanguageModel, LlmError};
use crate::services::storage::StorageError;

/// A stage result: the produced artifact plus whether the stage had to
/// fall back to a default/heuristic output.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput<T> {
    pub value: T,
    pub degraded: bool,
}

impl<T> StageOutput<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    pub fn degraded(value: T) -> Self {
        Self {
            value,
            degraded: true,
        }
    }
}

/// Unrecoverable pipeline errors. Anything here fails the whole job;
/// schema/parse trouble never reaches this type.
#[derive(Debug, thiserror::Error)]
pub enum StageFatal {
    #[error("model service unreachable: {0}")]
    Model(#[from] LlmError),

    #[error("stored image unreadable: {0}")]
    Storage(#[from] StorageError),

    #[error("job store failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error("result serialization failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("pipeline shutting down")]
    Shutdown,
}

/// One transport retry before a model call failure escalates.
pub(crate) async fn vision_call(
    llm: &dyn LanguageModel,
    system_prompt: &str,
    prompt: &str,
    image_base64: &str,
) -> Result<String, LlmError> {
    match llm.complete_with_image(system_prompt, prompt, image_base64).await {
        Ok(reply) => Ok(reply),
        Err(e) => {
            tracing::warn!(error = %e, "vision call failed, retrying once");
            llm.complete_with_image(system_prompt, prompt, image_base64).await
        }
    }
}

/// One transport retry for text-only completions.
pub(crate) async fn text_call(
    llm: &dyn LanguageModel,
    system_prompt: &str,
    prompt: &str,
) -> Result<String, LlmError> {
    match llm.complete(system_prompt, prompt).await {
        Ok(reply) => Ok(reply),
        Err(e) => {
            tracing::warn!(error = %e, "model call failed, retrying once");
            llm.complete(system_prompt, prompt).await
        }
    }
}
