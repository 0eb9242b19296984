use crate::limiter::DenyReason;

/// Everything a generation request can fail with.
///
/// None of these escape the orchestrator as a panic or an `Err`: they are
/// turned into [`crate::GenerationOutcome::Failed`] and the orchestrator's
/// visible `last_error`. `PersistenceFailed` never reaches the caller; it is
/// logged and the transient image is returned instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("image generation is not configured: {0}")]
    Configuration(String),

    #[error("rate limited ({reason}); try again in {wait_ms} ms")]
    RateLimited { reason: DenyReason, wait_ms: u64 },

    #[error("generation quota exceeded after retries: {0}")]
    QuotaExceeded(String),

    #[error("generation request failed: {0}")]
    RemoteCallFailed(String),

    #[error("no image returned: {detail}")]
    NoImageReturned { detail: String },

    #[error("could not persist generated image: {0}")]
    PersistenceFailed(String),

    #[error("generation failed ({remote}) and local composite failed ({fallback})")]
    CompositeFallbackFailed { remote: String, fallback: String },

    #[error("reference image unavailable: {0}")]
    ReferenceImage(String),
}

impl GenerationError {
    /// Stable identifier used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Configuration(_) => "configuration",
            GenerationError::RateLimited { .. } => "rate_limited",
            GenerationError::QuotaExceeded(_) => "quota_exceeded",
            GenerationError::RemoteCallFailed(_) => "remote_call_failed",
            GenerationError::NoImageReturned { .. } => "no_image_returned",
            GenerationError::PersistenceFailed(_) => "persistence_failed",
            GenerationError::CompositeFallbackFailed { .. } => "composite_fallback_failed",
            GenerationError::ReferenceImage(_) => "reference_image",
        }
    }
}
