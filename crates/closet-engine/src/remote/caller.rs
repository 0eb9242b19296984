use std::sync::Arc;
use std::time::Duration;

use super::{
    GeneratedImage, GenerationTransport, RemoteFailure, RemoteRequest, ResponsePart,
    MAX_REFERENCE_IMAGES,
};
use crate::clock::Clock;
use crate::error::GenerationError;

pub const MAX_ATTEMPTS: u32 = 3;
pub const FALLBACK_RETRY_DELAY_MS: u64 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay when a quota error carries no retry hint.
    pub fallback_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            fallback_delay_ms: FALLBACK_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1 for the second attempt):
    /// `base * 2^(retry - 1)`.
    pub fn backoff(&self, retry: u32, hint_ms: Option<u64>) -> Duration {
        let base = hint_ms.unwrap_or(self.fallback_delay_ms);
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(base.saturating_mul(factor))
    }
}

/// Wraps a [`GenerationTransport`] with quota-aware exponential backoff.
///
/// Only [`RemoteFailure::Quota`] is retried; every other failure is returned
/// after the first attempt.
#[derive(Clone)]
pub struct RetryingCaller {
    transport: Arc<dyn GenerationTransport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl RetryingCaller {
    pub fn new(transport: Arc<dyn GenerationTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn call(&self, request: &RemoteRequest) -> Result<GeneratedImage, GenerationError> {
        self.call_observed(request, &mut |_, _| {})
    }

    /// Like [`Self::call`], reporting each scheduled retry (retry number and
    /// delay) before sleeping.
    pub fn call_observed(
        &self,
        request: &RemoteRequest,
        on_retry: &mut dyn FnMut(u32, Duration),
    ) -> Result<GeneratedImage, GenerationError> {
        if request.images.is_empty() || request.images.len() > MAX_REFERENCE_IMAGES {
            return Err(GenerationError::RemoteCallFailed(format!(
                "expected 1-{MAX_REFERENCE_IMAGES} reference images, got {}",
                request.images.len()
            )));
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match self.transport.generate_content(request) {
                Ok(response) => return extract_image(response.parts),
                Err(RemoteFailure::Other { message }) => {
                    return Err(GenerationError::RemoteCallFailed(message));
                }
                Err(RemoteFailure::Quota {
                    message,
                    retry_after_ms,
                }) => {
                    if attempt >= max_attempts {
                        tracing::warn!(
                            model = %request.model,
                            attempts = attempt,
                            "generation quota exhausted",
                        );
                        return Err(GenerationError::QuotaExceeded(message));
                    }
                    let delay = self.policy.backoff(attempt, retry_after_ms);
                    tracing::warn!(
                        model = %request.model,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        hinted = retry_after_ms.is_some(),
                        "generation quota error, backing off",
                    );
                    on_retry(attempt, delay);
                    self.clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

fn extract_image(parts: Vec<ResponsePart>) -> Result<GeneratedImage, GenerationError> {
    let mut texts = Vec::new();
    for part in parts {
        match part {
            ResponsePart::InlineData { mime_type, data } if !data.is_empty() => {
                return Ok(GeneratedImage { mime_type, data });
            }
            ResponsePart::InlineData { .. } => {}
            ResponsePart::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    texts.push(trimmed.to_string());
                }
            }
        }
    }
    let detail = if texts.is_empty() {
        "no image data in response".to_string()
    } else {
        texts.join(" ")
    };
    Err(GenerationError::NoImageReturned { detail })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{RetryPolicy, RetryingCaller};
    use crate::clock::ManualClock;
    use crate::error::GenerationError;
    use crate::remote::{
        GenerationTransport, InlineImage, RemoteFailure, RemoteRequest, RemoteResponse,
        ResponsePart,
    };

    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<RemoteResponse, RemoteFailure>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<RemoteResponse, RemoteFailure>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl GenerationTransport for ScriptedTransport {
        fn generate_content(
            &self,
            _request: &RemoteRequest,
        ) -> Result<RemoteResponse, RemoteFailure> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RemoteFailure::Other {
                    message: "script exhausted".to_string(),
                }))
        }
    }

    fn request() -> RemoteRequest {
        RemoteRequest {
            model: "gemini-test".to_string(),
            prompt: "dress the mannequin".to_string(),
            images: vec![InlineImage::from_bytes("image/png", b"body")],
        }
    }

    fn quota(hint: Option<u64>) -> Result<RemoteResponse, RemoteFailure> {
        Err(RemoteFailure::Quota {
            message: "RESOURCE_EXHAUSTED".to_string(),
            retry_after_ms: hint,
        })
    }

    fn image_reply() -> Result<RemoteResponse, RemoteFailure> {
        Ok(RemoteResponse {
            parts: vec![
                ResponsePart::Text("here you go".to_string()),
                ResponsePart::InlineData {
                    mime_type: "image/png".to_string(),
                    data: "aW1n".to_string(),
                },
            ],
        })
    }

    #[test]
    fn success_returns_first_inline_image() {
        let transport = ScriptedTransport::new(vec![image_reply()]);
        let clock = ManualClock::new(0);
        let caller = RetryingCaller::new(transport.clone(), Arc::new(clock.clone()));

        let image = caller.call(&request()).unwrap();
        assert_eq!(image.data_url(), "data:image/png;base64,aW1n");
        assert_eq!(transport.calls(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn quota_errors_back_off_exponentially_from_fallback() {
        let transport = ScriptedTransport::new(vec![quota(None), quota(None), quota(None)]);
        let clock = ManualClock::new(0);
        let caller = RetryingCaller::new(transport.clone(), Arc::new(clock.clone()));

        let err = caller.call(&request()).unwrap_err();
        assert_eq!(
            err,
            GenerationError::QuotaExceeded("RESOURCE_EXHAUSTED".to_string())
        );
        assert_eq!(transport.calls(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(20_000), Duration::from_millis(40_000)]
        );
    }

    #[test]
    fn retry_hint_sets_the_base_delay() {
        let transport = ScriptedTransport::new(vec![quota(Some(2500)), image_reply()]);
        let clock = ManualClock::new(0);
        let caller = RetryingCaller::new(transport.clone(), Arc::new(clock.clone()));
        let mut observed = Vec::new();

        let image = caller.call_observed(&request(), &mut |retry, delay| {
            observed.push((retry, delay));
        });
        assert!(image.is_ok());
        assert_eq!(observed, vec![(1, Duration::from_millis(2500))]);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(2500)]);
    }

    #[test]
    fn non_quota_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(RemoteFailure::Other {
                message: "invalid argument".to_string(),
            }),
            image_reply(),
        ]);
        let clock = ManualClock::new(0);
        let caller = RetryingCaller::new(transport.clone(), Arc::new(clock.clone()));

        let err = caller.call(&request()).unwrap_err();
        assert_eq!(
            err,
            GenerationError::RemoteCallFailed("invalid argument".to_string())
        );
        assert_eq!(transport.calls(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn text_only_response_reports_remote_text() {
        let transport = ScriptedTransport::new(vec![Ok(RemoteResponse {
            parts: vec![ResponsePart::Text("blocked by safety filter".to_string())],
        })]);
        let caller = RetryingCaller::new(transport, Arc::new(ManualClock::new(0)));

        let err = caller.call(&request()).unwrap_err();
        assert!(err.to_string().contains("blocked by safety filter"));
        assert!(matches!(err, GenerationError::NoImageReturned { .. }));
    }

    #[test]
    fn empty_response_has_generic_detail() {
        let transport = ScriptedTransport::new(vec![Ok(RemoteResponse::default())]);
        let caller = RetryingCaller::new(transport, Arc::new(ManualClock::new(0)));
        assert_eq!(
            caller.call(&request()).unwrap_err(),
            GenerationError::NoImageReturned {
                detail: "no image data in response".to_string()
            }
        );
    }

    #[test]
    fn rejects_bad_reference_counts_without_calling() {
        let transport = ScriptedTransport::new(vec![image_reply()]);
        let caller = RetryingCaller::new(transport.clone(), Arc::new(ManualClock::new(0)));
        let mut too_many = request();
        too_many.images = vec![InlineImage::from_bytes("image/png", b"x"); 4];

        assert!(matches!(
            caller.call(&too_many),
            Err(GenerationError::RemoteCallFailed(_))
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn custom_policy_limits_attempts() {
        let transport = ScriptedTransport::new(vec![quota(Some(10)), quota(Some(10))]);
        let clock = ManualClock::new(0);
        let caller = RetryingCaller::new(transport.clone(), Arc::new(clock.clone())).with_policy(
            RetryPolicy {
                max_attempts: 2,
                fallback_delay_ms: 5,
            },
        );
        assert!(matches!(
            caller.call(&request()),
            Err(GenerationError::QuotaExceeded(_))
        ));
        assert_eq!(transport.calls(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(10)]);
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1, None), Duration::from_millis(20_000));
        assert_eq!(policy.backoff(2, None), Duration::from_millis(40_000));
        assert_eq!(policy.backoff(3, Some(2500)), Duration::from_millis(10_000));
    }
}
