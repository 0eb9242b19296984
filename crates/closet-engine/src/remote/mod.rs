//! The remote "generate image from reference images + prompt" boundary.
//!
//! Transports decode whatever the provider sends back into [`RemoteResponse`]
//! or a tagged [`RemoteFailure`]; nothing past this module inspects raw error
//! payloads.

mod caller;
mod gemini;

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub use caller::{RetryPolicy, RetryingCaller, FALLBACK_RETRY_DELAY_MS, MAX_ATTEMPTS};
pub use gemini::{GeminiTransport, DEFAULT_API_BASE};

pub const MAX_REFERENCE_IMAGES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload, no `data:` prefix.
    pub data: String,
}

impl InlineImage {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: BASE64.encode(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub model: String,
    pub prompt: String,
    pub images: Vec<InlineImage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    InlineData { mime_type: String, data: String },
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteResponse {
    pub parts: Vec<ResponsePart>,
}

/// Remote failure, classified where the provider response is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    /// Rate limit / quota exhaustion; the only retryable failure.
    Quota {
        message: String,
        retry_after_ms: Option<u64>,
    },
    Other {
        message: String,
    },
}

impl RemoteFailure {
    /// Quota when the numeric code is 429 or the status or message carries
    /// `RESOURCE_EXHAUSTED`; anything else is terminal.
    pub fn classify(
        code: Option<u16>,
        status: Option<&str>,
        message: impl Into<String>,
        retry_delay: Option<&str>,
    ) -> Self {
        let message = message.into();
        let exhausted = status
            .into_iter()
            .chain(std::iter::once(message.as_str()))
            .any(|value| value.to_ascii_uppercase().contains("RESOURCE_EXHAUSTED"));
        if code == Some(429) || exhausted {
            return RemoteFailure::Quota {
                message,
                retry_after_ms: retry_delay.and_then(parse_retry_delay),
            };
        }
        RemoteFailure::Other { message }
    }

    pub fn message(&self) -> &str {
        match self {
            RemoteFailure::Quota { message, .. } | RemoteFailure::Other { message } => message,
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, RemoteFailure::Quota { .. })
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

pub trait GenerationTransport: Send + Sync {
    fn generate_content(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteFailure>;
}

/// Decoded generation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: String,
}

impl GeneratedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.data.as_bytes())
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// Parses a retry hint like `"2.5s"` or `"20s"` into milliseconds.
pub fn parse_retry_delay(raw: &str) -> Option<u64> {
    let seconds = raw.trim().strip_suffix('s')?;
    let (whole, fraction) = match seconds.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (seconds, ""),
    };
    if whole.is_empty() || !whole.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    if !fraction.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let whole_ms = whole.parse::<u64>().ok()?.checked_mul(1000)?;
    let mut fraction_ms = 0u64;
    for (idx, digit) in fraction.chars().take(3).enumerate() {
        let value = u64::from(digit.to_digit(10)?);
        fraction_ms += value * 10u64.pow(2 - idx as u32);
    }
    whole_ms.checked_add(fraction_ms)
}

#[cfg(test)]
mod tests {
    use super::{extension_for_mime, parse_retry_delay, GeneratedImage, RemoteFailure};

    #[test]
    fn retry_delay_parses_seconds_with_fraction() {
        assert_eq!(parse_retry_delay("2.5s"), Some(2500));
        assert_eq!(parse_retry_delay("20s"), Some(20_000));
        assert_eq!(parse_retry_delay("0.125s"), Some(125));
        assert_eq!(parse_retry_delay("1.23456s"), Some(1234));
        assert_eq!(parse_retry_delay(" 3s "), Some(3000));
    }

    #[test]
    fn retry_delay_rejects_malformed_hints() {
        for raw in ["", "s", "2.5", "2.5ms", "-1s", "1e3s", ".5s", "abc"] {
            assert_eq!(parse_retry_delay(raw), None, "{raw}");
        }
    }

    #[test]
    fn classify_quota_by_code_status_or_message() {
        let by_code = RemoteFailure::classify(Some(429), None, "slow down", Some("2.5s"));
        assert_eq!(
            by_code,
            RemoteFailure::Quota {
                message: "slow down".to_string(),
                retry_after_ms: Some(2500),
            }
        );

        let by_status =
            RemoteFailure::classify(Some(400), Some("RESOURCE_EXHAUSTED"), "quota", None);
        assert!(by_status.is_quota());

        let by_message =
            RemoteFailure::classify(Some(400), None, "RESOURCE_EXHAUSTED: quota", Some("4s"));
        assert_eq!(
            by_message,
            RemoteFailure::Quota {
                message: "RESOURCE_EXHAUSTED: quota".to_string(),
                retry_after_ms: Some(4000),
            }
        );

        let other = RemoteFailure::classify(Some(500), Some("INTERNAL"), "boom", Some("1s"));
        assert_eq!(
            other,
            RemoteFailure::Other {
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn generated_image_renders_data_url() {
        let image = GeneratedImage {
            mime_type: "image/png".to_string(),
            data: "aGVsbG8=".to_string(),
        };
        assert_eq!(image.data_url(), "data:image/png;base64,aGVsbG8=");
        assert_eq!(image.decode_bytes().ok(), Some(b"hello".to_vec()));
        assert_eq!(extension_for_mime("image/JPEG"), "jpg");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }
}
