use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{GenerationTransport, RemoteFailure, RemoteRequest, RemoteResponse, ResponsePart};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// `generateContent` client for Gemini image models.
pub struct GeminiTransport {
    api_base: String,
    api_key: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiTransport {
    pub fn new(api_base: Option<&str>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_base: api_base
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: api_key.into(),
            timeout,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl GenerationTransport for GeminiTransport {
    fn generate_content(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteFailure> {
        let endpoint = self.endpoint_for_model(&request.model);
        tracing::debug!(
            endpoint = %endpoint,
            images = request.images.len(),
            "posting generateContent",
        );
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .json(&build_payload(request))
            .send()
            .map_err(|err| RemoteFailure::Other {
                message: format!("Gemini request failed: {err}"),
            })?;

        let code = response.status().as_u16();
        let success = response.status().is_success();
        let body = response.text().map_err(|err| RemoteFailure::Other {
            message: format!("Gemini response body read failed: {err}"),
        })?;
        if !success {
            return Err(decode_error(code, &body));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|err| RemoteFailure::Other {
            message: format!("Gemini returned invalid JSON payload: {err}"),
        })?;
        if parsed.get("error").is_some() {
            return Err(decode_error(code, &body));
        }
        Ok(decode_parts(&parsed))
    }
}

fn build_payload(request: &RemoteRequest) -> Value {
    let mut parts: Vec<Value> = request
        .images
        .iter()
        .map(|image| {
            json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.data,
                }
            })
        })
        .collect();
    parts.push(json!({ "text": request.prompt }));
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"],
        },
    })
}

/// Turns a non-success body into a tagged failure. The HTTP status counts as
/// the code when the body carries none.
fn decode_error(http_code: u16, body: &str) -> RemoteFailure {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let Some(error) = parsed.get("error").and_then(Value::as_object) else {
        let message = format!("Gemini request failed ({http_code}): {}", truncate(body, 512));
        let status = body.contains("RESOURCE_EXHAUSTED").then_some("RESOURCE_EXHAUSTED");
        return RemoteFailure::classify(Some(http_code), status, message, None);
    };

    let code = error
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|value| u16::try_from(value).ok())
        .unwrap_or(http_code);
    let status = error.get("status").and_then(Value::as_str);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Gemini request failed ({code})"));
    let retry_delay = error
        .get("details")
        .and_then(Value::as_array)
        .and_then(|details| {
            details
                .iter()
                .find_map(|detail| detail.get("retryDelay").and_then(Value::as_str))
        });
    let code = if http_code == 429 { 429 } else { code };
    RemoteFailure::classify(Some(code), status, message, retry_delay)
}

fn decode_parts(payload: &Value) -> RemoteResponse {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut parts = Vec::new();
    for candidate in candidates {
        let candidate_parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in candidate_parts {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object);
            if let Some(inline) = inline {
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                parts.push(ResponsePart::InlineData {
                    mime_type: mime_type.to_string(),
                    data: data.to_string(),
                });
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                parts.push(ResponsePart::Text(text.to_string()));
            }
        }
        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            if reason != "STOP" {
                parts.push(ResponsePart::Text(format!("finish reason: {reason}")));
            }
        }
    }
    if let Some(reason) = payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        parts.push(ResponsePart::Text(format!("prompt blocked: {reason}")));
    }
    RemoteResponse { parts }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
