use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use postscore_types::{AiScore, ErrorCategory, Post};

const DEFAULT_MODEL_TIMEOUT_MS: u64 = 120_000;
const MIN_MODEL_TIMEOUT_MS: u64 = 30_000;
const MAX_OUTPUT_TOKENS: u64 = 16_384;
const ERROR_SNIPPET_LEN: usize = 500;

/// Configuration for one invocation of the generative model (§4.6).
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl ModelConfig {
    /// Clamps the configured timeout to the §5 floor of 30 s.
    pub fn clamped_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(MIN_MODEL_TIMEOUT_MS))
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            model: "gemini-1.5-flash".to_string(),
            timeout_ms: DEFAULT_MODEL_TIMEOUT_MS,
        }
    }
}

/// One invocation's request: a fixed system prompt plus the posts to score
/// for a single lead.
#[derive(Debug, Clone)]
pub struct ScoreRequest {
    pub system_prompt: String,
    pub lead_id: String,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ModelCallOutcome {
    pub results: Vec<AiScore>,
    pub token_usage: TokenUsage,
}

/// A single safety rating entry as reported by the provider, attached to
/// errors for diagnostics (§4.6 step 7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyRating {
    pub category: String,
    pub probability: String,
}

/// Closed failure taxonomy for a model invocation. Every variant maps to
/// exactly one [`ErrorCategory`], which is how Testable Property 8 ("every
/// caught AI exception yields exactly one category") holds structurally.
#[derive(Debug, Clone)]
pub enum ModelError {
    Timeout {
        elapsed_ms: u64,
    },
    SafetyBlocked {
        block_reason: Option<String>,
    },
    EmptyCandidates,
    Auth {
        message: String,
    },
    Quota {
        message: String,
    },
    Config {
        message: String,
    },
    Http {
        status: Option<u16>,
        message: String,
    },
    ResponseFormat {
        message: String,
        finish_reason: Option<String>,
        safety_ratings: Vec<SafetyRating>,
        raw_snippet: String,
    },
}

impl ModelError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ModelError::Timeout { .. } => ErrorCategory::Timeout,
            ModelError::SafetyBlocked { .. } => ErrorCategory::SafetyBlock,
            ModelError::EmptyCandidates => ErrorCategory::AiResponseFormat,
            ModelError::Auth { .. } => ErrorCategory::Auth,
            ModelError::Quota { .. } => ErrorCategory::Quota,
            ModelError::Config { .. } => ErrorCategory::ModelConfig,
            ModelError::Http { .. } => ErrorCategory::Unknown,
            ModelError::ResponseFormat { .. } => ErrorCategory::AiResponseFormat,
        }
    }

    /// Attaches `finishReason`, `safetyRatings` and a capped raw-response
    /// snippet to a parse failure, per §4.6 step 7.
    pub fn response_format(message: impl Into<String>, raw: &serde_json::Value) -> Self {
        let finish_reason = raw
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("finishReason"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let safety_ratings = raw
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("safetyRatings"))
            .and_then(|v| v.as_array())
            .map(|ratings| {
                ratings
                    .iter()
                    .filter_map(|r| serde_json::from_value::<SafetyRating>(r.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        let raw_snippet = truncate(&raw.to_string(), ERROR_SNIPPET_LEN);
        ModelError::ResponseFormat {
            message: message.into(),
            finish_reason,
            safety_ratings,
            raw_snippet,
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Timeout { elapsed_ms } => {
                write!(f, "model invocation timed out after {elapsed_ms}ms")
            }
            ModelError::SafetyBlocked { block_reason } => write!(
                f,
                "prompt blocked by safety policy ({})",
                block_reason.as_deref().unwrap_or("unspecified")
            ),
            ModelError::EmptyCandidates => write!(f, "model returned no candidates"),
            ModelError::Auth { message } => write!(f, "authentication failed: {message}"),
            ModelError::Quota { message } => write!(f, "quota exceeded: {message}"),
            ModelError::Config { message } => write!(f, "model misconfigured: {message}"),
            ModelError::Http { status, message } => {
                write!(f, "model request failed ({status:?}): {message}")
            }
            ModelError::ResponseFormat {
                message,
                finish_reason,
                raw_snippet,
                ..
            } => write!(
                f,
                "{message} (finishReason={:?}, response={raw_snippet})",
                finish_reason
            ),
        }
    }
}

impl std::error::Error for ModelError {}

fn truncate(input: &str, max_len: usize) -> String {
    if input.chars().count() <= max_len {
        input.to_string()
    } else {
        let head: String = input.chars().take(max_len).collect();
        format!("{head}...")
    }
}

/// The Model Client's contract (§4.6): invoke the generative model with a
/// system prompt and the lead's posts, enforce a timeout, normalise the
/// response into one [`AiScore`] per post.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn score_posts(&self, request: ScoreRequest) -> Result<ModelCallOutcome, ModelError>;
}

/// Invokes a Gemini-API-shaped `generateContent` endpoint: safety settings
/// all `BLOCK_NONE`, temperature 0, JSON response MIME type.
pub struct GenerativeModelClient {
    config: ModelConfig,
    client: Client,
}

impl GenerativeModelClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            self.config.api_key
        )
    }

    fn request_body(&self, request: &ScoreRequest) -> serde_json::Value {
        let user_message = build_user_message(&request.lead_id, &request.posts);
        json!({
            "systemInstruction": {
                "parts": [{"text": request.system_prompt}]
            },
            "contents": [{
                "role": "user",
                "parts": [{"text": user_message}]
            }],
            "generationConfig": {
                "temperature": 0,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
                "responseMimeType": "application/json"
            },
            "safetySettings": [
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE"},
            ]
        })
    }

    async fn call(&self, request: &ScoreRequest) -> Result<ModelCallOutcome, ModelError> {
        let body = self.request_body(request);
        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Http {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        let value: serde_json::Value = response.json().await.map_err(|e| ModelError::Http {
            status: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ModelError::Auth {
                message: extract_error_message(&value)
                    .unwrap_or_else(|| format!("status {status}")),
            });
        }
        if status.as_u16() == 429 {
            return Err(ModelError::Quota {
                message: extract_error_message(&value)
                    .unwrap_or_else(|| format!("status {status}")),
            });
        }
        if status.as_u16() == 404 || is_model_invalid_message(&value) {
            return Err(ModelError::Config {
                message: extract_error_message(&value)
                    .unwrap_or_else(|| format!("status {status}")),
            });
        }
        if !status.is_success() {
            return Err(ModelError::Http {
                status: Some(status.as_u16()),
                message: extract_error_message(&value)
                    .unwrap_or_else(|| format!("status {status}")),
            });
        }

        let candidates = value.get("candidates").and_then(|c| c.as_array());
        let candidates = match candidates {
            Some(c) if !c.is_empty() => c,
            _ => {
                if let Some(block_reason) = value
                    .get("promptFeedback")
                    .and_then(|f| f.get("blockReason"))
                    .and_then(|v| v.as_str())
                {
                    return Err(ModelError::SafetyBlocked {
                        block_reason: Some(block_reason.to_string()),
                    });
                }
                return Err(ModelError::EmptyCandidates);
            }
        };

        let text = extract_candidate_text(&candidates[0]);
        let stripped = strip_code_fences(&text);

        let scores: Vec<AiScore> = match parse_ai_scores(&stripped) {
            Some(scores) => scores,
            None => match unwrap_wrapper_object(&stripped).and_then(|v| serde_json::from_value(v).ok()) {
                Some(scores) => scores,
                None => {
                    return Err(ModelError::response_format(
                        "response text was not a parseable JSON array of scores",
                        &value,
                    ))
                }
            },
        };

        let token_usage = extract_usage(&value);

        Ok(ModelCallOutcome {
            results: scores,
            token_usage,
        })
    }
}

#[async_trait]
impl ModelProvider for GenerativeModelClient {
    async fn score_posts(&self, request: ScoreRequest) -> Result<ModelCallOutcome, ModelError> {
        let timeout = self.config.clamped_timeout();
        match tokio::time::timeout(timeout, self.call(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout {
                elapsed_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

fn build_user_message(lead_id: &str, posts: &[Post]) -> String {
    let posts_json = serde_json::to_string(posts).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Score every post below for lead `{lead_id}`. Return ONLY a JSON array, one object per \
         input post, each shaped exactly as {{\"postUrl\": string, \"postScore\": integer, \
         \"scoringRationale\": string}}. Do not include any text outside the JSON array.\n\n\
         Posts:\n{posts_json}"
    )
}

/// Parses the model's own response text as a bare JSON array of
/// `{postUrl, postScore, scoringRationale}` objects. This is a narrower
/// cascade than the full payload-repair pipeline applied to a lead's source
/// posts: the model's output is already constrained by `responseMimeType`,
/// so only a strict-then-lenient pair is needed before falling back to the
/// wrapper-object unwrap.
fn parse_ai_scores(text: &str) -> Option<Vec<AiScore>> {
    serde_json::from_str::<Vec<AiScore>>(text)
        .ok()
        .or_else(|| json5::from_str::<Vec<AiScore>>(text).ok())
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let without_leading = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_leading
        .strip_suffix("```")
        .unwrap_or(without_leading)
        .trim()
        .to_string()
}

/// Unwraps `{post_analysis: [...]}` / `{posts: [...]}` wrapper shapes into
/// the bare array (§4.6 step 5).
fn unwrap_wrapper_object(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text).or_else(|_| json5::from_str(text)).ok()?;
    let obj = value.as_object()?;
    obj.get("post_analysis")
        .or_else(|| obj.get("posts"))
        .filter(|v| v.is_array())
        .cloned()
}

fn extract_candidate_text(candidate: &Value) -> String {
    candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn extract_usage(value: &Value) -> TokenUsage {
    let usage = value.get("usageMetadata");
    TokenUsage {
        prompt_tokens: usage
            .and_then(|u| u.get("promptTokenCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        completion_tokens: usage
            .and_then(|u| u.get("candidatesTokenCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        total_tokens: usage
            .and_then(|u| u.get("totalTokenCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    }
}

fn extract_error_message(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Detects a "model not found"/"model is not valid" error body regardless
/// of HTTP status, so a misconfigured model name maps to
/// [`ModelError::Config`] even when the provider answers with a generic
/// status code instead of 404 (§4.8: "'not found' or model-invalid ->
/// MODEL_CONFIG").
fn is_model_invalid_message(value: &Value) -> bool {
    let Some(message) = extract_error_message(value) else {
        return false;
    };
    let lower = message.to_ascii_lowercase();
    (lower.contains("model") && lower.contains("not found"))
        || lower.contains("is not found")
        || lower.contains("not a valid model")
        || lower.contains("invalid model")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fences_removes_json_fence() {
        let raw = "```json\n[{\"postUrl\":\"x\"}]\n```";
        assert_eq!(strip_code_fences(raw), "[{\"postUrl\":\"x\"}]");
    }

    #[test]
    fn strip_code_fences_removes_bare_fence() {
        let raw = "```\n[]\n```";
        assert_eq!(strip_code_fences(raw), "[]");
    }

    #[test]
    fn strip_code_fences_passes_unfenced_text() {
        assert_eq!(strip_code_fences("[]"), "[]");
    }

    #[test]
    fn unwrap_wrapper_object_finds_post_analysis() {
        let raw = r#"{"post_analysis": [{"postUrl":"x","postScore":1,"scoringRationale":"r"}]}"#;
        let unwrapped = unwrap_wrapper_object(raw).expect("unwrapped array");
        assert!(unwrapped.is_array());
    }

    #[test]
    fn unwrap_wrapper_object_finds_posts_key() {
        let raw = r#"{"posts": []}"#;
        let unwrapped = unwrap_wrapper_object(raw).expect("unwrapped array");
        assert_eq!(unwrapped.as_array().unwrap().len(), 0);
    }

    #[test]
    fn is_model_invalid_message_matches_model_not_found() {
        let body = json!({"error": {"message": "models/bogus-model is not found for API version v1"}});
        assert!(is_model_invalid_message(&body));
    }

    #[test]
    fn is_model_invalid_message_ignores_unrelated_errors() {
        let body = json!({"error": {"message": "internal server error"}});
        assert!(!is_model_invalid_message(&body));
    }

    #[test]
    fn clamped_timeout_enforces_thirty_second_floor() {
        let config = ModelConfig {
            timeout_ms: 5_000,
            ..ModelConfig::default()
        };
        assert_eq!(config.clamped_timeout(), Duration::from_millis(MIN_MODEL_TIMEOUT_MS));
    }

    #[test]
    fn error_categories_are_stable_per_variant() {
        assert_eq!(ModelError::EmptyCandidates.category(), ErrorCategory::AiResponseFormat);
        assert_eq!(
            ModelError::SafetyBlocked { block_reason: None }.category(),
            ErrorCategory::SafetyBlock
        );
        assert_eq!(
            ModelError::Timeout { elapsed_ms: 1000 }.category(),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn response_format_error_captures_finish_reason_and_snippet() {
        let raw = json!({
            "candidates": [{
                "finishReason": "MAX_TOKENS",
                "safetyRatings": [{"category": "HARM_CATEGORY_HARASSMENT", "probability": "LOW"}]
            }]
        });
        let err = ModelError::response_format("bad shape", &raw);
        match err {
            ModelError::ResponseFormat {
                finish_reason,
                safety_ratings,
                ..
            } => {
                assert_eq!(finish_reason.as_deref(), Some("MAX_TOKENS"));
                assert_eq!(safety_ratings.len(), 1);
            }
            _ => panic!("expected ResponseFormat variant"),
        }
    }
}
