use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a lead was skipped rather than scored or errored (§7).
///
/// Written verbatim into the tenant store's `Posts Skip Reason` field, so
/// the wire string (`as_str`) is the contract, not the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NoContent,
    NoPostsParsed,
    InvalidAiResponse,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NoContent => "NO_CONTENT",
            SkipReason::NoPostsParsed => "NO_POSTS_PARSED",
            SkipReason::InvalidAiResponse => "INVALID_AI_RESPONSE",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed classification for a lead-level processing failure (§4.8).
///
/// The Model Client and Lead Processor map raw provider/parse failures into
/// one of these before they ever reach a [`crate::ChunkResult`], so
/// `error_reason_counts` keys are always one of this fixed set plus
/// `"CANCELLED"` (added by the Chunk Runner on cooperative cancellation,
/// §5 — not a classification the model or parser can produce themselves).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    SafetyBlock,
    Quota,
    Timeout,
    Auth,
    AiResponseFormat,
    ModelConfig,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::SafetyBlock => "SAFETY_BLOCK",
            ErrorCategory::Quota => "QUOTA",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::AiResponseFormat => "AI_RESPONSE_FORMAT",
            ErrorCategory::ModelConfig => "MODEL_CONFIG",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_reason_wire_strings_are_stable() {
        assert_eq!(SkipReason::NoContent.as_str(), "NO_CONTENT");
        assert_eq!(SkipReason::NoPostsParsed.as_str(), "NO_POSTS_PARSED");
        assert_eq!(SkipReason::InvalidAiResponse.as_str(), "INVALID_AI_RESPONSE");
    }

    #[test]
    fn error_category_wire_strings_are_stable() {
        assert_eq!(ErrorCategory::SafetyBlock.as_str(), "SAFETY_BLOCK");
        assert_eq!(ErrorCategory::AiResponseFormat.as_str(), "AI_RESPONSE_FORMAT");
        assert_eq!(ErrorCategory::ModelConfig.as_str(), "MODEL_CONFIG");
    }
}
