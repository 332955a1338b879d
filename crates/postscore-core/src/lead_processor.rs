//! Lead Processor (§4.8): scores one lead's posts and writes the result
//! back to the tenant store. The single largest piece of the batch
//! pipeline; every step below corresponds to one numbered step in §4.8.

use chrono::Utc;
use serde_json::{json, Map, Value};

use postscore_providers::{ModelError, ModelProvider, ScoreRequest};
use postscore_runtime::{TenantStoreAdapter, TenantStoreError};
use postscore_types::{lead_fields, payload_repair, AiScore, EnrichedScore, ErrorCategory, Lead, Post, SkipReason};

const LEADS_TABLE: &str = "Leads";

/// Terminal outcome of processing one lead (§4.8's returned `{status,...}`
/// shapes), consumed by the Chunk Runner to update its counters.
#[derive(Debug, Clone)]
pub enum LeadOutcome {
    Success { tokens: u64 },
    Skipped { reason: SkipReason },
    /// `base_reason` is the §7 error-taxonomy label (`"Unparseable JSON"`,
    /// `"Invalid Posts Content field"`, or `"AI_SCORING_ERROR"`); `message`
    /// is the full diagnostic text for the deduplicated sample.
    Error { base_reason: String, message: String, category: ErrorCategory },
}

enum PayloadOutcome {
    Posts(Vec<Post>),
    ParseError(String),
}

pub struct LeadProcessor<'a, S: TenantStoreAdapter + ?Sized, M: ModelProvider + ?Sized> {
    pub store: &'a S,
    pub model: &'a M,
    pub system_prompt: &'a str,
    /// Whether the tenant's `skipReason` field is known to exist, probed
    /// once by the Client Runner (§4.10 step 3). When `false`, we never
    /// attempt to write it, skipping straight to the tolerant-update path.
    pub skip_reason_field_supported: bool,
}

impl<'a, S: TenantStoreAdapter + ?Sized, M: ModelProvider + ?Sized> LeadProcessor<'a, S, M> {
    pub async fn process(&self, lead: &Lead) -> LeadOutcome {
        match self.process_inner(lead).await {
            Ok(outcome) => outcome,
            Err(e) => LeadOutcome::Error {
                base_reason: "AI_SCORING_ERROR".to_string(),
                message: e.to_string(),
                category: classify_error_message(&e.to_string()),
            },
        }
    }

    async fn process_inner(&self, lead: &Lead) -> anyhow::Result<LeadOutcome> {
        // Step 1: fetch payload.
        let payload = match lead.posts_content() {
            None => return self.skip(lead, SkipReason::NoContent).await,
            Some(Value::String(s)) if s.trim().is_empty() => {
                return self.skip(lead, SkipReason::NoContent).await
            }
            Some(v) => v.clone(),
        };

        // Step 2: repair.
        let posts = match self.repair_payload(lead, &payload).await? {
            PayloadOutcome::Posts(posts) => posts,
            PayloadOutcome::ParseError(message) => {
                return Ok(LeadOutcome::Error {
                    base_reason: "Unparseable JSON".to_string(),
                    message,
                    category: ErrorCategory::AiResponseFormat,
                })
            }
        };
        if posts.is_empty() {
            return self.skip(lead, SkipReason::NoPostsParsed).await;
        }

        // Step 3: score.
        let outcome = self
            .model
            .score_posts(ScoreRequest {
                system_prompt: self.system_prompt.to_string(),
                lead_id: lead.id.clone(),
                posts: posts.clone(),
            })
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => return self.write_model_error(lead, &err).await,
        };

        if outcome.results.is_empty() {
            return self.skip(lead, SkipReason::InvalidAiResponse).await;
        }

        // Step 4-5: merge and repost detection.
        let enriched = merge_and_detect_reposts(lead, &posts, &outcome.results);
        if enriched.is_empty() {
            return self.skip(lead, SkipReason::InvalidAiResponse).await;
        }

        // Step 6: pick winner (first occurrence wins ties).
        let winner = enriched
            .iter()
            .fold(None::<&EnrichedScore>, |best, candidate| match best {
                None => Some(candidate),
                Some(current) if candidate.post_score > current.post_score => Some(candidate),
                Some(current) => Some(current),
            })
            .expect("enriched is non-empty");

        // Step 7: write back.
        self.write_success(lead, &enriched, winner).await?;

        Ok(LeadOutcome::Success {
            tokens: outcome.token_usage.total_tokens,
        })
    }

    async fn repair_payload(&self, lead: &Lead, payload: &Value) -> anyhow::Result<PayloadOutcome> {
        match payload {
            Value::Array(_) => {
                let repaired = payload_repair::repair(payload);
                if !repaired.success {
                    let message = repaired.error.unwrap_or_else(|| "unparseable payload".to_string());
                    self.write_parse_error(lead, &message).await?;
                    return Ok(PayloadOutcome::ParseError(message));
                }
                let mut fields = Map::new();
                fields.insert(lead_fields::JSON_STATUS.to_string(), json!("Parsed"));
                self.tolerant_update(lead, fields).await?;
                Ok(PayloadOutcome::Posts(repaired.data.unwrap_or_default()))
            }
            Value::String(_) => {
                let repaired = payload_repair::repair(payload);
                if !repaired.success {
                    let message = repaired.error.unwrap_or_else(|| "unparseable payload".to_string());
                    self.write_parse_error(lead, &message).await?;
                    return Ok(PayloadOutcome::ParseError(message));
                }
                let mut fields = Map::new();
                fields.insert(lead_fields::JSON_STATUS.to_string(), json!("Parsed"));
                self.tolerant_update(lead, fields).await?;
                Ok(PayloadOutcome::Posts(repaired.data.unwrap_or_default()))
            }
            other => {
                let message = format!("unsupported postsContent type: {other:?}");
                self.write_parse_error(lead, &message).await?;
                Ok(PayloadOutcome::ParseError(message))
            }
        }
    }

    async fn write_parse_error(&self, lead: &Lead, message: &str) -> anyhow::Result<()> {
        let mut fields = Map::new();
        fields.insert(lead_fields::RELEVANCE_SCORE.to_string(), json!(0));
        fields.insert(
            lead_fields::AI_EVALUATION.to_string(),
            json!(format!("JSON_PARSE_ERROR: {message}")),
        );
        fields.insert(lead_fields::DATE_SCORED.to_string(), json!(now()));
        fields.insert(lead_fields::JSON_STATUS.to_string(), json!("Failed"));
        self.tolerant_update(lead, fields).await
    }

    async fn write_model_error(&self, lead: &Lead, err: &ModelError) -> anyhow::Result<LeadOutcome> {
        let message = err.to_string();
        let mut fields = Map::new();
        fields.insert(
            lead_fields::AI_EVALUATION.to_string(),
            json!(format!("AI_SCORING_ERROR: {message}")),
        );
        fields.insert(lead_fields::DATE_SCORED.to_string(), json!(now()));
        self.tolerant_update(lead, fields).await?;
        Ok(LeadOutcome::Error {
            base_reason: "AI_SCORING_ERROR".to_string(),
            message,
            category: err.category(),
        })
    }

    async fn write_success(
        &self,
        lead: &Lead,
        all_scores: &[EnrichedScore],
        winner: &EnrichedScore,
    ) -> anyhow::Result<()> {
        let mut fields = Map::new();
        fields.insert(lead_fields::RELEVANCE_SCORE.to_string(), json!(winner.post_score));
        fields.insert(
            lead_fields::AI_EVALUATION.to_string(),
            json!(serde_json::to_string_pretty(all_scores)?),
        );
        fields.insert(
            lead_fields::TOP_SCORING_POST.to_string(),
            json!(format_top_scoring_post(winner)),
        );
        fields.insert(lead_fields::DATE_SCORED.to_string(), json!(now()));
        if self.skip_reason_field_supported {
            fields.insert(lead_fields::SKIP_REASON.to_string(), json!(""));
        }
        self.tolerant_update(lead, fields).await
    }

    async fn skip(&self, lead: &Lead, reason: SkipReason) -> anyhow::Result<LeadOutcome> {
        let mut fields = Map::new();
        fields.insert(lead_fields::DATE_SCORED.to_string(), json!(now()));
        if self.skip_reason_field_supported {
            fields.insert(lead_fields::SKIP_REASON.to_string(), json!(reason.as_str()));
        }
        self.tolerant_update(lead, fields).await?;
        Ok(LeadOutcome::Skipped { reason })
    }

    /// Step 8: if the store rejects the update because `skipReason` is an
    /// unknown field, retry once without it, preserving every other field.
    async fn tolerant_update(&self, lead: &Lead, fields: Map<String, Value>) -> anyhow::Result<()> {
        match self.store.update(LEADS_TABLE, &lead.id, fields.clone()).await {
            Ok(_) => Ok(()),
            Err(TenantStoreError::UnknownField { field, .. }) if field == lead_fields::SKIP_REASON => {
                let mut retried = fields;
                retried.remove(lead_fields::SKIP_REASON);
                self.store
                    .update(LEADS_TABLE, &lead.id, retried)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
                Ok(())
            }
            Err(other) => Err(anyhow::anyhow!(other)),
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// §4.8 step 4-5: merges each AI result with its source post and computes
/// the repost flag. AI results that cannot be matched to a source post are
/// dropped from the returned set.
fn merge_and_detect_reposts(lead: &Lead, posts: &[Post], scores: &[AiScore]) -> Vec<EnrichedScore> {
    let lead_public_id = lead.linkedin_url().and_then(linkedin_public_id);

    scores
        .iter()
        .filter_map(|score| {
            let source = find_source_post(score, posts)?;
            let author_url = source
                .author_url
                .clone()
                .or_else(|| source.metadata.as_ref().and_then(|m| m.author_url.clone()));
            let author_name = source
                .author
                .clone()
                .or_else(|| source.metadata.as_ref().and_then(|m| m.author_name.clone()));
            let action = source
                .action
                .clone()
                .or_else(|| source.metadata.as_ref().and_then(|m| m.action.clone()));

            let author_public_id = author_url.as_deref().and_then(linkedin_public_id);
            let is_same_author = match (&lead_public_id, &author_public_id) {
                (Some(a), Some(b)) => a == b,
                _ => match (lead.linkedin_url(), author_url.as_deref()) {
                    (Some(a), Some(b)) => deep_normalize_url(a) == deep_normalize_url(b),
                    _ => false,
                },
            };

            let explicitly_repost = action
                .as_deref()
                .map(|a| a.eq_ignore_ascii_case("repost"))
                .unwrap_or(false);

            let is_repost = if explicitly_repost && is_same_author {
                false
            } else if explicitly_repost {
                true
            } else {
                match (&lead_public_id, &author_public_id) {
                    (Some(a), Some(b)) => a != b,
                    _ => match (lead.linkedin_url(), author_url.as_deref()) {
                        (Some(a), Some(b)) => deep_normalize_url(a) != deep_normalize_url(b),
                        _ => false,
                    },
                }
            };

            let author_url = if !is_repost && author_url.is_none() {
                lead.linkedin_url().map(str::to_string)
            } else {
                author_url
            };

            Some(EnrichedScore {
                post_url: score.post_url.clone(),
                post_score: score.post_score,
                scoring_rationale: score.scoring_rationale.clone(),
                post_content: source.post_content.clone(),
                post_date: extract_post_date(source),
                author_url,
                author_name,
                is_repost,
            })
        })
        .collect()
}

fn find_source_post<'a>(score: &AiScore, posts: &'a [Post]) -> Option<&'a Post> {
    let normalized_target = normalize_url(&score.post_url);
    if let Some(found) = posts.iter().find(|p| normalize_url(&p.post_url) == normalized_target) {
        return Some(found);
    }
    let target_activity_id = extract_activity_id(&score.post_url)?;
    posts
        .iter()
        .find(|p| extract_activity_id(&p.post_url).as_deref() == Some(target_activity_id.as_str()))
}

/// Lowercases, strips scheme/`www.`, query/hash, and trailing slashes or
/// underscores (§4.8 step 4).
fn normalize_url(url: &str) -> String {
    let mut s = url.trim().to_ascii_lowercase();
    for prefix in ["https://", "http://"] {
        if let Some(stripped) = s.strip_prefix(prefix) {
            s = stripped.to_string();
            break;
        }
    }
    if let Some(stripped) = s.strip_prefix("www.") {
        s = stripped.to_string();
    }
    if let Some(idx) = s.find(['?', '#']) {
        s.truncate(idx);
    }
    while s.ends_with('/') || s.ends_with('_') {
        s.pop();
    }
    s
}

/// Same as [`normalize_url`], plus drops any `/recent-activity/...` segment
/// (§4.8 step 5: repost detection compares author urls more aggressively
/// than the post-url matching in step 4, since LinkedIn's "recent activity"
/// profile path is a separate URL shape for the same author).
fn deep_normalize_url(url: &str) -> String {
    let s = normalize_url(url);
    match s.find("/recent-activity/") {
        Some(idx) => s[..idx].to_string(),
        None => s,
    }
}

/// Extracts a LinkedIn activity id via `activity[-/:]<digits>` or a bare
/// `-<digits>-` segment (§4.8 step 4 secondary key).
fn extract_activity_id(url: &str) -> Option<String> {
    let lower = url.to_ascii_lowercase();
    if let Some(idx) = lower.find("activity") {
        let rest = &lower[idx + "activity".len()..];
        let rest = rest.strip_prefix(['-', '/', ':']).unwrap_or(rest);
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            return Some(digits);
        }
    }
    let bytes = lower.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'-' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b'-' {
                return Some(lower[i + 1..j].to_string());
            }
        }
        i += 1;
    }
    None
}

/// Matches `linkedin.com/in/<slug>` and returns the slug, used to compare
/// a lead's profile URL against a post's author URL (§4.8 step 5).
fn linkedin_public_id(url: &str) -> Option<String> {
    let lower = url.to_ascii_lowercase();
    let idx = lower.find("linkedin.com/in/")?;
    let rest = &lower[idx + "linkedin.com/in/".len()..];
    let slug: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

/// Best-effort date extraction from the direct field or the nested
/// `postedAt{timestamp|date|ms|value}` shapes a source may carry (§4.8
/// step 4). `postedAt` lives in [`Post::extra`] since it is not a field
/// every source provides.
fn extract_post_date(post: &Post) -> Option<String> {
    if let Some(date) = &post.post_date {
        return Some(date.clone());
    }
    let posted_at = post.extra.get("postedAt")?;
    for key in ["timestamp", "date", "ms", "value"] {
        if let Some(value) = posted_at.get(key) {
            match value {
                Value::String(s) => return Some(s.clone()),
                Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}

/// §4.8 step 7: the multi-line human-readable summary block.
fn format_top_scoring_post(winner: &EnrichedScore) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Date: {}", winner.post_date.as_deref().unwrap_or("unknown")));
    lines.push(format!("URL: {}", winner.post_url));
    lines.push(format!("Score: {}", winner.post_score));
    if winner.is_repost {
        lines.push(format!(
            "REPOST - ORIGINAL AUTHOR: {}",
            winner.author_url.as_deref().unwrap_or("unknown")
        ));
    }
    lines.push(format!("Content: {}", winner.post_content.as_deref().unwrap_or("")));
    lines.push(format!("Rationale: {}", winner.scoring_rationale));
    lines.join("\n")
}

/// Maps a caught error's message to one of the closed categories (§4.8,
/// §7). This is the message-keyword classifier the spec calls for at the
/// Lead Processor boundary, for errors that never passed through
/// [`ModelError::category`] (e.g. a tenant-store write-back failure).
fn classify_error_message(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();
    if lower.contains("safety") {
        ErrorCategory::SafetyBlock
    } else if lower.contains("quota") || lower.contains("rate limit") {
        ErrorCategory::Quota
    } else if lower.contains("timeout") || lower.contains("etimedout") {
        ErrorCategory::Timeout
    } else if lower.contains("auth") || lower.contains("unauthorized") || lower.contains("forbidden") || lower.contains("401") || lower.contains("403") {
        ErrorCategory::Auth
    } else if lower.contains("json") || lower.contains("parse") {
        ErrorCategory::AiResponseFormat
    } else if lower.contains("not found") || lower.contains("model-invalid") || lower.contains("invalid model") {
        ErrorCategory::ModelConfig
    } else {
        ErrorCategory::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postscore_providers::{ModelCallOutcome, ScoreRequest, TokenUsage};
    use postscore_runtime::InMemoryTenantStore;
    use postscore_types::Lead;
    use serde_json::Map;

    struct StubModel {
        response: Result<Vec<AiScore>, ModelError>,
    }

    #[async_trait::async_trait]
    impl ModelProvider for StubModel {
        async fn score_posts(&self, _request: ScoreRequest) -> Result<ModelCallOutcome, ModelError> {
            self.response.clone().map(|results| ModelCallOutcome {
                results,
                token_usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
            })
        }
    }

    fn lead_with_posts(id: &str, posts_json: Value) -> Lead {
        let mut fields = Map::new();
        fields.insert(lead_fields::POSTS_CONTENT.to_string(), posts_json);
        fields.insert(
            lead_fields::LINKEDIN_URL.to_string(),
            json!("https://www.linkedin.com/in/jane-doe/"),
        );
        Lead::new(id, fields)
    }

    #[tokio::test]
    async fn missing_content_skips_with_no_content() {
        let store = InMemoryTenantStore::new();
        let lead = Lead::new("1", Map::new());
        store.seed_lead(LEADS_TABLE, lead.clone()).await;
        let model = StubModel { response: Ok(vec![]) };

        let processor = LeadProcessor {
            store: &store,
            model: &model,
            system_prompt: "score these",
            skip_reason_field_supported: true,
        };
        let outcome = processor.process(&lead).await;
        assert!(matches!(outcome, LeadOutcome::Skipped { reason: SkipReason::NoContent }));

        let updated = store.get(LEADS_TABLE, "1").await.unwrap();
        assert_eq!(updated.get_str(lead_fields::SKIP_REASON), Some("NO_CONTENT"));
    }

    #[tokio::test]
    async fn repost_by_another_author_is_flagged_with_banner() {
        let store = InMemoryTenantStore::new();
        let posts = json!([{
            "postUrl": "https://linkedin.com/posts/foo-activity-7100000000000000000-AAAA/",
            "postContent": "x",
            "authorUrl": "https://linkedin.com/in/other-person/",
            "action": "Repost"
        }]);
        let lead = lead_with_posts("1", posts);
        store.seed_lead(LEADS_TABLE, lead.clone()).await;

        let model = StubModel {
            response: Ok(vec![AiScore {
                post_url: "https://linkedin.com/posts/foo-activity-7100000000000000000-AAAA/".to_string(),
                post_score: 73,
                scoring_rationale: "ok".to_string(),
            }]),
        };

        let processor = LeadProcessor {
            store: &store,
            model: &model,
            system_prompt: "score these",
            skip_reason_field_supported: true,
        };
        let outcome = processor.process(&lead).await;
        assert!(matches!(outcome, LeadOutcome::Success { .. }));

        let updated = store.get(LEADS_TABLE, "1").await.unwrap();
        assert_eq!(updated.get("Posts Relevance Score").unwrap().as_i64(), Some(73));
        let summary = updated.get_str(lead_fields::TOP_SCORING_POST).unwrap();
        assert!(summary.contains("REPOST - ORIGINAL AUTHOR: https://linkedin.com/in/other-person/"));
    }

    #[tokio::test]
    async fn self_repost_is_treated_as_original() {
        let store = InMemoryTenantStore::new();
        let posts = json!([{
            "postUrl": "https://linkedin.com/posts/foo-activity-7100000000000000000-AAAA/",
            "postContent": "x",
            "authorUrl": "https://www.linkedin.com/in/jane-doe/",
            "action": "repost"
        }]);
        let lead = lead_with_posts("1", posts);
        store.seed_lead(LEADS_TABLE, lead.clone()).await;

        let model = StubModel {
            response: Ok(vec![AiScore {
                post_url: "https://linkedin.com/posts/foo-activity-7100000000000000000-AAAA/".to_string(),
                post_score: 50,
                scoring_rationale: "ok".to_string(),
            }]),
        };

        let processor = LeadProcessor {
            store: &store,
            model: &model,
            system_prompt: "score these",
            skip_reason_field_supported: true,
        };
        processor.process(&lead).await;

        let updated = store.get(LEADS_TABLE, "1").await.unwrap();
        let summary = updated.get_str(lead_fields::TOP_SCORING_POST).unwrap();
        assert!(!summary.contains("REPOST - ORIGINAL AUTHOR"));
    }

    #[tokio::test]
    async fn array_payload_sets_parsed_status_on_success() {
        let store = InMemoryTenantStore::new();
        let posts = json!([{
            "postUrl": "https://linkedin.com/posts/foo-activity-7100000000000000000-AAAA/",
            "postContent": "x",
            "authorUrl": "https://www.linkedin.com/in/jane-doe/",
        }]);
        let lead = lead_with_posts("1", posts);
        store.seed_lead(LEADS_TABLE, lead.clone()).await;

        let model = StubModel {
            response: Ok(vec![AiScore {
                post_url: "https://linkedin.com/posts/foo-activity-7100000000000000000-AAAA/".to_string(),
                post_score: 60,
                scoring_rationale: "ok".to_string(),
            }]),
        };

        let processor = LeadProcessor {
            store: &store,
            model: &model,
            system_prompt: "score these",
            skip_reason_field_supported: true,
        };
        let outcome = processor.process(&lead).await;
        assert!(matches!(outcome, LeadOutcome::Success { .. }));

        let updated = store.get(LEADS_TABLE, "1").await.unwrap();
        assert_eq!(updated.get_str(lead_fields::JSON_STATUS), Some("Parsed"));
    }

    #[tokio::test]
    async fn recent_activity_author_url_is_not_flagged_as_repost() {
        let store = InMemoryTenantStore::new();
        let mut fields = Map::new();
        fields.insert(
            lead_fields::POSTS_CONTENT.to_string(),
            json!([{
                "postUrl": "https://linkedin.com/posts/foo-activity-7100000000000000000-AAAA/",
                "postContent": "x",
                "authorUrl": "https://www.linkedin.com/profile/jane-doe/",
            }]),
        );
        fields.insert(
            lead_fields::LINKEDIN_URL.to_string(),
            json!("https://www.linkedin.com/profile/jane-doe/recent-activity/all/"),
        );
        let lead = Lead::new("1", fields);
        store.seed_lead(LEADS_TABLE, lead.clone()).await;

        let model = StubModel {
            response: Ok(vec![AiScore {
                post_url: "https://linkedin.com/posts/foo-activity-7100000000000000000-AAAA/".to_string(),
                post_score: 55,
                scoring_rationale: "ok".to_string(),
            }]),
        };

        let processor = LeadProcessor {
            store: &store,
            model: &model,
            system_prompt: "score these",
            skip_reason_field_supported: true,
        };
        processor.process(&lead).await;

        let updated = store.get(LEADS_TABLE, "1").await.unwrap();
        let summary = updated.get_str(lead_fields::TOP_SCORING_POST).unwrap();
        assert!(!summary.contains("REPOST - ORIGINAL AUTHOR"));
    }

    #[test]
    fn deep_normalize_url_strips_recent_activity_segment() {
        assert_eq!(
            deep_normalize_url("https://www.linkedin.com/profile/jane-doe/recent-activity/all/"),
            "linkedin.com/profile/jane-doe"
        );
        assert_eq!(
            normalize_url("https://www.linkedin.com/profile/jane-doe/recent-activity/all/"),
            "linkedin.com/profile/jane-doe/recent-activity/all"
        );
    }

    #[tokio::test]
    async fn unparseable_json_writes_parse_error_and_returns_error_outcome() {
        let store = InMemoryTenantStore::new();
        let lead = lead_with_posts("1", json!("[{\"postContent\":\"he said \"hi\" there\""));
        store.seed_lead(LEADS_TABLE, lead.clone()).await;
        let model = StubModel { response: Ok(vec![]) };

        let processor = LeadProcessor {
            store: &store,
            model: &model,
            system_prompt: "score these",
            skip_reason_field_supported: true,
        };
        let outcome = processor.process(&lead).await;
        assert!(matches!(outcome, LeadOutcome::Error { .. }));

        let updated = store.get(LEADS_TABLE, "1").await.unwrap();
        assert_eq!(updated.get("Posts Relevance Score").unwrap().as_i64(), Some(0));
        assert!(updated
            .get_str(lead_fields::AI_EVALUATION)
            .unwrap()
            .starts_with("JSON_PARSE_ERROR:"));
        assert_eq!(updated.get_str(lead_fields::JSON_STATUS), Some("Failed"));
    }

    #[tokio::test]
    async fn empty_array_skips_with_no_posts_parsed() {
        let store = InMemoryTenantStore::new();
        let lead = lead_with_posts("1", json!("[]"));
        store.seed_lead(LEADS_TABLE, lead.clone()).await;
        let model = StubModel { response: Ok(vec![]) };

        let processor = LeadProcessor {
            store: &store,
            model: &model,
            system_prompt: "score these",
            skip_reason_field_supported: true,
        };
        let outcome = processor.process(&lead).await;
        assert!(matches!(outcome, LeadOutcome::Skipped { reason: SkipReason::NoPostsParsed }));
    }

    #[tokio::test]
    async fn tolerant_update_retries_without_skip_reason_on_unknown_field() {
        let store = InMemoryTenantStore::new();
        let lead = lead_with_posts("1", json!([]));
        store.seed_lead(LEADS_TABLE, lead.clone()).await;
        store
            .restrict_known_fields(
                LEADS_TABLE,
                vec![
                    lead_fields::POSTS_CONTENT.to_string(),
                    lead_fields::LINKEDIN_URL.to_string(),
                    lead_fields::DATE_SCORED.to_string(),
                ],
            )
            .await;
        let model = StubModel { response: Ok(vec![]) };

        let processor = LeadProcessor {
            store: &store,
            model: &model,
            system_prompt: "score these",
            skip_reason_field_supported: true,
        };
        let outcome = processor.process(&lead).await;
        assert!(matches!(outcome, LeadOutcome::Skipped { .. }));

        let updated = store.get(LEADS_TABLE, "1").await.unwrap();
        assert!(updated.date_scored().is_some());
        assert!(!updated.has_field(lead_fields::SKIP_REASON));
    }

    #[test]
    fn normalize_url_strips_scheme_www_query_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://www.Linkedin.com/in/jane-doe/?x=1#y"),
            "linkedin.com/in/jane-doe"
        );
    }

    #[test]
    fn extract_activity_id_matches_activity_pattern() {
        assert_eq!(
            extract_activity_id("https://linkedin.com/posts/foo-activity-7100000000000000000-AAAA/"),
            Some("7100000000000000000".to_string())
        );
    }

    #[test]
    fn extract_activity_id_falls_back_to_bare_digit_segment() {
        assert_eq!(extract_activity_id("https://example.com/post-12345-slug"), Some("12345".to_string()));
    }

    #[test]
    fn classify_error_message_maps_known_keywords() {
        assert_eq!(classify_error_message("request blocked by safety filter"), ErrorCategory::SafetyBlock);
        assert_eq!(classify_error_message("quota exceeded"), ErrorCategory::Quota);
        assert_eq!(classify_error_message("ETIMEDOUT"), ErrorCategory::Timeout);
        assert_eq!(classify_error_message("403 forbidden"), ErrorCategory::Auth);
        assert_eq!(classify_error_message("invalid JSON payload"), ErrorCategory::AiResponseFormat);
        assert_eq!(classify_error_message("model not found"), ErrorCategory::ModelConfig);
        assert_eq!(classify_error_message("something else entirely"), ErrorCategory::Unknown);
    }
}
