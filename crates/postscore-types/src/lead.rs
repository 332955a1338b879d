use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ClientId;

/// A tenant loaded from the registry. Not mutated by the core; reloaded once
/// per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: ClientId,
    pub client_name: String,
    pub datastore_handle: String,
    pub service_level: String,
    pub active: bool,
}

/// Field-name contracts for the tenant store's `Leads` table (§6). The
/// tenant's exact schema varies, so a `Lead` is a generic record plus typed
/// accessors rather than a fixed struct — the same "capability-set, not a
/// compile-time binding" shape the design notes call for.
pub mod lead_fields {
    pub const POSTS_CONTENT: &str = "Posts Content";
    pub const LINKEDIN_URL: &str = "LinkedIn Profile URL";
    pub const DATE_SCORED: &str = "Date Posts Scored";
    pub const RELEVANCE_SCORE: &str = "Posts Relevance Score";
    pub const AI_EVALUATION: &str = "Posts AI Evaluation";
    pub const TOP_SCORING_POST: &str = "Top Scoring Post";
    pub const SKIP_REASON: &str = "Posts Skip Reason";
    pub const JSON_STATUS: &str = "Posts JSON Status";
    pub const POSTS_ACTIONED: &str = "Posts Actioned";
}

/// A single lead record: an opaque id plus the tenant store's field map.
///
/// Downstream code reads and writes through the typed accessors below rather
/// than indexing `fields` directly, so the semantic contract (§3) stays in
/// one place even though the underlying representation is schemaless.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Lead {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Lead {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn posts_content(&self) -> Option<&Value> {
        self.get(lead_fields::POSTS_CONTENT)
    }

    pub fn linkedin_url(&self) -> Option<&str> {
        self.get_str(lead_fields::LINKEDIN_URL)
    }

    pub fn date_scored(&self) -> Option<&str> {
        self.get_str(lead_fields::DATE_SCORED)
    }

    pub fn posts_actioned(&self) -> Option<bool> {
        match self.get(lead_fields::POSTS_ACTIONED) {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::Number(n)) => n.as_i64().map(|v| v != 0),
            Some(Value::String(s)) => {
                if s.is_empty() {
                    None
                } else {
                    Some(s != "0" && !s.eq_ignore_ascii_case("false"))
                }
            }
            _ => None,
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }
}

/// A single social-media post attached to a lead, as produced by Payload
/// Repair (§4.3). Unknown fields are preserved in `extra` so the Lead
/// Processor can do best-effort date/author extraction from vendor-specific
/// nested shapes (e.g. `postedAt.timestamp`) without the type needing to
/// enumerate every one of them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Post {
    #[serde(rename = "postUrl", default)]
    pub post_url: String,
    #[serde(rename = "postContent", default)]
    pub post_content: Option<String>,
    #[serde(rename = "postDate", default)]
    pub post_date: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(rename = "authorUrl", default)]
    pub author_url: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub metadata: Option<PostMetadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The nested metadata bag a source may carry instead of (or in addition to)
/// top-level `authorUrl`/`action` fields (§3 invariant on `Post`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PostMetadata {
    #[serde(rename = "authorUrl", default)]
    pub author_url: Option<String>,
    #[serde(rename = "authorName", default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

/// The model's per-post verdict, before merging with source fields (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiScore {
    #[serde(rename = "postUrl")]
    pub post_url: String,
    #[serde(rename = "postScore")]
    pub post_score: i64,
    #[serde(rename = "scoringRationale")]
    pub scoring_rationale: String,
}

/// An [`AiScore`] merged with its source [`Post`] (§4.8 step 4-5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedScore {
    #[serde(rename = "postUrl")]
    pub post_url: String,
    #[serde(rename = "postScore")]
    pub post_score: i64,
    #[serde(rename = "scoringRationale")]
    pub scoring_rationale: String,
    #[serde(rename = "postContent")]
    pub post_content: Option<String>,
    #[serde(rename = "postDate")]
    pub post_date: Option<String>,
    #[serde(rename = "authorUrl")]
    pub author_url: Option<String>,
    #[serde(rename = "authorName")]
    pub author_name: Option<String>,
    #[serde(rename = "isRepost")]
    pub is_repost: bool,
}
