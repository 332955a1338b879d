use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The sentinel prompt-component id the Rubric Builder expands into the full
/// scoring-attribute block (§4.5).
pub const SCORING_HEADER: &str = "SCORING_HEADER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptComponent {
    pub component_id: String,
    pub name: String,
    pub text: String,
    pub order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeCategory {
    Positive,
    Negative,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub id: String,
    pub name: String,
    pub category: AttributeCategory,
    pub max_points: i64,
    pub detailed_instructions: String,
    #[serde(default)]
    pub positive_keywords: Option<String>,
    #[serde(default)]
    pub negative_keywords: Option<String>,
    #[serde(default)]
    pub example_high: Option<String>,
    #[serde(default)]
    pub example_low: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// A tenant's assembled scoring specification: an ordered prompt skeleton
/// plus the attribute set the [`SCORING_HEADER`] component expands into
/// (§3, §4.4, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Rubric {
    pub prompt_components: Vec<PromptComponent>,
    pub attributes_by_id: BTreeMap<String, Attribute>,
}
