//! Loads a tenant's rubric inputs from the tenant store (§4.4). Read-only:
//! never mutates the store.

use std::collections::BTreeMap;

use postscore_runtime::{SelectQuery, TenantStoreAdapter};
use postscore_types::{Attribute, PromptComponent, Rubric};

pub const PROMPT_COMPONENTS_TABLE: &str = "Post Scoring Instructions";
pub const SCORING_ATTRIBUTES_TABLE: &str = "Post Scoring Attributes";

pub async fn load_rubric_inputs<S: TenantStoreAdapter + ?Sized>(store: &S) -> anyhow::Result<Rubric> {
    let mut components = load_prompt_components(store).await?;
    components.sort_by_key(|c| c.order);
    if components.is_empty() {
        tracing::warn!(target: "postscore", "rubric has no prompt components");
    }

    let attributes = load_scoring_attributes(store).await?;
    if attributes.is_empty() {
        tracing::warn!(target: "postscore", "rubric has no scoring attributes");
    }

    let attributes_by_id: BTreeMap<String, Attribute> =
        attributes.into_iter().map(|a| (a.id.clone(), a)).collect();

    Ok(Rubric {
        prompt_components: components,
        attributes_by_id,
    })
}

async fn load_prompt_components<S: TenantStoreAdapter + ?Sized>(
    store: &S,
) -> anyhow::Result<Vec<PromptComponent>> {
    let records = store
        .select(PROMPT_COMPONENTS_TABLE, SelectQuery::default())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(records
        .into_iter()
        .map(|lead| PromptComponent {
            component_id: lead.get_str("Component Id").unwrap_or(&lead.id).to_string(),
            name: lead.get_str("Name").unwrap_or_default().to_string(),
            text: lead.get_str("Text").unwrap_or_default().to_string(),
            order: lead
                .get("Order")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
        })
        .collect())
}

async fn load_scoring_attributes<S: TenantStoreAdapter + ?Sized>(
    store: &S,
) -> anyhow::Result<Vec<Attribute>> {
    let records = store
        .select(SCORING_ATTRIBUTES_TABLE, SelectQuery::default())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(records
        .into_iter()
        .map(|lead| {
            let category = match lead.get_str("Category").unwrap_or_default().to_ascii_lowercase().as_str() {
                "positive" => postscore_types::AttributeCategory::Positive,
                "negative" => postscore_types::AttributeCategory::Negative,
                _ => postscore_types::AttributeCategory::Other,
            };
            let active = match lead.get("Active") {
                None => true,
                Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(s)) if s.trim().is_empty() => true,
                Some(serde_json::Value::Bool(b)) => *b,
                Some(serde_json::Value::String(s)) => !s.eq_ignore_ascii_case("false"),
                _ => true,
            };
            Attribute {
                id: lead.get_str("Attribute Id").unwrap_or(&lead.id).to_string(),
                name: lead.get_str("Name").unwrap_or_default().to_string(),
                category,
                max_points: lead.get("Max Points").and_then(|v| v.as_i64()).unwrap_or(0),
                detailed_instructions: lead.get_str("Detailed Instructions").unwrap_or_default().to_string(),
                positive_keywords: lead.get_str("Positive Keywords").map(str::to_string),
                negative_keywords: lead.get_str("Negative Keywords").map(str::to_string),
                example_high: lead.get_str("Example High").map(str::to_string),
                example_low: lead.get_str("Example Low").map(str::to_string),
                active,
            }
        })
        .collect())
}
