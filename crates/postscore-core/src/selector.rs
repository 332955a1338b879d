//! Lead Selector (§4.7): returns the candidate leads for one client run.

use postscore_runtime::{SelectQuery, TenantStoreAdapter, TenantStoreError};
use postscore_types::lead_fields;
use postscore_types::Lead;

pub const LEADS_VIEW: &str = "Leads with Posts not yet scored";
const MIN_CONTENT_NON_WHITESPACE_CHARS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct SelectorOptions {
    pub force_rescore: bool,
    pub target_ids: Vec<String>,
    pub leads_table_name: Option<String>,
}

fn table_name(options: &SelectorOptions) -> &str {
    options.leads_table_name.as_deref().unwrap_or("Leads")
}

pub async fn select_candidates<S: TenantStoreAdapter + ?Sized>(
    store: &S,
    options: &SelectorOptions,
    limit: Option<usize>,
) -> anyhow::Result<Vec<Lead>> {
    let table = table_name(options);

    let leads = if !options.target_ids.is_empty() {
        select_by_target_ids(store, table, &options.target_ids).await?
    } else {
        select_by_view_or_formula(store, table, options).await?
    };

    let mut filtered: Vec<Lead> = leads.into_iter().filter(has_usable_posts_content).collect();
    if let Some(limit) = limit {
        filtered.truncate(limit);
    }
    Ok(filtered)
}

async fn select_by_target_ids<S: TenantStoreAdapter + ?Sized>(
    store: &S,
    table: &str,
    target_ids: &[String],
) -> anyhow::Result<Vec<Lead>> {
    let mut leads = Vec::with_capacity(target_ids.len());
    for id in target_ids {
        match store.find(table, id).await {
            Ok(lead) => leads.push(lead),
            Err(TenantStoreError::NotFound { .. }) => continue,
            Err(other) => return Err(anyhow::anyhow!(other)),
        }
    }
    Ok(leads)
}

async fn select_by_view_or_formula<S: TenantStoreAdapter + ?Sized>(
    store: &S,
    table: &str,
    options: &SelectorOptions,
) -> anyhow::Result<Vec<Lead>> {
    // Existence probe: an unreachable table selects nothing rather than
    // propagating an error (§4.7 step 4).
    let probe = store.select(table, SelectQuery::default()).await;
    if probe.is_err() {
        return Ok(Vec::new());
    }

    let view_query = SelectQuery {
        view: Some(LEADS_VIEW.to_string()),
        formula: options.force_rescore.then(|| "TRUE()".to_string()),
        ..Default::default()
    };

    match store.select(table, view_query).await {
        Ok(leads) if !leads.is_empty() => return Ok(leads),
        Ok(_empty) => {}
        Err(_) => {}
    }

    select_by_formula_fallback(store, table, options).await
}

async fn select_by_formula_fallback<S: TenantStoreAdapter + ?Sized>(
    store: &S,
    table: &str,
    options: &SelectorOptions,
) -> anyhow::Result<Vec<Lead>> {
    let with_guard = formula(options.force_rescore, true);
    let result = store
        .select(
            table,
            SelectQuery {
                formula: Some(with_guard),
                fields: Some(vec![lead_fields::POSTS_ACTIONED.to_string()]),
                ..Default::default()
            },
        )
        .await;

    match result {
        Ok(leads) => Ok(leads),
        Err(TenantStoreError::UnknownField { field, .. }) if field == lead_fields::POSTS_ACTIONED => {
            let without_guard = formula(options.force_rescore, false);
            store
                .select(
                    table,
                    SelectQuery {
                        formula: Some(without_guard),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| anyhow::anyhow!(e))
        }
        Err(other) => Err(anyhow::anyhow!(other)),
    }
}

fn formula(force_rescore: bool, with_actioned_guard: bool) -> String {
    let mut clauses = vec!["{Posts Content} != ''".to_string()];
    if !force_rescore {
        clauses.push("{Date Posts Scored} = BLANK()".to_string());
    }
    if with_actioned_guard {
        clauses.push("OR({Posts Actioned} = 0, {Posts Actioned} = '', {Posts Actioned} = BLANK())".to_string());
    }
    format!("AND({})", clauses.join(", "))
}

fn has_usable_posts_content(lead: &Lead) -> bool {
    match lead.posts_content() {
        Some(serde_json::Value::String(s)) => {
            s.chars().filter(|c| !c.is_whitespace()).count() >= MIN_CONTENT_NON_WHITESPACE_CHARS
        }
        Some(serde_json::Value::Array(a)) => !a.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postscore_runtime::InMemoryTenantStore;
    use serde_json::{json, Map};

    fn lead_with_content(id: &str, content: serde_json::Value) -> Lead {
        let mut fields = Map::new();
        fields.insert(lead_fields::POSTS_CONTENT.to_string(), content);
        Lead::new(id, fields)
    }

    #[tokio::test]
    async fn target_ids_drop_not_found_and_respect_limit() {
        let store = InMemoryTenantStore::new();
        store.seed_lead("Leads", lead_with_content("1", json!("x".repeat(20)))).await;
        store.seed_lead("Leads", lead_with_content("2", json!("y".repeat(20)))).await;

        let options = SelectorOptions {
            target_ids: vec!["1".to_string(), "missing".to_string(), "2".to_string()],
            ..Default::default()
        };
        let leads = select_candidates(&store, &options, Some(1)).await.unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].id, "1");
    }

    #[tokio::test]
    async fn view_path_is_used_when_registered() {
        let store = InMemoryTenantStore::new();
        store.seed_lead("Leads", lead_with_content("1", json!("x".repeat(20)))).await;
        store.register_view("Leads", LEADS_VIEW, vec!["1".to_string()]).await;

        let leads = select_candidates(&store, &SelectorOptions::default(), None).await.unwrap();
        assert_eq!(leads.len(), 1);
    }

    #[tokio::test]
    async fn formula_fallback_runs_when_view_missing() {
        let store = InMemoryTenantStore::new();
        store.seed_lead("Leads", lead_with_content("1", json!("x".repeat(20)))).await;

        let leads = select_candidates(&store, &SelectorOptions::default(), None).await.unwrap();
        assert_eq!(leads.len(), 1);
    }

    #[tokio::test]
    async fn formula_fallback_retries_without_actioned_guard_on_unknown_field() {
        let store = InMemoryTenantStore::new();
        store.seed_lead("Leads", lead_with_content("1", json!("x".repeat(20)))).await;
        // `Posts Actioned` is absent from this tenant's schema: the first
        // attempt (which projects it for the guard clause) must fail with
        // `UnknownField` and the retry without the guard must still
        // succeed.
        store
            .restrict_known_fields("Leads", vec![lead_fields::POSTS_CONTENT.to_string()])
            .await;

        let leads = select_candidates(&store, &SelectorOptions::default(), None).await.unwrap();
        assert_eq!(leads.len(), 1);
    }

    #[tokio::test]
    async fn post_selection_filter_drops_short_strings_and_empty_arrays() {
        let store = InMemoryTenantStore::new();
        store.seed_lead("Leads", lead_with_content("short", json!("tiny"))).await;
        store.seed_lead("Leads", lead_with_content("empty_array", json!([]))).await;
        store.seed_lead("Leads", lead_with_content("ok", json!("x".repeat(20)))).await;

        let leads = select_candidates(&store, &SelectorOptions::default(), None).await.unwrap();
        assert_eq!(leads.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), vec!["ok"]);
    }
}
