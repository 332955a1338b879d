//! Client Runner (§4.10): processes one client's candidate leads end to end.

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use postscore_providers::ModelProvider;
use postscore_runtime::{
    ClientRunRecordUpdate, SelectQuery, TenantStoreAdapter, TrackingStoreAdapter,
};
use postscore_types::{Client, ClientResult, ClientRunRecord, ClientStatus, RunId};

use crate::chunk_runner::{run_chunks, ChunkRunnerOptions};
use crate::config::RunConfig;
use crate::lead_processor::LeadProcessor;
use crate::rubric_builder::build_system_prompt;
use crate::rubric_loader::load_rubric_inputs;
use crate::run_identity::RunIdentityService;
use crate::selector::{select_candidates, SelectorOptions};

const LEADS_TABLE: &str = "Leads";

pub struct ClientRunContext<'a, S: TenantStoreAdapter + ?Sized, M: ModelProvider + ?Sized, T: TrackingStoreAdapter + ?Sized> {
    pub store: &'a S,
    pub model: &'a M,
    pub tracking: &'a T,
    pub identity: &'a RunIdentityService,
    pub config: &'a RunConfig,
    pub cancel: CancellationToken,
}

/// Runs one client's batch and returns its aggregate result. Failures at
/// this boundary propagate to the caller (the Run Orchestrator), which
/// isolates them per client (§4.11); this function itself never panics on
/// a per-lead or per-chunk failure, only on resources it cannot obtain at
/// all (step 1).
pub async fn run_client<S, M, T>(
    ctx: &ClientRunContext<'_, S, M, T>,
    base_run_id: &RunId,
    client: &Client,
    selector_options: &SelectorOptions,
    limit: Option<usize>,
) -> anyhow::Result<ClientResult>
where
    S: TenantStoreAdapter + ?Sized,
    M: ModelProvider + ?Sized,
    T: TrackingStoreAdapter + ?Sized,
{
    let mut result = ClientResult::new(client.client_id.clone());

    // Step 3: probe once whether the optional skip-reason field exists.
    let skip_reason_field_supported = probe_skip_reason_field(ctx.store).await;

    // Step 5: select candidates.
    let leads = select_candidates(ctx.store, selector_options, limit)
        .await
        .context("lead selection failed")?;

    // Step 6: build the rubric once; cache the prompt for this batch.
    // Failure here is not fatal — a blank prompt degrades scoring quality
    // but does not abort the client (§4.10 step 6, §9 "cached per-client
    // prompt").
    let system_prompt = match load_rubric_inputs(ctx.store).await {
        Ok(rubric) => build_system_prompt(&rubric),
        Err(e) => {
            tracing::warn!(target: "postscore", client_id = client.client_id.as_ref(), error = %e, "rubric build failed, falling back to an empty prompt");
            String::new()
        }
    };

    let processor = LeadProcessor {
        store: ctx.store,
        model: ctx.model,
        system_prompt: &system_prompt,
        skip_reason_field_supported,
    };

    let chunk_options = ChunkRunnerOptions {
        chunk_size: ctx.config.chunk_size,
        verbose_errors: ctx.config.verbose_errors,
        max_verbose_errors: ctx.config.max_verbose_errors,
        cancel: ctx.cancel.clone(),
    };

    result.totals = run_chunks(&processor, &leads, &chunk_options)
        .await
        .context("chunk processing failed")?;
    result.finalize_status();

    // Step 8: compose ClientRunId and write metrics (non-fatal on failure).
    match ctx.identity.compose(base_run_id, &client.client_id) {
        Ok(client_run_id) => {
            let record = ClientRunRecord::from_client_result(client_run_id.clone(), &result);
            if let Err(e) = ctx
                .tracking
                .update_run_record(
                    &client_run_id,
                    &client.client_id,
                    ClientRunRecordUpdate {
                        posts_examined: Some(record.posts_examined),
                        posts_scored: Some(record.posts_scored),
                        post_scoring_tokens: Some(record.post_scoring_tokens),
                        errors: Some(record.errors),
                        error_details: Some(record.error_details.clone()),
                        leads_skipped: Some(record.leads_skipped),
                        status: Some(record.status),
                    },
                    true,
                )
                .await
            {
                tracing::warn!(target: "postscore", client_id = client.client_id.as_ref(), error = %e, "failed to write client-run metrics");
            }
            if let Err(e) = ctx.tracking.complete_client_processing(&client_run_id, record).await {
                tracing::warn!(target: "postscore", client_id = client.client_id.as_ref(), error = %e, "failed to complete client-run tracking");
            }
        }
        Err(e) => {
            tracing::warn!(target: "postscore", client_id = client.client_id.as_ref(), error = %e, "could not compose client run id for metrics");
        }
    }

    Ok(result)
}

/// §4.10 step 3: a best-effort existence probe for the optional
/// `skipReason` field. We can't ask "does this field exist" directly
/// through the generic adapter contract, so we probe by attempting a
/// zero-row select that projects it; an `UnknownField` error means the
/// tenant's schema does not carry it.
async fn probe_skip_reason_field<S: TenantStoreAdapter + ?Sized>(store: &S) -> bool {
    let probe = store
        .select(
            LEADS_TABLE,
            SelectQuery {
                fields: Some(vec![postscore_types::lead_fields::SKIP_REASON.to_string()]),
                max_records: Some(0),
                ..Default::default()
            },
        )
        .await;
    !matches!(probe, Err(postscore_runtime::TenantStoreError::UnknownField { .. }))
}

pub fn status_label(status: ClientStatus) -> &'static str {
    match status {
        ClientStatus::Success => "success",
        ClientStatus::CompletedWithErrors => "completed_with_errors",
        ClientStatus::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postscore_providers::{ModelCallOutcome, ModelError, ScoreRequest, TokenUsage};
    use postscore_runtime::{InMemoryTenantStore, InMemoryTrackingStore};
    use postscore_types::{lead_fields, AiScore, ClientId, Lead};
    use serde_json::{json, Map};

    struct AlwaysScores;

    #[async_trait::async_trait]
    impl ModelProvider for AlwaysScores {
        async fn score_posts(&self, request: ScoreRequest) -> Result<ModelCallOutcome, ModelError> {
            let results = request
                .posts
                .iter()
                .map(|p| AiScore {
                    post_url: p.post_url.clone(),
                    post_score: 42,
                    scoring_rationale: "ok".to_string(),
                })
                .collect();
            Ok(ModelCallOutcome {
                results,
                token_usage: TokenUsage { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 },
            })
        }
    }

    fn client(id: &str) -> Client {
        Client {
            client_id: ClientId(id.to_string()),
            client_name: id.to_string(),
            datastore_handle: format!("handle-{id}"),
            service_level: "standard".to_string(),
            active: true,
        }
    }

    fn lead_with_post(id: &str) -> Lead {
        let mut fields = Map::new();
        fields.insert(
            lead_fields::POSTS_CONTENT.to_string(),
            json!([{"postUrl": format!("https://x.com/{id}"), "postContent": "hello"}]),
        );
        Lead::new(id, fields)
    }

    #[tokio::test]
    async fn successful_run_reports_success_status_and_writes_metrics() {
        let store = InMemoryTenantStore::new();
        store.seed_lead(LEADS_TABLE, lead_with_post("1")).await;
        let tracking = InMemoryTrackingStore::new();
        let model = AlwaysScores;
        let identity = RunIdentityService::new();
        let config = RunConfig::default();

        let ctx = ClientRunContext {
            store: &store,
            model: &model,
            tracking: &tracking,
            identity: &identity,
            config: &config,
            cancel: CancellationToken::new(),
        };
        let base_run_id = RunId("260726-120000".to_string());
        let client = client("acme");

        let result = run_client(&ctx, &base_run_id, &client, &SelectorOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(result.status, ClientStatus::Success);
        assert_eq!(result.totals.scored, 1);

        let client_run_id = identity.compose(&base_run_id, &client.client_id).unwrap();
        let record = tracking.client_run(&client_run_id).await.unwrap();
        assert_eq!(record.posts_scored, 1);
    }
}
