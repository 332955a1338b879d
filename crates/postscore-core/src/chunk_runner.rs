//! Chunk Runner (§4.9): batches candidate leads and accumulates counters.

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use postscore_providers::ModelProvider;
use postscore_runtime::TenantStoreAdapter;
use postscore_types::{ChunkResult, Lead};

use crate::lead_processor::{LeadOutcome, LeadProcessor};

const CANCELLED: &str = "CANCELLED";

#[derive(Debug, Clone, Default)]
pub struct ChunkRunnerOptions {
    pub chunk_size: u64,
    pub verbose_errors: bool,
    pub max_verbose_errors: usize,
    /// Checked between leads, never mid-call (§5 Cancellation): a lead
    /// already in flight to the model still runs to completion or its
    /// configured timeout.
    pub cancel: CancellationToken,
}

pub async fn run_chunks<S: TenantStoreAdapter + ?Sized, M: ModelProvider + ?Sized>(
    processor: &LeadProcessor<'_, S, M>,
    leads: &[Lead],
    options: &ChunkRunnerOptions,
) -> anyhow::Result<ChunkResult> {
    let chunk_size = options.chunk_size.max(1) as usize;
    let mut totals = ChunkResult::default();

    for (chunk_index, chunk) in leads.chunks(chunk_size).enumerate() {
        run_one_chunk(processor, chunk, options, &mut totals)
            .await
            .with_context(|| format!("chunk {chunk_index} failed"))?;
    }

    Ok(totals)
}

async fn run_one_chunk<S: TenantStoreAdapter + ?Sized, M: ModelProvider + ?Sized>(
    processor: &LeadProcessor<'_, S, M>,
    chunk: &[Lead],
    options: &ChunkRunnerOptions,
    totals: &mut ChunkResult,
) -> anyhow::Result<()> {
    for lead in chunk {
        if options.cancel.is_cancelled() {
            totals.record_error(CANCELLED, 0);
            continue;
        }
        match processor.process(lead).await {
            LeadOutcome::Success { tokens } => totals.record_scored(tokens),
            LeadOutcome::Skipped { reason } => totals.record_skipped(reason.as_str()),
            LeadOutcome::Error { base_reason, message, category } => {
                let reason_key = format!("{base_reason}:{category}");
                totals.record_error(&reason_key, 0);
                if options.verbose_errors {
                    let detail_key = format!("{message}:{category}:{base_reason}");
                    totals.record_error_detail(&detail_key, options.max_verbose_errors);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use postscore_providers::{ModelCallOutcome, ModelError, ScoreRequest, TokenUsage};
    use postscore_runtime::InMemoryTenantStore;
    use postscore_types::{lead_fields, AiScore};
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
                    post_score: 10,
                    scoring_rationale: "ok".to_string(),
                })
                .collect();
            Ok(ModelCallOutcome {
                results,
                token_usage: TokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                },
            })
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
    async fn chunk_accumulation_matches_processed_leads() {
        let store = InMemoryTenantStore::new();
        let leads: Vec<Lead> = (0..25).map(|i| lead_with_post(&i.to_string())).collect();
        for lead in &leads {
            store.seed_lead("Leads", lead.clone()).await;
        }
        let model = AlwaysScores;
        let processor = LeadProcessor {
            store: &store,
            model: &model,
            system_prompt: "score",
            skip_reason_field_supported: true,
        };

        let totals = run_chunks(
            &processor,
            &leads,
            &ChunkRunnerOptions {
                chunk_size: 10,
                verbose_errors: false,
                max_verbose_errors: 10,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(totals.processed, 25);
        assert_eq!(totals.scored + totals.skipped + totals.errors, totals.processed);
    }

    #[tokio::test]
    async fn cancellation_stops_scoring_and_records_cancelled_bucket() {
        let store = InMemoryTenantStore::new();
        let leads: Vec<Lead> = (0..5).map(|i| lead_with_post(&i.to_string())).collect();
        for lead in &leads {
            store.seed_lead("Leads", lead.clone()).await;
        }
        let model = AlwaysScores;
        let processor = LeadProcessor {
            store: &store,
            model: &model,
            system_prompt: "score",
            skip_reason_field_supported: true,
        };

        let cancel = CancellationToken::new();
        cancel.cancel();

        let totals = run_chunks(
            &processor,
            &leads,
            &ChunkRunnerOptions {
                chunk_size: 10,
                verbose_errors: false,
                max_verbose_errors: 10,
                cancel,
            },
        )
        .await
        .unwrap();

        assert_eq!(totals.scored, 0);
        assert_eq!(totals.errors, 5);
        assert_eq!(totals.error_reason_counts.get(CANCELLED), Some(&5));
    }
}
