use std::path::PathBuf;

use clap::Parser;

use postscore_core::config::RunConfig;
use postscore_core::run_identity::RunIdentityService;
use postscore_core::selector::SelectorOptions;
use postscore_observability::{canonical_logs_dir_from_root, init_logging};
use postscore_orchestrator::RunOrchestrator;
use postscore_providers::{ModelCallOutcome, ModelError, ModelProvider, ScoreRequest, TokenUsage};
use postscore_runtime::{
    InMemoryStackTraceStore, InMemoryTenantRegistry, InMemoryTenantStoreFactory,
    InMemoryTrackingStore,
};
use postscore_types::{lead_fields, AiScore, Client, ClientId};
use serde_json::{json, Map};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Drives a single demonstration batch against in-memory reference
/// adapters and a deterministic stub model (§10.5). Not the production
/// HTTP/CLI surface named out of scope in §1; useful for exercising the
/// orchestrator end to end without a real tenant backend.
#[derive(Parser, Debug)]
#[command(name = "postscore")]
#[command(about = "Runs one post-scoring batch against in-memory demonstration adapters")]
struct Cli {
    /// Restrict the run to a single client id.
    #[arg(long)]
    client: Option<String>,

    /// Force rescoring of leads already scored.
    #[arg(long, default_value_t = false)]
    force_rescore: bool,

    #[arg(long, env = "VERBOSE_ERRORS", default_value_t = false)]
    verbose_errors: bool,

    #[arg(long)]
    state_dir: Option<String>,
}

/// A deterministic stand-in for [`postscore_providers::GenerativeModelClient`]:
/// scores every post proportionally to its content length. Good enough to
/// exercise the full pipeline without a model API key.
struct DemoModelProvider;

#[async_trait::async_trait]
impl ModelProvider for DemoModelProvider {
    async fn score_posts(&self, request: ScoreRequest) -> Result<ModelCallOutcome, ModelError> {
        let results = request
            .posts
            .iter()
            .map(|post| {
                let len = post.post_content.as_deref().unwrap_or_default().len() as i64;
                AiScore {
                    post_url: post.post_url.clone(),
                    post_score: (len % 100).clamp(1, 100),
                    scoring_rationale: "scored by the demonstration model".to_string(),
                }
            })
            .collect();
        Ok(ModelCallOutcome {
            results,
            token_usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            },
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let state_dir = resolve_state_dir(cli.state_dir);
    let logs_dir = canonical_logs_dir_from_root(&state_dir);
    let _guard = init_logging(&logs_dir, 14)?;

    let registry = InMemoryTenantRegistry::new(vec![
        demo_client("acme"),
        demo_client("globex"),
    ]);
    let store_factory = InMemoryTenantStoreFactory::new();
    seed_demo_data(&store_factory).await;

    let tracking = InMemoryTrackingStore::new();
    let model = DemoModelProvider;
    let stack_traces = InMemoryStackTraceStore::new();

    let mut config = RunConfig::from_env();
    config.verbose_errors = config.verbose_errors || cli.verbose_errors;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!(target: "postscore", "ctrl-c received, cancelling batch");
                cancel.cancel();
            }
        }
    });

    let orchestrator = RunOrchestrator {
        registry: &registry,
        tracking: &tracking,
        store_factory: &store_factory,
        model: &model,
        stack_traces: &stack_traces,
        identity: RunIdentityService::new(),
        config,
        cancel,
    };

    let selector_options = SelectorOptions {
        force_rescore: cli.force_rescore,
        ..Default::default()
    };

    let (result, summary) = orchestrator
        .run_batch(None, cli.client.as_deref(), &selector_options, None)
        .await?;

    info!(
        clients_run = result.clients_run,
        clients_failed = result.clients_failed,
        processed = result.totals.processed,
        scored = result.totals.scored,
        skipped = result.totals.skipped,
        errors = result.totals.errors,
        duration_ms = result.duration_ms,
        "run complete"
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(summary) = summary {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("POSTSCORE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".postscore")
}

fn demo_client(id: &str) -> Client {
    Client {
        client_id: ClientId(id.to_string()),
        client_name: id.to_string(),
        datastore_handle: format!("handle-{id}"),
        service_level: "standard".to_string(),
        active: true,
    }
}

async fn seed_demo_data(factory: &InMemoryTenantStoreFactory) {
    for handle in ["handle-acme", "handle-globex"] {
        let store = factory.store_for(handle).await;

        let mut fields = Map::new();
        fields.insert(lead_fields::LINKEDIN_URL.to_string(), json!("https://www.linkedin.com/in/jane-doe/"));
        fields.insert(
            lead_fields::POSTS_CONTENT.to_string(),
            json!([{
                "postUrl": "https://linkedin.com/posts/foo-activity-7100000000000000000-AAAA/",
                "postContent": "Excited to share our quarterly results with the team.",
                "authorUrl": "https://www.linkedin.com/in/jane-doe/",
            }]),
        );
        store
            .seed_lead("Leads", postscore_types::Lead::new("1", fields))
            .await;

        let mut header = Map::new();
        header.insert("Component Id".to_string(), json!("SCORING_HEADER"));
        header.insert("Name".to_string(), json!("Header"));
        header.insert("Text".to_string(), json!("Score the posts below using the attributes provided."));
        header.insert("Order".to_string(), json!(1));
        store.seed_lead("Post Scoring Instructions", postscore_types::Lead::new("header", header)).await;

        let mut attribute = Map::new();
        attribute.insert("Attribute Id".to_string(), json!("RELEVANCE"));
        attribute.insert("Name".to_string(), json!("Relevance"));
        attribute.insert("Category".to_string(), json!("positive"));
        attribute.insert("Max Points".to_string(), json!(100));
        attribute.insert("Detailed Instructions".to_string(), json!("Reward posts relevant to the company's industry."));
        attribute.insert("Active".to_string(), json!(true));
        store
            .seed_lead("Post Scoring Attributes", postscore_types::Lead::new("relevance", attribute))
            .await;
    }
}
