//! Run Orchestrator (§4.11): drives one post-scoring batch across every
//! active client, sequentially, isolating per-client failures.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use postscore_core::client_runner::{run_client, ClientRunContext};
use postscore_core::config::RunConfig;
use postscore_core::run_identity::RunIdentityService;
use postscore_core::selector::SelectorOptions;
use postscore_providers::ModelProvider;
use postscore_runtime::{
    ExecutionLogRecord, JobUpdate, StackTraceRecord, StackTraceStore, TenantRegistry,
    TenantStoreAdapter, TenantStoreFactory, TrackingStoreAdapter,
};
use postscore_types::{Client, ClientId, ClientResult, ClientStatus, RunId, RunResult};

const JOB_TYPE: &str = "post_scoring";

/// A capped, deduplicated diagnostics payload attached to a run when
/// `VERBOSE_ERRORS` is set (§9 "logging of large payloads", §10.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub error_sample: Vec<String>,
    pub crate_version: String,
    pub hostname: String,
}

pub struct RunOrchestrator<'a, G, T, F, M, X>
where
    G: TenantRegistry + ?Sized,
    T: TrackingStoreAdapter + ?Sized,
    F: TenantStoreFactory + ?Sized,
    M: ModelProvider + ?Sized,
    X: StackTraceStore + ?Sized,
{
    pub registry: &'a G,
    pub tracking: &'a T,
    pub store_factory: &'a F,
    pub model: &'a M,
    pub stack_traces: &'a X,
    pub identity: RunIdentityService,
    pub config: RunConfig,
    /// Cooperative cancellation signal (§5): checked between leads inside
    /// the Chunk Runner, and between clients here, so a caller can abort a
    /// long batch without interrupting an in-flight model call.
    pub cancel: CancellationToken,
}

impl<'a, G, T, F, M, X> RunOrchestrator<'a, G, T, F, M, X>
where
    G: TenantRegistry + ?Sized,
    T: TrackingStoreAdapter + ?Sized,
    F: TenantStoreFactory + ?Sized,
    M: ModelProvider + ?Sized,
    X: StackTraceStore + ?Sized,
{
    /// Runs one batch. `base_run_id` is minted via the Run Identity Service
    /// when absent; `client_filter` restricts the run to a single client id.
    pub async fn run_batch(
        &self,
        base_run_id: Option<RunId>,
        client_filter: Option<&str>,
        selector_options: &SelectorOptions,
        limit: Option<usize>,
    ) -> anyhow::Result<(RunResult, Option<RunSummary>)> {
        let started = Instant::now();
        let base_run_id = base_run_id.unwrap_or_else(|| self.identity.generate());

        let clients = match self.registry.list_active_clients(client_filter).await {
            Ok(clients) => clients,
            Err(e) => {
                self.notify_admin(&format!("tenant registry unreachable: {e}")).await;
                return Err(e.context("listing active clients failed"));
            }
        };

        if let Err(e) = self.tracking.create_job_tracking(&base_run_id, clients.len() as u64).await {
            self.notify_admin(&format!("tracking store unreachable at run start: {e}")).await;
            return Err(e.context("creating job tracking record failed"));
        }

        let mut run_result = RunResult {
            run_id: Some(base_run_id.0.clone()),
            ..Default::default()
        };
        let mut error_sample: Vec<String> = Vec::new();

        for client in &clients {
            if self.cancel.is_cancelled() {
                tracing::warn!(target: "postscore", run_id = %base_run_id, "batch cancelled, skipping remaining clients");
                break;
            }
            let result = self.run_one_client(&base_run_id, client, selector_options, limit).await;
            run_result.record_client(&result);
            if self.config.verbose_errors {
                for detail in &result.totals.error_details {
                    if error_sample.len() >= self.config.max_verbose_errors {
                        break;
                    }
                    if !error_sample.contains(detail) {
                        error_sample.push(detail.clone());
                    }
                }
            }

            if let Err(e) = self
                .tracking
                .update_job(
                    &base_run_id,
                    JobUpdate {
                        clients_completed: Some(run_result.clients_run),
                        posts_examined: Some(run_result.totals.processed),
                        posts_scored: Some(run_result.totals.scored),
                        leads_skipped: Some(run_result.totals.skipped),
                        errors: Some(run_result.totals.errors),
                        last_client: Some(client.client_id.clone()),
                    },
                )
                .await
            {
                tracing::warn!(target: "postscore", run_id = %base_run_id, client_id = client.client_id.as_ref(), error = %e, "failed to update run tracking progress");
            }
        }

        run_result.duration_ms = started.elapsed().as_millis() as u64;

        let final_status = if run_result.clients_failed > 0 || run_result.totals.errors > 0 {
            "completed_with_errors"
        } else {
            "success"
        };
        if let Err(e) = self.tracking.complete_job(&base_run_id, final_status, None).await {
            tracing::warn!(target: "postscore", run_id = %base_run_id, error = %e, "failed to mark run complete");
        }

        let summary = if self.config.verbose_errors {
            Some(RunSummary {
                run_id: base_run_id.0.clone(),
                error_sample,
                crate_version: env!("CARGO_PKG_VERSION").to_string(),
                hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            })
        } else {
            None
        };

        Ok((run_result, summary))
    }

    async fn run_one_client(
        &self,
        base_run_id: &RunId,
        client: &Client,
        selector_options: &SelectorOptions,
        limit: Option<usize>,
    ) -> ClientResult {
        if let Err(e) = self
            .registry
            .set_job_status(&client.client_id, JOB_TYPE, "RUNNING", base_run_id.as_ref())
            .await
        {
            tracing::warn!(target: "postscore", client_id = client.client_id.as_ref(), error = %e, "failed to set running job status");
        }

        let outcome = self.try_run_client(base_run_id, client, selector_options, limit).await;

        let (result, log_status) = match outcome {
            Ok(result) => {
                let status = match result.status {
                    ClientStatus::Success => "success",
                    ClientStatus::CompletedWithErrors => "completed_with_errors",
                    ClientStatus::Failed => "failed",
                };
                (result, status)
            }
            Err(e) => {
                self.archive_stack_trace(base_run_id, client, &e).await;
                let mut result = ClientResult::new(client.client_id.clone());
                result.status = ClientStatus::Failed;
                result.totals.record_error(&format!("CLIENT_FAILURE:{e}"), 0);
                (result, "failed")
            }
        };

        if let Err(e) = self
            .registry
            .set_job_status(&client.client_id, JOB_TYPE, log_status, base_run_id.as_ref())
            .await
        {
            tracing::warn!(target: "postscore", client_id = client.client_id.as_ref(), error = %e, "failed to set terminal job status");
        }
        if let Err(e) = self
            .registry
            .log_execution(
                &client.client_id,
                ExecutionLogRecord {
                    run_id: base_run_id.0.clone(),
                    status: log_status.to_string(),
                    notes: None,
                },
            )
            .await
        {
            tracing::warn!(target: "postscore", client_id = client.client_id.as_ref(), error = %e, "failed to log client execution");
        }

        result
    }

    async fn try_run_client(
        &self,
        base_run_id: &RunId,
        client: &Client,
        selector_options: &SelectorOptions,
        limit: Option<usize>,
    ) -> anyhow::Result<ClientResult> {
        let store = self.store_factory.open(client).await?;
        let ctx = ClientRunContext {
            store: store.as_ref() as &dyn TenantStoreAdapter,
            model: self.model,
            tracking: self.tracking,
            identity: &self.identity,
            config: &self.config,
            cancel: self.cancel.clone(),
        };
        run_client(&ctx, base_run_id, client, selector_options, limit).await
    }

    /// Archives a client-run failure's full cause chain to the Stack Trace
    /// Store and logs the `STACKTRACE:<timestamp>` marker line (§4.2,
    /// §4.11). The store's own timestamp-generation helper is
    /// implementation-specific, so the orchestrator mints the timestamp
    /// itself rather than depending on it through the trait object.
    async fn archive_stack_trace(&self, run_id: &RunId, client: &Client, error: &anyhow::Error) {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.9f").to_string();
        let stack_trace = error
            .chain()
            .map(|cause| cause.to_string())
            .collect::<Vec<_>>()
            .join("\ncaused by: ");
        let record = StackTraceRecord {
            timestamp: timestamp.clone(),
            run_id: Some(run_id.clone()),
            client_id: Some(client.client_id.clone()),
            error_message: error.to_string(),
            stack_trace,
        };
        match self.stack_traces.save(record).await {
            Ok(ts) => {
                tracing::error!(target: "postscore", client_id = client.client_id.as_ref(), error = %error, "client run failed STACKTRACE:{}", ts);
            }
            Err(save_err) => {
                tracing::warn!(target: "postscore", error = %save_err, "failed to archive stack trace");
                tracing::warn!(target: "postscore", client_id = client.client_id.as_ref(), error = %error, "client run failed");
            }
        }
    }

    /// Best-effort notification for global failures (§4.11). Never fails the
    /// caller: a broken alert hook must not mask the underlying error.
    async fn notify_admin(&self, message: &str) {
        let Some(hook) = &self.config.admin_alert_hook else {
            tracing::error!(target: "postscore", message, "global orchestrator failure (no admin hook configured)");
            return;
        };
        let client = reqwest::Client::new();
        let body = serde_json::json!({ "message": message });
        if let Err(e) = client.post(hook).json(&body).send().await {
            tracing::error!(target: "postscore", message, hook, error = %e, "admin alert hook delivery failed");
        }
    }
}
