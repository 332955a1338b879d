use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{ClientId, ClientRunId, RunId};

/// Terminal status for one client's run, per §4.10's status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Success,
    CompletedWithErrors,
    Failed,
}

/// Accumulated counters for one chunk of leads (§3, §4.9).
///
/// Testable Property 7 requires `scored + skipped + errors == processed`;
/// `record_*` methods are the only way to mutate counters so that invariant
/// holds by construction rather than by caller discipline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkResult {
    pub processed: u64,
    pub scored: u64,
    pub skipped: u64,
    pub errors: u64,
    #[serde(default)]
    pub skip_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub error_reason_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub error_details: Vec<String>,
    pub total_tokens: u64,
}

impl ChunkResult {
    pub fn record_scored(&mut self, tokens: u64) {
        self.processed += 1;
        self.scored += 1;
        self.total_tokens += tokens;
    }

    pub fn record_skipped(&mut self, reason: &str) {
        self.processed += 1;
        self.skipped += 1;
        *self.skip_counts.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn record_error(&mut self, reason_key: &str, tokens: u64) {
        self.processed += 1;
        self.errors += 1;
        self.total_tokens += tokens;
        *self
            .error_reason_counts
            .entry(reason_key.to_string())
            .or_insert(0) += 1;
    }

    /// Appends a deduplicated diagnostic sample, capped at `max_samples`
    /// (§4.9, §6 `MAX_VERBOSE_ERRORS`). The dedup key is `<message>` as
    /// passed in by the caller, which already embeds `:<category>:<reason>`
    /// per §4.9.
    pub fn record_error_detail(&mut self, detail_key: &str, max_samples: usize) {
        if self.error_details.iter().any(|d| d == detail_key) {
            return;
        }
        if self.error_details.len() >= max_samples {
            return;
        }
        self.error_details.push(detail_key.to_string());
    }

    pub fn merge(&mut self, other: &ChunkResult) {
        self.processed += other.processed;
        self.scored += other.scored;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.total_tokens += other.total_tokens;
        for (k, v) in &other.skip_counts {
            *self.skip_counts.entry(k.clone()).or_insert(0) += v;
        }
        for (k, v) in &other.error_reason_counts {
            *self.error_reason_counts.entry(k.clone()).or_insert(0) += v;
        }
        for detail in &other.error_details {
            self.record_error_detail(detail, usize::MAX);
        }
    }
}

/// A client's aggregate result for the run (sum of its [`ChunkResult`]s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientResult {
    pub client_id: ClientId,
    pub totals: ChunkResult,
    pub status: ClientStatus,
}

impl ClientResult {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            totals: ChunkResult::default(),
            status: ClientStatus::Success,
        }
    }

    /// Applies §4.10's status mapping: success iff no errors; otherwise
    /// completed-with-errors. `failed` is reserved for the catastrophic path
    /// (the client never ran chunks at all) and is set directly, not here.
    pub fn finalize_status(&mut self) {
        if self.status == ClientStatus::Failed {
            return;
        }
        self.status = if self.totals.errors == 0 {
            ClientStatus::Success
        } else {
            ClientStatus::CompletedWithErrors
        };
    }
}

/// The run-wide aggregate (sum of all [`ClientResult`]s), §3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Option<String>,
    pub clients_run: u64,
    pub clients_failed: u64,
    pub totals: ChunkResult,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn record_client(&mut self, client: &ClientResult) {
        self.clients_run += 1;
        if client.status == ClientStatus::Failed {
            self.clients_failed += 1;
        }
        self.totals.merge(&client.totals);
    }
}

/// The shared tracking store's per-run record, keyed by the base [`RunId`]
/// (§3, §6 `createJobTracking`/`updateJob`/`completeJob`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrackingRecord {
    pub run_id: RunId,
    pub status: String,
    pub clients_total: u64,
    pub clients_completed: u64,
    pub posts_examined: u64,
    pub posts_scored: u64,
    pub leads_skipped: u64,
    pub errors: u64,
    pub last_client: Option<ClientId>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub notes: Option<String>,
}

/// The shared tracking store's per-client record, keyed by [`ClientRunId`]
/// (§3, §6 `updateRunRecord`/`completeClientProcessing`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRunRecord {
    pub client_run_id: ClientRunId,
    pub client_id: ClientId,
    pub posts_examined: u64,
    pub posts_scored: u64,
    pub post_scoring_tokens: u64,
    pub errors: u64,
    pub error_details: Vec<String>,
    pub leads_skipped: u64,
    pub status: ClientStatus,
}

impl ClientRunRecord {
    pub fn from_client_result(client_run_id: ClientRunId, result: &ClientResult) -> Self {
        Self {
            client_run_id,
            client_id: result.client_id.clone(),
            posts_examined: result.totals.processed,
            posts_scored: result.totals.scored,
            post_scoring_tokens: result.totals.total_tokens,
            errors: result.totals.errors,
            error_details: result.totals.error_details.clone(),
            leads_skipped: result.totals.skipped,
            status: result.status,
        }
    }
}
