use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use postscore_types::{ClientId, ClientRunId, ClientRunRecord, ClientStatus, RunId, RunTrackingRecord};

/// Partial update to a [`RunTrackingRecord`] (§6 `updateJob`). `None` means
/// "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub clients_completed: Option<u64>,
    pub posts_examined: Option<u64>,
    pub posts_scored: Option<u64>,
    pub leads_skipped: Option<u64>,
    pub errors: Option<u64>,
    pub last_client: Option<ClientId>,
}

/// Partial update to a [`ClientRunRecord`] (§6 `updateRunRecord`).
#[derive(Debug, Clone, Default)]
pub struct ClientRunRecordUpdate {
    pub posts_examined: Option<u64>,
    pub posts_scored: Option<u64>,
    pub post_scoring_tokens: Option<u64>,
    pub errors: Option<u64>,
    pub error_details: Option<Vec<String>>,
    pub leads_skipped: Option<u64>,
    pub status: Option<ClientStatus>,
}

/// The shared tracking store adapter (§6). Serialises per-row updates, the
/// only mutable state two client runners may share concurrently (§5).
#[async_trait]
pub trait TrackingStoreAdapter: Send + Sync {
    async fn create_job_tracking(
        &self,
        run_id: &RunId,
        clients_total: u64,
    ) -> anyhow::Result<RunTrackingRecord>;
    async fn update_job(&self, run_id: &RunId, updates: JobUpdate) -> anyhow::Result<()>;
    async fn complete_job(&self, run_id: &RunId, status: &str, notes: Option<String>) -> anyhow::Result<()>;
    async fn update_run_record(
        &self,
        client_run_id: &ClientRunId,
        client_id: &ClientId,
        updates: ClientRunRecordUpdate,
        create_if_missing: bool,
    ) -> anyhow::Result<()>;
    async fn complete_client_processing(
        &self,
        client_run_id: &ClientRunId,
        final_metrics: ClientRunRecord,
    ) -> anyhow::Result<()>;
}

/// A reference implementation backed by in-process maps, for tests and the
/// demonstration binary (§10.4).
#[derive(Clone, Default)]
pub struct InMemoryTrackingStore {
    jobs: Arc<RwLock<HashMap<String, RunTrackingRecord>>>,
    client_runs: Arc<RwLock<HashMap<String, ClientRunRecord>>>,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job(&self, run_id: &RunId) -> Option<RunTrackingRecord> {
        self.jobs.read().await.get(run_id.as_ref()).cloned()
    }

    pub async fn client_run(&self, client_run_id: &ClientRunId) -> Option<ClientRunRecord> {
        self.client_runs.read().await.get(client_run_id.as_ref()).cloned()
    }
}

#[async_trait]
impl TrackingStoreAdapter for InMemoryTrackingStore {
    async fn create_job_tracking(
        &self,
        run_id: &RunId,
        clients_total: u64,
    ) -> anyhow::Result<RunTrackingRecord> {
        let record = RunTrackingRecord {
            run_id: run_id.clone(),
            status: "running".to_string(),
            clients_total,
            clients_completed: 0,
            posts_examined: 0,
            posts_scored: 0,
            leads_skipped: 0,
            errors: 0,
            last_client: None,
            started_at: Utc::now(),
            completed_at: None,
            notes: None,
        };
        self.jobs.write().await.insert(run_id.0.clone(), record.clone());
        Ok(record)
    }

    async fn update_job(&self, run_id: &RunId, updates: JobUpdate) -> anyhow::Result<()> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(run_id.as_ref())
            .ok_or_else(|| anyhow::anyhow!("no tracking record for run `{}`", run_id))?;
        if let Some(v) = updates.clients_completed {
            record.clients_completed = v;
        }
        if let Some(v) = updates.posts_examined {
            record.posts_examined = v;
        }
        if let Some(v) = updates.posts_scored {
            record.posts_scored = v;
        }
        if let Some(v) = updates.leads_skipped {
            record.leads_skipped = v;
        }
        if let Some(v) = updates.errors {
            record.errors = v;
        }
        if let Some(v) = updates.last_client {
            record.last_client = Some(v);
        }
        Ok(())
    }

    async fn complete_job(&self, run_id: &RunId, status: &str, notes: Option<String>) -> anyhow::Result<()> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(run_id.as_ref())
            .ok_or_else(|| anyhow::anyhow!("no tracking record for run `{}`", run_id))?;
        record.status = status.to_string();
        record.notes = notes;
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn update_run_record(
        &self,
        client_run_id: &ClientRunId,
        client_id: &ClientId,
        updates: ClientRunRecordUpdate,
        create_if_missing: bool,
    ) -> anyhow::Result<()> {
        let mut client_runs = self.client_runs.write().await;
        let entry = client_runs.get_mut(client_run_id.as_ref());
        let record = match entry {
            Some(record) => record,
            None => {
                if !create_if_missing {
                    anyhow::bail!("no client-run record for `{}`", client_run_id);
                }
                client_runs.insert(
                    client_run_id.0.clone(),
                    ClientRunRecord {
                        client_run_id: client_run_id.clone(),
                        client_id: client_id.clone(),
                        posts_examined: 0,
                        posts_scored: 0,
                        post_scoring_tokens: 0,
                        errors: 0,
                        error_details: Vec::new(),
                        leads_skipped: 0,
                        status: ClientStatus::Success,
                    },
                );
                client_runs.get_mut(client_run_id.as_ref()).expect("just inserted")
            }
        };

        if let Some(v) = updates.posts_examined {
            record.posts_examined = v;
        }
        if let Some(v) = updates.posts_scored {
            record.posts_scored = v;
        }
        if let Some(v) = updates.post_scoring_tokens {
            record.post_scoring_tokens = v;
        }
        if let Some(v) = updates.errors {
            record.errors = v;
        }
        if let Some(v) = updates.error_details {
            record.error_details = v;
        }
        if let Some(v) = updates.leads_skipped {
            record.leads_skipped = v;
        }
        if let Some(v) = updates.status {
            record.status = v;
        }
        Ok(())
    }

    async fn complete_client_processing(
        &self,
        client_run_id: &ClientRunId,
        final_metrics: ClientRunRecord,
    ) -> anyhow::Result<()> {
        self.client_runs
            .write()
            .await
            .insert(client_run_id.0.clone(), final_metrics);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_update_job_tracking_roundtrips() {
        let store = InMemoryTrackingStore::new();
        let run_id = RunId("260726-120000".to_string());
        store.create_job_tracking(&run_id, 3).await.unwrap();
        store
            .update_job(
                &run_id,
                JobUpdate {
                    clients_completed: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let record = store.job(&run_id).await.unwrap();
        assert_eq!(record.clients_completed, 1);
        assert_eq!(record.clients_total, 3);
    }

    #[tokio::test]
    async fn complete_job_sets_status_and_timestamp() {
        let store = InMemoryTrackingStore::new();
        let run_id = RunId("260726-120000".to_string());
        store.create_job_tracking(&run_id, 1).await.unwrap();
        store
            .complete_job(&run_id, "completed_with_errors", Some("note".to_string()))
            .await
            .unwrap();
        let record = store.job(&run_id).await.unwrap();
        assert_eq!(record.status, "completed_with_errors");
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn update_run_record_creates_when_missing_and_flagged() {
        let store = InMemoryTrackingStore::new();
        let client_run_id = ClientRunId("260726-120000-acme".to_string());
        store
            .update_run_record(
                &client_run_id,
                &ClientId("acme".to_string()),
                ClientRunRecordUpdate {
                    posts_examined: Some(5),
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        let record = store.client_run(&client_run_id).await.unwrap();
        assert_eq!(record.posts_examined, 5);
    }

    #[tokio::test]
    async fn update_run_record_without_create_flag_errors_when_missing() {
        let store = InMemoryTrackingStore::new();
        let client_run_id = ClientRunId("260726-120000-acme".to_string());
        let err = store
            .update_run_record(&client_run_id, &ClientId("acme".to_string()), ClientRunRecordUpdate::default(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no client-run record"));
    }
}
