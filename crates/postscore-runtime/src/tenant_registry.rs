use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use postscore_types::{Client, ClientId};

/// One execution-log entry recorded against a client, per `logExecution`
/// (§6). Kept as a small record rather than a free-form JSON blob so tests
/// can assert on it directly.
#[derive(Debug, Clone)]
pub struct ExecutionLogRecord {
    pub run_id: String,
    pub status: String,
    pub notes: Option<String>,
}

/// The tenant registry collaborator (§6): enumerates active clients and
/// records per-client execution/job-status bookkeeping. Loaded once per run
/// by the Run Orchestrator; never mutated by the core (§3 `Client`
/// lifecycle note).
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    async fn list_active_clients(&self, filter: Option<&str>) -> anyhow::Result<Vec<Client>>;
    async fn log_execution(&self, client_id: &ClientId, record: ExecutionLogRecord) -> anyhow::Result<()>;
    async fn set_job_status(
        &self,
        client_id: &ClientId,
        job_type: &str,
        state: &str,
        id_or_reason: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct JobStatusEntry {
    pub job_type: String,
    pub state: String,
    pub id_or_reason: String,
}

/// A reference implementation of [`TenantRegistry`] backed by an in-process
/// `Vec`/log, for tests and the demonstration binary (§10.4).
#[derive(Clone, Default)]
pub struct InMemoryTenantRegistry {
    clients: Arc<RwLock<Vec<Client>>>,
    execution_log: Arc<RwLock<Vec<(ClientId, ExecutionLogRecord)>>>,
    job_status: Arc<RwLock<Vec<(ClientId, JobStatusEntry)>>>,
}

impl InMemoryTenantRegistry {
    pub fn new(clients: Vec<Client>) -> Self {
        Self {
            clients: Arc::new(RwLock::new(clients)),
            execution_log: Arc::new(RwLock::new(Vec::new())),
            job_status: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn execution_log(&self) -> Vec<(ClientId, ExecutionLogRecord)> {
        self.execution_log.read().await.clone()
    }

    pub async fn job_status(&self) -> Vec<(ClientId, JobStatusEntry)> {
        self.job_status.read().await.clone()
    }
}

#[async_trait]
impl TenantRegistry for InMemoryTenantRegistry {
    async fn list_active_clients(&self, filter: Option<&str>) -> anyhow::Result<Vec<Client>> {
        let clients = self.clients.read().await;
        let filtered = clients
            .iter()
            .filter(|c| c.active)
            .filter(|c| match filter {
                Some(f) => c.client_id.0 == f,
                None => true,
            })
            .cloned()
            .collect();
        Ok(filtered)
    }

    async fn log_execution(&self, client_id: &ClientId, record: ExecutionLogRecord) -> anyhow::Result<()> {
        self.execution_log.write().await.push((client_id.clone(), record));
        Ok(())
    }

    async fn set_job_status(
        &self,
        client_id: &ClientId,
        job_type: &str,
        state: &str,
        id_or_reason: &str,
    ) -> anyhow::Result<()> {
        self.job_status.write().await.push((
            client_id.clone(),
            JobStatusEntry {
                job_type: job_type.to_string(),
                state: state.to_string(),
                id_or_reason: id_or_reason.to_string(),
            },
        ));
        Ok(())
    }
}
