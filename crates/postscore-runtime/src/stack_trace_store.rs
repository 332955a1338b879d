use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use postscore_types::{ClientId, RunId};

/// An archived stack trace, keyed by a microsecond-precision timestamp
/// (§6). Archival failures must never propagate (§4.11), so callers treat
/// `save`'s `Result` as best-effort and swallow errors at the call site.
#[derive(Debug, Clone)]
pub struct StackTraceRecord {
    pub timestamp: String,
    pub run_id: Option<RunId>,
    pub client_id: Option<ClientId>,
    pub error_message: String,
    pub stack_trace: String,
}

#[async_trait]
pub trait StackTraceStore: Send + Sync {
    async fn save(&self, record: StackTraceRecord) -> anyhow::Result<String>;
    async fn lookup(&self, timestamp: &str) -> anyhow::Result<Option<StackTraceRecord>>;
}

/// A reference implementation backed by an in-process map, for tests and
/// the demonstration binary (§10.4). Timestamps combine a UTC instant with
/// a monotonic counter so rapid archival calls within the same microsecond
/// still produce distinct keys.
#[derive(Clone, Default)]
pub struct InMemoryStackTraceStore {
    records: Arc<RwLock<HashMap<String, StackTraceRecord>>>,
    sequence: Arc<AtomicI64>,
}

impl InMemoryStackTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_timestamp(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}{:09}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.9f"), seq)
    }
}

#[async_trait]
impl StackTraceStore for InMemoryStackTraceStore {
    async fn save(&self, record: StackTraceRecord) -> anyhow::Result<String> {
        let timestamp = record.timestamp.clone();
        self.records.write().await.insert(timestamp.clone(), record);
        Ok(timestamp)
    }

    async fn lookup(&self, timestamp: &str) -> anyhow::Result<Option<StackTraceRecord>> {
        Ok(self.records.read().await.get(timestamp).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_lookup_roundtrips() {
        let store = InMemoryStackTraceStore::new();
        let ts = store.next_timestamp();
        store
            .save(StackTraceRecord {
                timestamp: ts.clone(),
                run_id: Some(RunId("260726-120000".to_string())),
                client_id: Some(ClientId("acme".to_string())),
                error_message: "boom".to_string(),
                stack_trace: "at foo\nat bar".to_string(),
            })
            .await
            .unwrap();

        let found = store.lookup(&ts).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().error_message, "boom");
    }

    #[tokio::test]
    async fn lookup_missing_timestamp_returns_none() {
        let store = InMemoryStackTraceStore::new();
        assert!(store.lookup("nonexistent").await.unwrap().is_none());
    }

    #[test]
    fn successive_timestamps_are_distinct() {
        let store = InMemoryStackTraceStore::new();
        let a = store.next_timestamp();
        let b = store.next_timestamp();
        assert_ne!(a, b);
    }
}
