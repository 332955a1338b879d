use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use postscore_types::{Client, Lead};

/// Parameters for a `select` call against the tenant store (§6).
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub fields: Option<Vec<String>>,
    pub view: Option<String>,
    pub formula: Option<String>,
    pub max_records: Option<usize>,
}

/// Distinguishable adapter-boundary failures. Callers (the Lead Selector's
/// formula fallback, the Lead Processor's tolerant-update retry) match on
/// variants rather than parsing message strings (§10.2).
#[derive(Debug, Clone)]
pub enum TenantStoreError {
    UnknownField { table: String, field: String },
    ViewNotFound { table: String, view: String },
    NotFound { table: String, id: String },
    Other(String),
}

impl fmt::Display for TenantStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantStoreError::UnknownField { table, field } => {
                write!(f, "unknown field `{field}` on table `{table}`")
            }
            TenantStoreError::ViewNotFound { table, view } => {
                write!(f, "view `{view}` not found on table `{table}`")
            }
            TenantStoreError::NotFound { table, id } => {
                write!(f, "record `{id}` not found in table `{table}`")
            }
            TenantStoreError::Other(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for TenantStoreError {}

/// The tenant datastore adapter (§6): `open` is implicit in construction
/// (each client's handle is a distinct adapter instance, per §5's "Shared
/// resources" note), so only `select`/`find`/`update` are modeled here.
#[async_trait]
pub trait TenantStoreAdapter: Send + Sync {
    async fn select(&self, table: &str, query: SelectQuery) -> Result<Vec<Lead>, TenantStoreError>;
    async fn find(&self, table: &str, id: &str) -> Result<Lead, TenantStoreError>;
    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Lead, TenantStoreError>;
}

/// Opens a per-client store handle (§6 `open(clientId)`). Kept separate from
/// [`TenantStoreAdapter`] since a handle's lifetime spans one client run
/// while the adapter trait only describes what you can do once open.
#[async_trait]
pub trait TenantStoreFactory: Send + Sync {
    async fn open(&self, client: &Client) -> anyhow::Result<Arc<dyn TenantStoreAdapter>>;
}

#[derive(Debug, Clone, Default)]
struct TableState {
    leads: HashMap<String, Lead>,
    /// insertion order, since `HashMap` iteration order is not the store's
    /// `select` ordering contract.
    order: Vec<String>,
    views: HashMap<String, Vec<String>>,
    known_fields: Option<HashSet<String>>,
}

/// A reference implementation of [`TenantStoreAdapter`] backed by an
/// in-process map, for tests and the demonstration binary (§10.4). Views
/// are pre-registered lead-id lists; a `formula` query is treated as "scan
/// the whole table" since the production formula grammar is
/// implementation-specific and out of scope here.
#[derive(Clone, Default)]
pub struct InMemoryTenantStore {
    tables: Arc<RwLock<HashMap<String, TableState>>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_lead(&self, table: &str, lead: Lead) {
        let mut tables = self.tables.write().await;
        let state = tables.entry(table.to_string()).or_default();
        if !state.leads.contains_key(&lead.id) {
            state.order.push(lead.id.clone());
        }
        state.leads.insert(lead.id.clone(), lead);
    }

    pub async fn register_view(&self, table: &str, view: &str, lead_ids: Vec<String>) {
        let mut tables = self.tables.write().await;
        let state = tables.entry(table.to_string()).or_default();
        state.views.insert(view.to_string(), lead_ids);
    }

    /// Restricts `update` on this table to a known field set, so unknown
    /// field names surface [`TenantStoreError::UnknownField`] instead of
    /// silently succeeding.
    pub async fn restrict_known_fields(&self, table: &str, fields: impl IntoIterator<Item = String>) {
        let mut tables = self.tables.write().await;
        let state = tables.entry(table.to_string()).or_default();
        state.known_fields = Some(fields.into_iter().collect());
    }

    pub async fn get(&self, table: &str, id: &str) -> Option<Lead> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|s| s.leads.get(id))
            .cloned()
    }
}

#[async_trait]
impl TenantStoreAdapter for InMemoryTenantStore {
    async fn select(&self, table: &str, query: SelectQuery) -> Result<Vec<Lead>, TenantStoreError> {
        let tables = self.tables.read().await;
        let Some(state) = tables.get(table) else {
            return Ok(Vec::new());
        };

        if let Some(known) = &state.known_fields {
            for field in query.fields.iter().flatten() {
                if !known.contains(field) {
                    return Err(TenantStoreError::UnknownField {
                        table: table.to_string(),
                        field: field.clone(),
                    });
                }
            }
        }

        let ids: Vec<String> = if let Some(view) = &query.view {
            match state.views.get(view) {
                Some(ids) => ids.clone(),
                None => {
                    return Err(TenantStoreError::ViewNotFound {
                        table: table.to_string(),
                        view: view.clone(),
                    })
                }
            }
        } else {
            state.order.clone()
        };

        let mut leads: Vec<Lead> = ids
            .into_iter()
            .filter_map(|id| state.leads.get(&id).cloned())
            .collect();

        if let Some(max) = query.max_records {
            leads.truncate(max);
        }

        Ok(leads)
    }

    async fn find(&self, table: &str, id: &str) -> Result<Lead, TenantStoreError> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .and_then(|s| s.leads.get(id))
            .cloned()
            .ok_or_else(|| TenantStoreError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Lead, TenantStoreError> {
        let mut tables = self.tables.write().await;
        let state = tables
            .get_mut(table)
            .ok_or_else(|| TenantStoreError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;

        if let Some(known) = &state.known_fields {
            for field in fields.keys() {
                if !known.contains(field) {
                    return Err(TenantStoreError::UnknownField {
                        table: table.to_string(),
                        field: field.clone(),
                    });
                }
            }
        }

        let lead = state
            .leads
            .get_mut(id)
            .ok_or_else(|| TenantStoreError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;

        for (key, value) in fields {
            lead.fields.insert(key, value);
        }

        Ok(lead.clone())
    }
}

/// A reference [`TenantStoreFactory`] that hands out one [`InMemoryTenantStore`]
/// per distinct `datastore_handle`, for tests and the demonstration binary
/// (§10.4).
#[derive(Clone, Default)]
pub struct InMemoryTenantStoreFactory {
    stores: Arc<RwLock<HashMap<String, InMemoryTenantStore>>>,
}

impl InMemoryTenantStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store_for(&self, handle: &str) -> InMemoryTenantStore {
        let mut stores = self.stores.write().await;
        stores.entry(handle.to_string()).or_default().clone()
    }
}

#[async_trait]
impl TenantStoreFactory for InMemoryTenantStoreFactory {
    async fn open(&self, client: &Client) -> anyhow::Result<Arc<dyn TenantStoreAdapter>> {
        let store = self.store_for(&client.datastore_handle).await;
        Ok(Arc::new(store))
    }
}
