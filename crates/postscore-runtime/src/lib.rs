//! External-collaborator traits (§6) and in-memory reference
//! implementations of each, used by the crate's own tests and exported for
//! downstream integration tests (§10.4).

pub mod stack_trace_store;
pub mod tenant_registry;
pub mod tenant_store;
pub mod tracking_store;

pub use stack_trace_store::{InMemoryStackTraceStore, StackTraceRecord, StackTraceStore};
pub use tenant_registry::{ExecutionLogRecord, InMemoryTenantRegistry, JobStatusEntry, TenantRegistry};
pub use tenant_store::{
    InMemoryTenantStore, InMemoryTenantStoreFactory, SelectQuery, TenantStoreAdapter,
    TenantStoreError, TenantStoreFactory,
};
pub use tracking_store::{
    ClientRunRecordUpdate, InMemoryTrackingStore, JobUpdate, TrackingStoreAdapter,
};
