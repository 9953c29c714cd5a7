//! Object store contract and an in-memory implementation.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::api::{
    Approval, CustomRun, IntegrationConfig, IntegrationJob, Object, ObjectKey, PipelineRun, Role,
    RoleBinding, Secret, ServiceAccount,
};

pub use memory::MemoryStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    #[error("conflict writing {kind} {key}: the object has been modified")]
    Conflict { kind: &'static str, key: ObjectKey },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// Storage for one kind of object.
///
/// `patch` replaces the whole object and fails with
/// [`StoreError::Conflict`] when the caller's `resource_version` is stale.
#[async_trait]
pub trait ObjectStore<T: Object>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<T, StoreError>;

    async fn list(&self, namespace: &str) -> Result<Vec<T>, StoreError>;

    async fn list_all(&self) -> Result<Vec<T>, StoreError>;

    async fn create(&self, obj: T) -> Result<T, StoreError>;

    async fn patch(&self, obj: T) -> Result<T, StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>>;

    /// `get` that maps not-found to `None`.
    async fn find(&self, key: &ObjectKey) -> Result<Option<T>, StoreError> {
        match self.get(key).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// One store handle per object kind.
#[derive(Clone)]
pub struct Client {
    pub configs: Arc<dyn ObjectStore<IntegrationConfig>>,
    pub jobs: Arc<dyn ObjectStore<IntegrationJob>>,
    pub approvals: Arc<dyn ObjectStore<Approval>>,
    pub pipeline_runs: Arc<dyn ObjectStore<PipelineRun>>,
    pub custom_runs: Arc<dyn ObjectStore<CustomRun>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub service_accounts: Arc<dyn ObjectStore<ServiceAccount>>,
    pub roles: Arc<dyn ObjectStore<Role>>,
    pub role_bindings: Arc<dyn ObjectStore<RoleBinding>>,
}

impl Client {
    pub fn in_memory() -> Self {
        Self {
            configs: Arc::new(MemoryStore::new()),
            jobs: Arc::new(MemoryStore::new()),
            approvals: Arc::new(MemoryStore::new()),
            pipeline_runs: Arc::new(MemoryStore::new()),
            custom_runs: Arc::new(MemoryStore::new()),
            secrets: Arc::new(MemoryStore::new()),
            service_accounts: Arc::new(MemoryStore::new()),
            roles: Arc::new(MemoryStore::new()),
            role_bindings: Arc::new(MemoryStore::new()),
        }
    }
}
