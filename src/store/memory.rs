use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use tokio::sync::{broadcast, RwLock};

use super::{ObjectStore, StoreError, WatchEvent};
use crate::api::{Object, ObjectKey};

const WATCH_CAPACITY: usize = 1024;

struct Inner<T> {
    objects: BTreeMap<ObjectKey, T>,
    last_version: u64,
}

/// Process-local [`ObjectStore`] with finalizer-gated deletion.
pub struct MemoryStore<T: Object> {
    inner: RwLock<Inner<T>>,
    events: broadcast::Sender<WatchEvent<T>>,
}

impl<T: Object> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Object> MemoryStore<T> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                objects: BTreeMap::new(),
                last_version: 0,
            }),
            events,
        }
    }

    fn emit(&self, event: WatchEvent<T>) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn not_found(key: &ObjectKey) -> StoreError {
        StoreError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        }
    }
}

impl<T> Inner<T> {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }
}

#[async_trait]
impl<T: Object> ObjectStore<T> for MemoryStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<T, StoreError> {
        self.inner
            .read()
            .await
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<T>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .objects
            .values()
            .filter(|o| o.meta().namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.inner.read().await.objects.values().cloned().collect())
    }

    async fn create(&self, mut obj: T) -> Result<T, StoreError> {
        let key = obj.key();
        let mut inner = self.inner.write().await;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: T::KIND, key });
        }

        let version = inner.next_version();
        let meta = obj.meta_mut();
        meta.resource_version = version;
        meta.deletion_timestamp = None;
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Utc::now());
        }

        inner.objects.insert(key.clone(), obj.clone());
        drop(inner);

        debug!("Created {} {}", T::KIND, key);
        self.emit(WatchEvent::Added(obj.clone()));
        Ok(obj)
    }

    async fn patch(&self, mut obj: T) -> Result<T, StoreError> {
        let key = obj.key();
        let mut inner = self.inner.write().await;
        let current = inner.objects.get(&key).ok_or_else(|| Self::not_found(&key))?;

        if current.meta().resource_version != obj.meta().resource_version {
            return Err(StoreError::Conflict { kind: T::KIND, key });
        }

        // Timestamps are owned by the store
        let creation = current.meta().creation_timestamp;
        let deletion = current.meta().deletion_timestamp;
        let version = inner.next_version();
        let meta = obj.meta_mut();
        meta.resource_version = version;
        meta.creation_timestamp = creation;
        meta.deletion_timestamp = deletion;

        if deletion.is_some() && obj.meta().finalizers.is_empty() {
            inner.objects.remove(&key);
            drop(inner);
            debug!("Finalized and removed {} {}", T::KIND, key);
            self.emit(WatchEvent::Deleted(obj.clone()));
            return Ok(obj);
        }

        inner.objects.insert(key, obj.clone());
        drop(inner);

        self.emit(WatchEvent::Modified(obj.clone()));
        Ok(obj)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))?;

        if current.meta().finalizers.is_empty() {
            inner.objects.remove(key);
            drop(inner);
            debug!("Deleted {} {}", T::KIND, key);
            self.emit(WatchEvent::Deleted(current));
            return Ok(());
        }

        if current.meta().deletion_timestamp.is_some() {
            return Ok(());
        }

        let mut marked = current;
        let version = inner.next_version();
        let meta = marked.meta_mut();
        meta.resource_version = version;
        meta.deletion_timestamp = Some(Utc::now());
        inner.objects.insert(key.clone(), marked.clone());
        drop(inner);

        debug!("Marked {} {} for deletion", T::KIND, key);
        self.emit(WatchEvent::Modified(marked));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }
}
