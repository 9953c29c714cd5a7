//! Reconcilers and the loop that drives them.

pub mod approval;
pub mod custom_run;
pub mod integration_config;
pub mod integration_job;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{Object, ObjectKey};
use crate::error::Result;
use crate::store::{ObjectStore, WatchEvent};

pub use approval::{decide_approval, ApprovalReconciler};
pub use custom_run::{ApprovalRunHandler, CustomRunReconciler, EmailRunHandler, KindHandler};
pub use integration_config::ConfigReconciler;
pub use integration_job::JobReconciler;

/// What to do with a key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    RequeueAfter(Duration),
}

/// Drives one object kind towards its desired state.
///
/// `reconcile` is level-triggered: it reads the current object and must be
/// safe to call any number of times. A missing object is not an error.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Object: Object;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action>;
}

/// De-duplicating queue of keys waiting to be reconciled.
#[derive(Clone)]
struct WorkQueue {
    queued: Arc<Mutex<HashSet<ObjectKey>>>,
    tx: mpsc::UnboundedSender<ObjectKey>,
}

impl WorkQueue {
    fn new() -> (Self, mpsc::UnboundedReceiver<ObjectKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                queued: Arc::new(Mutex::new(HashSet::new())),
                tx,
            },
            rx,
        )
    }

    fn add(&self, key: ObjectKey) {
        let inserted = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        if inserted {
            let _ = self.tx.send(key);
        }
    }

    fn add_after(&self, key: ObjectKey, delay: Duration, shutdown: CancellationToken) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    fn done(&self, key: &ObjectKey) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

type Forwarder = Box<dyn FnOnce(WorkQueue, CancellationToken) -> JoinHandle<()> + Send>;

/// Runs a [`Reconciler`] with a single worker.
///
/// Keys are fed from the primary watch stream, from watches on owned kinds
/// (mapped through `owner_references`), from a periodic full resync and from
/// requeues requested by the reconciler.
pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    store: Arc<dyn ObjectStore<R::Object>>,
    forwarders: Vec<Forwarder>,
    resync_period: Duration,
    error_backoff: Duration,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(
        reconciler: Arc<R>,
        store: Arc<dyn ObjectStore<R::Object>>,
        resync_period: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            reconciler,
            store,
            forwarders: Vec::new(),
            resync_period,
            error_backoff,
        }
    }

    /// Also reconciles the owner whenever an owned object of kind `T` changes.
    pub fn owns<T: Object>(mut self, store: Arc<dyn ObjectStore<T>>) -> Self {
        let events = store.watch();
        self.forwarders.push(Box::new(move |queue, shutdown| {
            tokio::spawn(forward(events, queue, shutdown, |obj: &T| {
                let meta = obj.meta();
                meta.owner_references
                    .iter()
                    .filter(|o| o.kind == R::Object::KIND)
                    .map(|o| ObjectKey::new(&meta.namespace, &o.name))
                    .collect()
            }))
        }));
        self
    }

    /// Reconciles until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let kind = R::Object::KIND;
        let (queue, mut rx) = WorkQueue::new();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(forward(
            self.store.watch(),
            queue.clone(),
            shutdown.clone(),
            |obj: &R::Object| vec![obj.key()],
        )));
        for forwarder in self.forwarders {
            tasks.push(forwarder(queue.clone(), shutdown.clone()));
        }
        tasks.push(tokio::spawn(resync(
            Arc::clone(&self.store),
            queue.clone(),
            self.resync_period,
            shutdown.clone(),
        )));

        info!("{} controller started", kind);
        loop {
            let key = tokio::select! {
                _ = shutdown.cancelled() => break,
                key = rx.recv() => match key {
                    Some(key) => key,
                    None => break,
                },
            };
            queue.done(&key);

            match self.reconciler.reconcile(&key).await {
                Ok(Action::Done) => {}
                Ok(Action::RequeueAfter(delay)) => {
                    debug!("Requeueing {} {} after {:?}", kind, key, delay);
                    queue.add_after(key, delay, shutdown.clone());
                }
                Err(e) => {
                    error!("Failed to reconcile {} {}: {}", kind, key, e);
                    queue.add_after(key, self.error_backoff, shutdown.clone());
                }
            }
        }

        for task in tasks {
            task.abort();
        }
        info!("{} controller stopped", kind);
    }
}

async fn forward<T, F>(
    mut events: broadcast::Receiver<WatchEvent<T>>,
    queue: WorkQueue,
    shutdown: CancellationToken,
    keys: F,
) where
    T: Object,
    F: Fn(&T) -> Vec<ObjectKey> + Send + 'static,
{
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                for key in keys(event.object()) {
                    queue.add(key);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Watch on {} lagged, {} events skipped", T::KIND, skipped);
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn resync<T: Object>(
    store: Arc<dyn ObjectStore<T>>,
    queue: WorkQueue,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        match store.list_all().await {
            Ok(objects) => {
                for obj in objects {
                    queue.add(obj.key());
                }
            }
            Err(e) => warn!("Failed to list {} for resync: {}", T::KIND, e),
        }
    }
}
