use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use tokio::sync::mpsc;

use crate::api::{IntegrationJob, JobState};
use crate::structs::{CompareFn, Item, ListView, SortedUniqueList};

/// Pool entry holding an owned snapshot of a job.
#[derive(Debug, Clone)]
pub struct JobNode {
    job: IntegrationJob,
}

impl JobNode {
    pub fn new(job: IntegrationJob) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &IntegrationJob {
        &self.job
    }

    pub fn id(&self) -> String {
        self.job.ns_name()
    }
}

impl Item for JobNode {
    fn equals(&self, other: &Self) -> bool {
        self.job.metadata.namespace == other.job.metadata.namespace
            && self.job.metadata.name == other.job.metadata.name
    }
}

/// Pending and running jobs, kept in sync with job snapshots.
///
/// Every change that can free or claim capacity sends a non-blocking signal
/// on the scheduling channel; a full channel means a pass is already due.
pub struct JobPool {
    index: Mutex<HashMap<String, JobNode>>,
    pending: SortedUniqueList<JobNode>,
    running: SortedUniqueList<JobNode>,
    signal: mpsc::Sender<()>,
}

impl JobPool {
    pub fn new(signal: mpsc::Sender<()>, compare: CompareFn<JobNode>) -> Self {
        Self {
            index: Mutex::new(HashMap::new()),
            pending: SortedUniqueList::new(Some(compare)),
            running: SortedUniqueList::new(None),
            signal,
        }
    }

    fn index(&self) -> MutexGuard<'_, HashMap<String, JobNode>> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending(&self) -> ListView<'_, JobNode> {
        ListView::new(&self.pending)
    }

    pub fn running(&self) -> ListView<'_, JobNode> {
        ListView::new(&self.running)
    }

    /// Latest snapshot seen for `id` (`namespace_name`).
    pub fn snapshot(&self, id: &str) -> Option<IntegrationJob> {
        self.index().get(id).map(|n| n.job.clone())
    }

    /// Requests a scheduling pass without blocking.
    pub fn send_schedule(&self) {
        // Full means a pass is already queued; closed means the scheduler is gone
        let _ = self.signal.try_send(());
    }

    /// Applies a job snapshot to the pool.
    pub fn sync_job(&self, job: &IntegrationJob) {
        let Some(new_state) = job.status.state else {
            return;
        };

        let id = job.ns_name();
        let node = JobNode::new(job.clone());

        // The index lock serializes whole transitions across both lists
        let mut index = self.index();

        if job.metadata.deletion_timestamp.is_some() {
            self.pending.delete(&node);
            self.running.delete(&node);
            index.remove(&id);
            drop(index);
            debug!("Evicted deleted job {} from pool", id);
            self.send_schedule();
            return;
        }

        let Some(old_state) = index.get(&id).and_then(|n| n.job.status.state) else {
            match new_state {
                JobState::Pending => {
                    self.pending.add(node.clone());
                }
                JobState::Running => {
                    self.running.add(node.clone());
                }
                JobState::Completed | JobState::Failed => return,
            }
            index.insert(id, node);
            drop(index);
            self.send_schedule();
            return;
        };

        if old_state == new_state {
            index.insert(id, node);
            return;
        }

        match old_state {
            JobState::Pending => {
                self.pending.delete(&node);
                if new_state == JobState::Running {
                    self.running.add(node.clone());
                    index.insert(id, node);
                } else {
                    index.remove(&id);
                }
            }
            JobState::Running => {
                self.running.delete(&node);
                if new_state == JobState::Pending {
                    self.pending.add(node.clone());
                    index.insert(id, node);
                } else {
                    index.remove(&id);
                }
                drop(index);
                self.send_schedule();
            }
            JobState::Completed | JobState::Failed => {
                index.remove(&id);
            }
        }
    }
}
