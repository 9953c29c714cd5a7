//! Deletes finished jobs once they outlive their TTL.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::api::Object;
use crate::error::Result;
use crate::store::Client;

pub struct JobCollector {
    client: Client,
    ttl: chrono::Duration,
}

impl JobCollector {
    pub fn new(client: Client, ttl: chrono::Duration) -> Self {
        Self { client, ttl }
    }

    /// Collects every `period` until cancelled.
    pub async fn run(self, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.collect(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => info!("Garbage collected {} jobs", n),
                Err(e) => warn!("Job garbage collection failed: {}", e),
            }
        }
        debug!("Job collector stopped");
    }

    /// Deletes jobs completed more than the TTL before `now`. Returns how
    /// many were deleted.
    pub async fn collect(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut deleted = 0;
        for job in self.client.jobs.list_all().await? {
            let expired = job
                .status
                .completion_time
                .is_some_and(|done| done + self.ttl < now);
            if !expired || job.metadata.deletion_timestamp.is_some() {
                continue;
            }

            match self.client.jobs.delete(&job.key()).await {
                Ok(()) => {
                    debug!("Deleted expired job {}", job.key());
                    deleted += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(deleted)
    }
}
