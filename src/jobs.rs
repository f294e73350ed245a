use crate::portfolio::{PortfolioAssembler, PortfolioRequest, PortfolioResult};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("job worker is not running")]
pub struct QueueClosed;

/// Background portfolio builds, processed one at a time by a single worker.
/// Settled jobs are forgotten `ttl` after they finish.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, Entry>>>,
    ttl: Duration,
}

struct Entry {
    status: JobStatus,
    settled_at: Option<Instant>,
}

impl Entry {
    fn pending(status: JobStatus) -> Self {
        Self {
            status,
            settled_at: None,
        }
    }
}

struct Job {
    id: Uuid,
    request: PortfolioRequest,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed { result: Box<PortfolioResult> },
    Failed { error: String, stage: Option<String> },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobQueue {
    pub fn spawn(
        assembler: Arc<PortfolioAssembler>,
        capacity: usize,
        ttl: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                statuses_bg
                    .lock()
                    .await
                    .insert(job.id, Entry::pending(JobStatus::Running));
                info!(target = "snapsell.jobs", job_id = %job.id, "job started");

                let status = match assembler.build_portfolio(job.request).await {
                    Ok(result) => JobStatus::Completed {
                        result: Box::new(result.release_bytes()),
                    },
                    Err(err) => {
                        warn!(target = "snapsell.jobs", job_id = %job.id, error = %err, "job failed");
                        JobStatus::Failed {
                            error: err.to_string(),
                            stage: Some(err.stage().to_string()),
                        }
                    }
                };
                let entry = Entry {
                    status,
                    settled_at: Some(Instant::now()),
                };
                statuses_bg.lock().await.insert(job.id, entry);
            }
        });

        (Self { tx, statuses, ttl }, handle)
    }

    pub async fn enqueue(&self, request: PortfolioRequest) -> Result<Uuid, QueueClosed> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            evict_expired(&mut guard, self.ttl);
            guard.insert(id, Entry::pending(JobStatus::Queued));
        }
        if self.tx.send(Job { id, request }).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(QueueClosed);
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let mut guard = self.statuses.lock().await;
        evict_expired(&mut guard, self.ttl);
        guard.get(&id).map(|entry| JobInfo {
            id: id.to_string(),
            status: entry.status.clone(),
        })
    }
}

fn evict_expired(statuses: &mut HashMap<Uuid, Entry>, ttl: Duration) {
    let before = statuses.len();
    statuses.retain(|_, entry| {
        entry
            .settled_at
            .is_none_or(|settled| settled.elapsed() < ttl)
    });
    let evicted = before - statuses.len();
    if evicted > 0 {
        debug!(target = "snapsell.jobs", evicted, "expired jobs evicted");
    }
}
