use crate::generation::{EditOptions, FailureKind, GenerationClient};
use crate::models::{Priority, PromptSpec};
use crate::storage::ArtifactStore;
use futures::future::join_all;
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedArtifact {
    pub prompt_index: usize,
    pub kind: String,
    pub description: String,
    pub prompt: String,
    pub priority: Option<Priority>,
    pub file_name: String,
    pub path: PathBuf,
    pub url: String,
    pub size_bytes: usize,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobFailure {
    pub prompt_index: usize,
    pub kind: String,
    pub prompt: String,
    pub error_kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    fn new(prompt_index: usize, spec: &PromptSpec, error_kind: FailureKind, message: String) -> Self {
        Self {
            prompt_index,
            kind: spec.kind.clone(),
            prompt: spec.prompt.clone(),
            error_kind,
            message,
        }
    }
}

pub type JobOutcome = Result<GeneratedArtifact, JobFailure>;

/// Outcome of one `run_batch` call, ordered by prompt index.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub requested: usize,
    pub succeeded: Vec<GeneratedArtifact>,
    pub failed: Vec<JobFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.succeeded.len() + self.failed.len() == self.requested
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub group_size: usize,
    pub pacing: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            group_size: 2,
            pacing: Duration::from_secs(2),
        }
    }
}

pub struct BatchOrchestrator {
    client: Arc<GenerationClient>,
    store: ArtifactStore,
    settings: BatchSettings,
    options: EditOptions,
}

impl BatchOrchestrator {
    pub fn new(
        client: Arc<GenerationClient>,
        store: ArtifactStore,
        settings: BatchSettings,
        options: EditOptions,
    ) -> Self {
        Self {
            client,
            store,
            settings,
            options,
        }
    }

    /// Run `prompts` against `source` in fixed-size groups. Jobs inside a
    /// group run concurrently; a group finishes completely before the pacing
    /// delay and the next group. Job failures land in the report.
    pub async fn run_batch(&self, source: &[u8], prompts: &[PromptSpec]) -> BatchReport {
        let mut report = BatchReport {
            requested: prompts.len(),
            ..BatchReport::default()
        };
        let group_size = self.settings.group_size.max(1);
        let groups = prompts.len().div_ceil(group_size);

        for (group, chunk) in prompts.chunks(group_size).enumerate() {
            let offset = group * group_size;
            let started = Instant::now();
            let outcomes = join_all(
                chunk
                    .iter()
                    .enumerate()
                    .map(|(i, spec)| self.run_job(source, offset + i, spec)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    Ok(artifact) => report.succeeded.push(artifact),
                    Err(failure) => report.failed.push(failure),
                }
            }
            info!(
                target = "snapsell.batch",
                group = group + 1,
                groups,
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "group settled"
            );

            if group + 1 < groups {
                sleep(self.settings.pacing).await;
            }
        }

        debug_assert!(report.is_complete());
        report
    }

    /// Generate and store one artifact.
    pub async fn run_job(&self, source: &[u8], prompt_index: usize, spec: &PromptSpec) -> JobOutcome {
        let bytes = match self
            .client
            .submit_edit(source, &spec.prompt, &self.options)
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    target = "snapsell.batch",
                    prompt_index,
                    kind = %spec.kind,
                    error = %err,
                    "generation job failed"
                );
                return Err(JobFailure::new(prompt_index, spec, err.kind(), err.to_string()));
            }
        };

        let stored = self
            .store
            .save(&spec.kind, self.options.output_format.extension(), &bytes)
            .await
            .map_err(|err| {
                warn!(target = "snapsell.batch", prompt_index, error = %err, "artifact write failed");
                JobFailure::new(prompt_index, spec, FailureKind::Storage, err.to_string())
            })?;

        Ok(GeneratedArtifact {
            prompt_index,
            kind: spec.kind.clone(),
            description: spec.description.clone(),
            prompt: spec.prompt.clone(),
            priority: spec.priority,
            file_name: stored.file_name,
            path: stored.path,
            url: stored.url,
            size_bytes: bytes.len(),
            bytes,
        })
    }
}
