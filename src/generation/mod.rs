pub mod flux;
pub mod state;

#[cfg(test)]
pub(crate) mod fake;

pub use flux::{FluxConfig, FluxTransport};
pub use state::{JobState, PollResponse, advance};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, trace};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("submission rejected: {0}")]
    Submission(String),
    #[error("unknown status: {0}")]
    UnknownStatus(String),
    #[error("image generation failed: {0}")]
    Failed(String),
    #[error("polling timed out after {0} attempts")]
    TimedOut(u32),
    #[error("poll request failed: {0}")]
    Transport(String),
    #[error("download failed: {0}")]
    Download(String),
}

impl GenerationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GenerationError::Submission(_) => FailureKind::Submission,
            GenerationError::UnknownStatus(_) => FailureKind::UnknownStatus,
            GenerationError::Failed(_) => FailureKind::Failed,
            GenerationError::TimedOut(_) => FailureKind::TimedOut,
            GenerationError::Transport(_) => FailureKind::Transport,
            GenerationError::Download(_) => FailureKind::Download,
        }
    }
}

/// Why a single job produced no artifact.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Submission,
    UnknownStatus,
    Failed,
    TimedOut,
    Transport,
    Download,
    Storage,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EditOptions {
    pub aspect_ratio: String,
    pub output_format: OutputFormat,
    pub safety_tolerance: u8,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: "1:1".into(),
            output_format: OutputFormat::Png,
            safety_tolerance: 2,
        }
    }
}

/// Wire payload for an image-edit submission.
#[derive(Debug, Clone, Serialize)]
pub struct EditRequest {
    pub prompt: String,
    pub input_image: String,
    pub aspect_ratio: String,
    pub output_format: OutputFormat,
    pub safety_tolerance: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: Option<String>,
    pub polling_url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 60,
        }
    }
}

/// Network seam of the generation provider: submit, poll, fetch result.
#[async_trait]
pub trait EditTransport: Send + Sync {
    async fn submit(&self, request: &EditRequest) -> Result<JobHandle, GenerationError>;
    async fn poll(&self, handle: &JobHandle) -> Result<PollResponse, GenerationError>;
    async fn download(&self, sample_url: &str) -> Result<Vec<u8>, GenerationError>;
}

pub struct GenerationClient {
    transport: Arc<dyn EditTransport>,
    policy: PollPolicy,
}

impl GenerationClient {
    pub fn new(transport: Arc<dyn EditTransport>, policy: PollPolicy) -> Self {
        Self { transport, policy }
    }

    /// Run one edit job end to end. Every call creates a fresh remote job;
    /// identical inputs may come back with different images.
    pub async fn submit_edit(
        &self,
        image: &[u8],
        prompt: &str,
        options: &EditOptions,
    ) -> Result<Vec<u8>, GenerationError> {
        let request = EditRequest {
            prompt: prompt.to_string(),
            input_image: BASE64.encode(image),
            aspect_ratio: options.aspect_ratio.clone(),
            output_format: options.output_format,
            safety_tolerance: options.safety_tolerance,
        };

        let handle = self.transport.submit(&request).await?;
        debug!(
            target = "snapsell.flux",
            job_id = handle.id.as_deref().unwrap_or("-"),
            polling_url = %handle.polling_url,
            "edit submitted"
        );

        let sample = self.await_result(&handle).await?;
        let bytes = self.transport.download(&sample).await?;
        debug!(
            target = "snapsell.flux",
            job_id = handle.id.as_deref().unwrap_or("-"),
            size_bytes = bytes.len(),
            "result downloaded"
        );
        Ok(bytes)
    }

    /// Poll `handle` until the job settles and return its sample URL.
    pub async fn await_result(&self, handle: &JobHandle) -> Result<String, GenerationError> {
        let mut state = JobState::Submitted;
        loop {
            let response = self.transport.poll(handle).await?;
            state = advance(state, &response, self.policy.max_attempts);
            trace!(
                target = "snapsell.flux",
                attempt = state.attempts(),
                status = %response.status,
                "poll"
            );
            if let Some(outcome) = state.outcome() {
                crate::metrics::job_outcome(state.label(), state.attempts());
                return outcome;
            }
            sleep(self.policy.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::ScriptedTransport;
    use super::*;

    fn client(transport: Arc<ScriptedTransport>) -> GenerationClient {
        GenerationClient::new(transport, PollPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn pending_then_ready_downloads_result() {
        let transport = Arc::new(ScriptedTransport::new().script(
            "studio",
            vec![
                PollResponse::pending(),
                PollResponse::pending(),
                PollResponse::ready("https://delivery.test/final.png"),
            ],
        ));
        let bytes = client(transport.clone())
            .submit_edit(b"source", "studio", &EditOptions::default())
            .await
            .expect("job succeeds");
        assert_eq!(bytes, b"https://delivery.test/final.png");
        assert_eq!(transport.poll_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_settling_job_times_out_after_sixty_polls() {
        let transport =
            Arc::new(ScriptedTransport::new().script("slow", vec![PollResponse::pending()]));
        let err = client(transport.clone())
            .submit_edit(b"source", "slow", &EditOptions::default())
            .await
            .expect_err("must time out");
        assert_eq!(err, GenerationError::TimedOut(60));
        assert_eq!(err.kind(), FailureKind::TimedOut);
        assert_eq!(transport.poll_count(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_stops_polling_immediately() {
        let transport = Arc::new(ScriptedTransport::new().script(
            "odd",
            vec![
                PollResponse::with_status("Request Moderated"),
                PollResponse::ready("https://delivery.test/never.png"),
            ],
        ));
        let err = client(transport.clone())
            .submit_edit(b"source", "odd", &EditOptions::default())
            .await
            .expect_err("unknown status is fatal");
        assert_eq!(err, GenerationError::UnknownStatus("Request Moderated".into()));
        assert_eq!(transport.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_is_never_polled() {
        let transport = Arc::new(ScriptedTransport::new().reject("bad"));
        let err = client(transport.clone())
            .submit_edit(b"source", "bad", &EditOptions::default())
            .await
            .expect_err("rejected");
        assert_eq!(err.kind(), FailureKind::Submission);
        assert_eq!(transport.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn download_failure_is_distinct_from_generation_failure() {
        let transport = Arc::new(ScriptedTransport::new().script(
            "expired",
            vec![PollResponse::ready("https://delivery.test/broken.png")],
        ));
        let err = client(transport)
            .submit_edit(b"source", "expired", &EditOptions::default())
            .await
            .expect_err("download fails");
        assert_eq!(err.kind(), FailureKind::Download);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_http_failure_ends_the_job_as_transport() {
        let transport = Arc::new(ScriptedTransport::new().fail_poll("flaky"));
        let err = client(transport.clone())
            .submit_edit(b"source", "flaky", &EditOptions::default())
            .await
            .expect_err("poll fails");
        assert_eq!(err.kind(), FailureKind::Transport);
        assert!(matches!(err, GenerationError::Transport(msg) if msg.contains("502")));
        assert_eq!(transport.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_carries_base64_image_and_options() {
        let transport = Arc::new(ScriptedTransport::new());
        let options = EditOptions {
            aspect_ratio: "4:3".into(),
            output_format: OutputFormat::Jpeg,
            safety_tolerance: 4,
        };
        client(transport.clone())
            .submit_edit(b"abc", "plain", &options)
            .await
            .expect("job succeeds");
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].input_image, "YWJj");
        assert_eq!(requests[0].aspect_ratio, "4:3");
        assert_eq!(requests[0].output_format, OutputFormat::Jpeg);
        assert_eq!(requests[0].safety_tolerance, 4);
    }
}
