use super::{EditRequest, EditTransport, GenerationError, JobHandle, PollResponse};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
};
use tokio::time::Instant;

/// In-memory provider driven by per-prompt poll scripts. Unscripted prompts
/// are ready on the first poll. The last scripted response repeats. Sample
/// URLs containing `broken` fail to download; other downloads return the
/// URL's bytes. Prompts marked with `fail_poll` get a 502 on every poll.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: HashMap<String, Vec<PollResponse>>,
    rejected: HashSet<String>,
    broken_polls: HashSet<String>,
    jobs: Mutex<HashMap<String, (Vec<PollResponse>, usize)>>,
    submissions: Mutex<Vec<(EditRequest, Instant)>>,
    polls: AtomicU32,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(mut self, prompt: &str, responses: Vec<PollResponse>) -> Self {
        self.scripts.insert(prompt.to_string(), responses);
        self
    }

    pub(crate) fn reject(mut self, prompt: &str) -> Self {
        self.rejected.insert(prompt.to_string());
        self
    }

    /// Every poll request for `prompt` fails at the HTTP layer.
    pub(crate) fn fail_poll(mut self, prompt: &str) -> Self {
        self.broken_polls.insert(prompt.to_string());
        self
    }

    pub(crate) fn requests(&self) -> Vec<EditRequest> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }

    /// Prompt and clock reading of every submission, in submit order.
    pub(crate) fn submissions(&self) -> Vec<(String, Instant)> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|(request, at)| (request.prompt.clone(), *at))
            .collect()
    }

    pub(crate) fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EditTransport for ScriptedTransport {
    async fn submit(&self, request: &EditRequest) -> Result<JobHandle, GenerationError> {
        let job_number = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push((request.clone(), Instant::now()));
            submissions.len()
        };
        if self.rejected.contains(&request.prompt) {
            return Err(GenerationError::Submission("HTTP 429 Too Many Requests".into()));
        }

        let script = self.scripts.get(&request.prompt).cloned().unwrap_or_else(|| {
            let slug = request.prompt.replace(' ', "-");
            vec![PollResponse::ready(&format!("https://delivery.test/{slug}.png"))]
        });
        let host = if self.broken_polls.contains(&request.prompt) {
            "unreachable.test"
        } else {
            "api.test"
        };
        let polling_url = format!("https://{host}/v1/get_result?id=job-{job_number}");
        self.jobs
            .lock()
            .unwrap()
            .insert(polling_url.clone(), (script, 0));
        Ok(JobHandle {
            id: Some(format!("job-{job_number}")),
            polling_url,
        })
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollResponse, GenerationError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if handle.polling_url.contains("unreachable.test") {
            return Err(GenerationError::Transport("HTTP 502 Bad Gateway".into()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        let (script, cursor) = jobs
            .get_mut(&handle.polling_url)
            .ok_or_else(|| GenerationError::Transport("HTTP 404 Not Found".into()))?;
        let response = script
            .get((*cursor).min(script.len().saturating_sub(1)))
            .cloned()
            .unwrap_or_else(PollResponse::pending);
        *cursor += 1;
        Ok(response)
    }

    async fn download(&self, sample_url: &str) -> Result<Vec<u8>, GenerationError> {
        if sample_url.contains("broken") {
            return Err(GenerationError::Download("HTTP 403 Forbidden".into()));
        }
        Ok(sample_url.as_bytes().to_vec())
    }
}
