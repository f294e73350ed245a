use super::GenerationError;
use serde::Deserialize;

/// Body of a polling request against the provider.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PollResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: Option<PollResult>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PollResult {
    #[serde(default)]
    pub sample: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Processing,
    Ready,
    Failed,
    Unknown(String),
}

impl PollStatus {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "Pending" => PollStatus::Pending,
            "Processing" => PollStatus::Processing,
            "Ready" => PollStatus::Ready,
            "Failed" => PollStatus::Failed,
            other => PollStatus::Unknown(other.to_string()),
        }
    }
}

/// Lifecycle of one remote edit job. `attempts` counts poll requests made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Polling { attempts: u32 },
    Ready { sample: String, attempts: u32 },
    Failed { message: String, attempts: u32 },
    TimedOut { attempts: u32 },
    UnknownStatus { status: String, attempts: u32 },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Submitted | JobState::Polling { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            JobState::Submitted => 0,
            JobState::Polling { attempts }
            | JobState::Ready { attempts, .. }
            | JobState::Failed { attempts, .. }
            | JobState::TimedOut { attempts }
            | JobState::UnknownStatus { attempts, .. } => *attempts,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::Polling { .. } => "polling",
            JobState::Ready { .. } => "ready",
            JobState::Failed { .. } => "failed",
            JobState::TimedOut { .. } => "timed_out",
            JobState::UnknownStatus { .. } => "unknown_status",
        }
    }

    /// Sample URL or the error a terminal state stands for; `None` while
    /// the job is still in flight.
    pub fn outcome(&self) -> Option<Result<String, GenerationError>> {
        match self {
            JobState::Submitted | JobState::Polling { .. } => None,
            JobState::Ready { sample, .. } => Some(Ok(sample.clone())),
            JobState::Failed { message, .. } => Some(Err(GenerationError::Failed(message.clone()))),
            JobState::TimedOut { attempts } => Some(Err(GenerationError::TimedOut(*attempts))),
            JobState::UnknownStatus { status, .. } => {
                Some(Err(GenerationError::UnknownStatus(status.clone())))
            }
        }
    }
}

/// Fold one poll response into the job state. Terminal states absorb
/// further responses unchanged. Unrecognised status tags end the job.
pub fn advance(state: JobState, response: &PollResponse, max_attempts: u32) -> JobState {
    if state.is_terminal() {
        return state;
    }
    let attempts = state.attempts() + 1;

    match PollStatus::parse(&response.status) {
        PollStatus::Ready => match response.result.as_ref().and_then(|r| r.sample.clone()) {
            Some(sample) if !sample.trim().is_empty() => JobState::Ready { sample, attempts },
            _ => JobState::Failed {
                message: "no sample url in completed result".into(),
                attempts,
            },
        },
        PollStatus::Failed => JobState::Failed {
            message: response
                .error
                .clone()
                .unwrap_or_else(|| "Unknown error".into()),
            attempts,
        },
        PollStatus::Pending | PollStatus::Processing if attempts >= max_attempts => {
            JobState::TimedOut { attempts }
        }
        PollStatus::Pending | PollStatus::Processing => JobState::Polling { attempts },
        PollStatus::Unknown(status) => JobState::UnknownStatus { status, attempts },
    }
}

#[cfg(test)]
impl PollResponse {
    pub(crate) fn with_status(status: &str) -> Self {
        Self {
            id: None,
            status: status.to_string(),
            result: None,
            error: None,
        }
    }

    pub(crate) fn pending() -> Self {
        Self::with_status("Pending")
    }

    pub(crate) fn ready(sample: &str) -> Self {
        Self {
            result: Some(PollResult {
                sample: Some(sample.to_string()),
            }),
            ..Self::with_status("Ready")
        }
    }

    pub(crate) fn failed(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::with_status("Failed")
        }
    }
}
