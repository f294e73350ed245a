use super::{EditRequest, EditTransport, GenerationError, JobHandle, PollResponse};
use crate::http::{build_client, build_download_client};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct FluxConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub edit_endpoint: String,
}

impl FluxConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("FLUX_API_KEY")
                .or_else(|_| std::env::var("BFL_API_KEY"))
                .ok()
                .filter(|v| !v.trim().is_empty()),
            base_url: std::env::var("FLUX_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.bfl.ai/v1".into()),
            edit_endpoint: std::env::var("FLUX_EDIT_ENDPOINT")
                .unwrap_or_else(|_| "flux-kontext-pro".into()),
        }
    }

    fn edit_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.edit_endpoint.trim_start_matches('/')
        )
    }
}

/// FLUX Kontext over HTTPS. API calls carry the `x-key` header; result
/// downloads go through a separate header-less client because samples
/// are short-lived signed URLs on a different host.
pub struct FluxTransport {
    api: Client,
    download: Client,
    config: FluxConfig,
}

impl FluxTransport {
    pub fn new(config: FluxConfig) -> Self {
        Self {
            api: build_client(),
            download: build_download_client(),
            config,
        }
    }

    fn key(&self) -> &str {
        self.config.api_key.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    polling_url: Option<String>,
}

#[async_trait]
impl EditTransport for FluxTransport {
    async fn submit(&self, request: &EditRequest) -> Result<JobHandle, GenerationError> {
        let response = self
            .api
            .post(self.config.edit_url())
            .header("x-key", self.key())
            .json(request)
            .send()
            .await
            .map_err(|err| GenerationError::Submission(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Submission(format!(
                "HTTP {status}: {}",
                snippet(&body)
            )));
        }

        let payload: SubmitResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::Submission(format!("invalid response: {err}")))?;
        let polling_url = payload
            .polling_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| GenerationError::Submission("no polling url returned".into()))?;

        Ok(JobHandle {
            id: payload.id,
            polling_url,
        })
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollResponse, GenerationError> {
        let mut request = self.api.get(&handle.polling_url).header("x-key", self.key());
        if let Some(id) = handle.id.as_deref()
            && !url_carries_id(&handle.polling_url, id)
        {
            request = request.query(&[("id", id)]);
        }

        let response = request
            .send()
            .await
            .map_err(|err| GenerationError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GenerationError::Transport(format!(
                "HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| GenerationError::Transport(format!("invalid poll body: {err}")))
    }

    async fn download(&self, sample_url: &str) -> Result<Vec<u8>, GenerationError> {
        let response = self
            .download
            .get(sample_url)
            .send()
            .await
            .map_err(|err| GenerationError::Download(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GenerationError::Download(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| GenerationError::Download(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn url_carries_id(url: &str, id: &str) -> bool {
    Url::parse(url)
        .map(|parsed| parsed.query_pairs().any(|(k, v)| k == "id" && v == id))
        .unwrap_or(false)
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(idx, _)| idx)
        .unwrap_or(body.len());
    &body[..end]
}
