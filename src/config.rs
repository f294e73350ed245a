use crate::{
    batch::BatchSettings,
    generation::{FluxConfig, PollPolicy},
    llm::LlmConfig,
    preprocess::ProviderLimits,
};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub flux: FluxConfig,
    pub llm: LlmConfig,
    pub poll: PollPolicy,
    pub limits: ProviderLimits,
    pub batch: BatchSettings,
    pub output_dir: PathBuf,
    pub max_custom_prompts: usize,
    pub request_max_bytes: usize,
    pub port: u16,
    pub queue_capacity: usize,
    pub job_ttl: Duration,
    pub metrics_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            flux: FluxConfig::from_env(),
            llm: LlmConfig::from_env(),
            poll: PollPolicy {
                interval: Duration::from_millis(env_parse("FLUX_POLL_INTERVAL_MS", 2000)),
                max_attempts: env_parse("FLUX_POLL_MAX_ATTEMPTS", 60u32).max(1),
            },
            limits: ProviderLimits::from_megabytes(
                env_parse("PROVIDER_MAX_IMAGE_MB", 20.0),
                env_parse("PROVIDER_MAX_MEGAPIXELS", 20.0),
            ),
            batch: BatchSettings {
                group_size: env_parse("BATCH_GROUP_SIZE", 2usize).max(1),
                pacing: Duration::from_millis(env_parse("BATCH_PACING_MS", 2000)),
            },
            output_dir: std::env::var("OUTPUT_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("enhanced")),
            max_custom_prompts: env_parse("MAX_CUSTOM_PROMPTS", 10),
            request_max_bytes: env_parse("REQUEST_MAX_BYTES", 48 * 1024 * 1024),
            port: env_parse("PORT", 8000),
            queue_capacity: env_parse("QUEUE_CAPACITY", 16usize).max(1),
            job_ttl: Duration::from_secs(env_parse("JOB_TTL_SECS", 3600)),
            metrics_key: std::env::var("METRICS_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    parse_or(std::env::var(key).ok(), default)
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
