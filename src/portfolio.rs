use crate::{
    batch::{BatchOrchestrator, GeneratedArtifact, JobFailure},
    insights::{InsightsService, InsightsSource, Recommendations, derive_prompts},
    models::{ItemContext, PortfolioOverrides, Priority, PromptSpec},
    preprocess::{CompressionPlan, ImagePreprocessor, PreprocessError},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const BASELINE_PROMPT: &str =
    "Product on clean white background, professional lighting, centered composition";
const MAX_CURATED_PROMPTS: usize = 5;

const VARIATIONS: [(&str, &str); 5] = [
    (
        "White studio",
        "Professional product photography on pure white background, centered composition, soft even lighting, clean shadows",
    ),
    (
        "Lifestyle setting",
        "Product in natural lifestyle setting, warm ambient lighting, realistic environment, home or office context",
    ),
    (
        "Dramatic dark",
        "Dramatic product shot with dark background, rim lighting, luxury presentation, premium feel, high contrast",
    ),
    (
        "Minimalist grey",
        "Minimalist product photo with subtle shadows, clean composition, neutral gray background, modern aesthetic",
    ),
    (
        "Macro detail",
        "Close-up detail shot highlighting textures and quality, macro perspective, sharp focus on product features",
    ),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortfolioMode {
    /// Baseline enhancement only.
    #[default]
    Quick,
    /// Baseline plus insight-driven shots.
    Curated,
    /// Caller prompts only.
    Custom,
    /// Five fixed style variations.
    Variations,
}

#[derive(Debug, Clone)]
pub struct PortfolioRequest {
    pub image: Arc<[u8]>,
    pub item: ItemContext,
    pub mode: PortfolioMode,
    pub prompts: Vec<String>,
    pub overrides: Option<PortfolioOverrides>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioResult {
    pub portfolio_id: String,
    pub mode: PortfolioMode,
    pub item: ItemContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<Recommendations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights_source: Option<InsightsSource>,
    pub compression: CompressionPlan,
    pub requested: usize,
    pub generated_images: Vec<GeneratedArtifact>,
    pub errors: Vec<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl PortfolioResult {
    /// Drop in-memory image bytes once the files are on disk.
    pub fn release_bytes(mut self) -> Self {
        for artifact in &mut self.generated_images {
            artifact.bytes = Vec::new();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortfolioErrorKind {
    InvalidInput,
    Unprocessable,
    Internal,
}

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PortfolioError {
    pub fn kind(&self) -> PortfolioErrorKind {
        match self {
            PortfolioError::InvalidInput(_) => PortfolioErrorKind::InvalidInput,
            PortfolioError::Preprocess(PreprocessError::UnsupportedFormat(_))
            | PortfolioError::Preprocess(PreprocessError::Decode(_)) => {
                PortfolioErrorKind::InvalidInput
            }
            PortfolioError::Preprocess(PreprocessError::CompressionExhausted { .. }) => {
                PortfolioErrorKind::Unprocessable
            }
            PortfolioError::Preprocess(PreprocessError::Encode(_))
            | PortfolioError::Internal(_) => PortfolioErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            PortfolioError::InvalidInput(_) => "validate",
            PortfolioError::Preprocess(_) => "preprocess",
            PortfolioError::Internal(_) => "internal",
        }
    }
}

pub struct PortfolioAssembler {
    preprocessor: ImagePreprocessor,
    orchestrator: BatchOrchestrator,
    insights: InsightsService,
    max_custom_prompts: usize,
}

impl PortfolioAssembler {
    pub fn new(
        preprocessor: ImagePreprocessor,
        orchestrator: BatchOrchestrator,
        insights: InsightsService,
        max_custom_prompts: usize,
    ) -> Self {
        Self {
            preprocessor,
            orchestrator,
            insights,
            max_custom_prompts,
        }
    }

    /// Reject requests that could never produce a portfolio.
    pub fn validate(&self, request: &PortfolioRequest) -> Result<(), PortfolioError> {
        if request.image.is_empty() {
            return Err(PortfolioError::InvalidInput("image is empty".into()));
        }
        if request.item.item_name.trim().is_empty() {
            return Err(PortfolioError::InvalidInput("item_name is required".into()));
        }
        if request.mode == PortfolioMode::Custom {
            if request.prompts.is_empty() {
                return Err(PortfolioError::InvalidInput(
                    "custom mode needs at least one prompt".into(),
                ));
            }
            if request.prompts.len() > self.max_custom_prompts {
                return Err(PortfolioError::InvalidInput(format!(
                    "at most {} custom prompts are allowed",
                    self.max_custom_prompts
                )));
            }
            if request.prompts.iter().any(|p| p.trim().is_empty()) {
                return Err(PortfolioError::InvalidInput("prompts must not be blank".into()));
            }
        }
        Ok(())
    }

    pub async fn build_portfolio(
        &self,
        request: PortfolioRequest,
    ) -> Result<PortfolioResult, PortfolioError> {
        self.validate(&request)?;
        let started = Instant::now();
        let created_at = Utc::now();

        let preprocessor = self.preprocessor.clone();
        let source = request.image.clone();
        let prepared = tokio::task::spawn_blocking(move || preprocessor.prepare(source))
            .await
            .map_err(|err| PortfolioError::Internal(err.to_string()))??;
        crate::metrics::stage_elapsed("preprocess", started.elapsed().as_millis());
        if prepared.plan.modified {
            info!(
                target = "snapsell.portfolio",
                from_bytes = prepared.plan.original_size_bytes,
                to_bytes = prepared.plan.final_size_bytes,
                scale = prepared.plan.applied_scale,
                "source image compressed"
            );
        }

        let image = prepared.bytes;
        let mut generated_images = Vec::new();
        let mut errors = Vec::new();
        let mut insights = None;
        let mut insights_source = None;

        let baseline = matches!(request.mode, PortfolioMode::Quick | PortfolioMode::Curated)
            .then(baseline_spec);
        let prompts = match request.mode {
            PortfolioMode::Quick => Vec::new(),
            PortfolioMode::Curated => {
                let (recs, source) = match request.overrides.and_then(|o| o.insights) {
                    Some(recs) => (recs, InsightsSource::Override),
                    None => self.insights.recommend(&request.item).await,
                };
                let mut prompts = derive_prompts(&request.item.description(), &recs);
                prompts.truncate(MAX_CURATED_PROMPTS);
                insights = Some(recs);
                insights_source = Some(source);
                prompts
            }
            PortfolioMode::Custom => custom_specs(&request.prompts),
            PortfolioMode::Variations => variation_specs(),
        };

        let mut offset = 0;
        if let Some(spec) = &baseline {
            match self.orchestrator.run_job(&image, 0, spec).await {
                Ok(artifact) => generated_images.push(artifact),
                Err(failure) => {
                    warn!(
                        target = "snapsell.portfolio",
                        error = %failure.message,
                        "baseline enhancement failed, continuing with remaining shots"
                    );
                    errors.push(failure);
                }
            }
            offset = 1;
        }

        let report = self.orchestrator.run_batch(&image, &prompts).await;
        generated_images.extend(report.succeeded.into_iter().map(|mut artifact| {
            artifact.prompt_index += offset;
            artifact
        }));
        errors.extend(report.failed.into_iter().map(|mut failure| {
            failure.prompt_index += offset;
            failure
        }));

        let requested = offset + prompts.len();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        crate::metrics::stage_elapsed("portfolio", started.elapsed().as_millis());
        info!(
            target = "snapsell.portfolio",
            mode = ?request.mode,
            requested,
            generated = generated_images.len(),
            failed = errors.len(),
            elapsed_ms,
            "portfolio assembled"
        );

        Ok(PortfolioResult {
            portfolio_id: Uuid::new_v4().to_string(),
            mode: request.mode,
            item: request.item,
            insights,
            insights_source,
            compression: prepared.plan,
            requested,
            generated_images,
            errors,
            created_at,
            elapsed_ms,
        })
    }
}

fn baseline_spec() -> PromptSpec {
    PromptSpec {
        kind: "background_removal".into(),
        description: "Clean white background".into(),
        prompt: BASELINE_PROMPT.into(),
        priority: Some(Priority::High),
    }
}

fn custom_specs(prompts: &[String]) -> Vec<PromptSpec> {
    prompts
        .iter()
        .enumerate()
        .map(|(i, prompt)| PromptSpec {
            kind: "custom".into(),
            description: format!("Custom shot {}", i + 1),
            prompt: prompt.trim().to_string(),
            priority: None,
        })
        .collect()
}

fn variation_specs() -> Vec<PromptSpec> {
    VARIATIONS
        .iter()
        .enumerate()
        .map(|(i, (description, prompt))| PromptSpec {
            kind: format!("variation_{}", i + 1),
            description: (*description).into(),
            prompt: (*prompt).into(),
            priority: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchSettings;
    use crate::generation::{EditOptions, FailureKind, GenerationClient, PollPolicy};
    use crate::generation::fake::ScriptedTransport;
    use crate::insights::{ShotRecommendation, Styling};
    use crate::llm::{LlmClient, LlmConfig};
    use crate::preprocess::{ProviderLimits, tests::noise_png};
    use crate::storage::ArtifactStore;
    use tempfile::TempDir;

    fn assembler(
        transport: Arc<ScriptedTransport>,
        limits: ProviderLimits,
    ) -> (PortfolioAssembler, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = Arc::new(GenerationClient::new(transport, PollPolicy::default()));
        let orchestrator = BatchOrchestrator::new(
            client,
            ArtifactStore::new(dir.path()),
            BatchSettings::default(),
            EditOptions::default(),
        );
        let insights = InsightsService::new(Arc::new(LlmClient::new(LlmConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: None,
            model: "gpt-4.1".into(),
        })));
        (
            PortfolioAssembler::new(ImagePreprocessor::new(limits), orchestrator, insights, 10),
            dir,
        )
    }

    fn request(mode: PortfolioMode, category: &str) -> PortfolioRequest {
        PortfolioRequest {
            image: noise_png(32, 32),
            item: ItemContext {
                item_name: "Walkman".into(),
                category: category.into(),
                brand: Some("Sony".into()),
            },
            mode,
            prompts: Vec::new(),
            overrides: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn quick_mode_runs_only_the_baseline() {
        let transport = Arc::new(ScriptedTransport::new());
        let (assembler, _dir) = assembler(transport.clone(), ProviderLimits::default());
        let result = assembler
            .build_portfolio(request(PortfolioMode::Quick, "Electronics"))
            .await
            .expect("portfolio");

        assert_eq!(result.requested, 1);
        assert_eq!(result.generated_images.len(), 1);
        assert_eq!(result.generated_images[0].kind, "background_removal");
        assert!(result.errors.is_empty());
        assert!(result.insights.is_none());
        assert!(!result.compression.modified);
        let prompts: Vec<_> = transport.submissions().into_iter().map(|(p, _)| p).collect();
        assert_eq!(prompts, vec![BASELINE_PROMPT.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn curated_batch_still_runs_when_the_baseline_fails() {
        let transport = Arc::new(ScriptedTransport::new().reject(BASELINE_PROMPT));
        let (assembler, _dir) = assembler(transport.clone(), ProviderLimits::default());
        let result = assembler
            .build_portfolio(request(PortfolioMode::Curated, "Electronics"))
            .await
            .expect("portfolio");

        assert_eq!(result.insights_source, Some(InsightsSource::Fallback));
        assert_eq!(result.requested, 5);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].prompt_index, 0);
        assert_eq!(result.errors[0].error_kind, FailureKind::Submission);
        let indexes: Vec<_> = result.generated_images.iter().map(|a| a.prompt_index).collect();
        assert_eq!(indexes, vec![1, 2, 3, 4]);
        assert!(
            result.generated_images[0]
                .prompt
                .starts_with("Professional product photography of Sony Walkman")
        );
        assert_eq!(transport.submissions().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn insight_override_skips_the_provider() {
        let transport = Arc::new(ScriptedTransport::new());
        let (assembler, _dir) = assembler(transport, ProviderLimits::default());
        let mut req = request(PortfolioMode::Curated, "Toys");
        req.overrides = Some(PortfolioOverrides {
            insights: Some(Recommendations {
                recommended_shots: vec![
                    ShotRecommendation {
                        kind: "detail".into(),
                        description: "Tape deck".into(),
                        prompt_elements: vec![],
                        priority: Priority::High,
                    },
                    ShotRecommendation {
                        kind: "comparison".into(),
                        description: "Next to a phone".into(),
                        prompt_elements: vec![],
                        priority: Priority::Low,
                    },
                ],
                styling_recommendations: Styling::default(),
                category_insights: String::new(),
            }),
        });

        let result = assembler.build_portfolio(req).await.expect("portfolio");
        assert_eq!(result.insights_source, Some(InsightsSource::Override));
        assert_eq!(result.requested, 2);
        assert_eq!(result.generated_images.len(), 2);
        assert_eq!(result.generated_images[1].kind, "detail");
    }

    #[tokio::test(start_paused = true)]
    async fn custom_prompts_keep_their_indexes() {
        let transport = Arc::new(ScriptedTransport::new().reject("b"));
        let (assembler, _dir) = assembler(transport, ProviderLimits::default());
        let mut req = request(PortfolioMode::Custom, "Toys");
        req.prompts = vec!["a".into(), "b".into(), "c".into()];

        let result = assembler.build_portfolio(req).await.expect("portfolio");
        assert_eq!(result.requested, 3);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].prompt_index, 1);
        assert_eq!(result.errors[0].prompt, "b");
        let indexes: Vec<_> = result.generated_images.iter().map(|a| a.prompt_index).collect();
        assert_eq!(indexes, vec![0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn variations_mode_submits_five_styles() {
        let transport = Arc::new(ScriptedTransport::new());
        let (assembler, _dir) = assembler(transport.clone(), ProviderLimits::default());
        let result = assembler
            .build_portfolio(request(PortfolioMode::Variations, "Toys"))
            .await
            .expect("portfolio");
        assert_eq!(result.requested, 5);
        let kinds: Vec<_> = result.generated_images.iter().map(|a| a.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["variation_1", "variation_2", "variation_3", "variation_4", "variation_5"]
        );
        assert!(
            transport
                .submissions()
                .iter()
                .all(|(prompt, _)| prompt != BASELINE_PROMPT)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn uncompressible_image_submits_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        let limits = ProviderLimits {
            max_bytes: 0,
            max_megapixels: 20.0,
        };
        let (assembler, _dir) = assembler(transport.clone(), limits);
        let err = assembler
            .build_portfolio(request(PortfolioMode::Quick, "Toys"))
            .await
            .expect_err("cannot compress");

        assert!(matches!(
            err,
            PortfolioError::Preprocess(PreprocessError::CompressionExhausted { .. })
        ));
        assert_eq!(err.kind(), PortfolioErrorKind::Unprocessable);
        assert!(transport.submissions().is_empty());
    }

    #[tokio::test]
    async fn custom_mode_validation() {
        let (assembler, _dir) = assembler(Arc::new(ScriptedTransport::new()), ProviderLimits::default());
        let mut req = request(PortfolioMode::Custom, "Toys");
        assert_eq!(
            assembler.validate(&req).expect_err("no prompts").kind(),
            PortfolioErrorKind::InvalidInput
        );
        req.prompts = vec!["ok".into(), "  ".into()];
        assert!(assembler.validate(&req).is_err());
        req.prompts = (0..11).map(|i| format!("p{i}")).collect();
        assert!(assembler.validate(&req).is_err());
        req.prompts = vec!["ok".into()];
        assert!(assembler.validate(&req).is_ok());
    }

    #[test]
    fn release_bytes_clears_artifact_buffers() {
        let result = PortfolioResult {
            portfolio_id: "id".into(),
            mode: PortfolioMode::Quick,
            item: request(PortfolioMode::Quick, "Toys").item,
            insights: None,
            insights_source: None,
            compression: CompressionPlan {
                format: "png".into(),
                original_dimensions: (1, 1),
                original_size_bytes: 1,
                final_dimensions: (1, 1),
                final_size_bytes: 1,
                applied_scale: 1.0,
                applied_quality: None,
                color_space_normalized: false,
                modified: false,
            },
            requested: 1,
            generated_images: vec![GeneratedArtifact {
                prompt_index: 0,
                kind: "background_removal".into(),
                description: String::new(),
                prompt: String::new(),
                priority: None,
                file_name: "a.png".into(),
                path: "a.png".into(),
                url: "/image/a.png".into(),
                size_bytes: 3,
                bytes: vec![1, 2, 3],
            }],
            errors: vec![],
            created_at: Utc::now(),
            elapsed_ms: 0,
        };
        let released = result.release_bytes();
        assert!(released.generated_images[0].bytes.is_empty());
        assert_eq!(released.generated_images[0].size_bytes, 3);
    }
}
