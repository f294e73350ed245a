use crate::llm::{LlmClient, LlmMessage};
use crate::models::{ItemContext, Priority, PromptSpec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendations {
    #[serde(default)]
    pub recommended_shots: Vec<ShotRecommendation>,
    #[serde(default)]
    pub styling_recommendations: Styling,
    #[serde(default)]
    pub category_insights: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShotRecommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub prompt_elements: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Styling {
    #[serde(default)]
    pub backgrounds: Vec<String>,
    #[serde(default)]
    pub lighting: Option<String>,
    #[serde(default)]
    pub props: Vec<String>,
    #[serde(default)]
    pub mood: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightsSource {
    Provider,
    Fallback,
    Override,
}

/// Asks the language model which shots sell an item best.
pub struct InsightsService {
    llm: Arc<LlmClient>,
}

impl InsightsService {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Never fails: provider errors and unparsable replies fall back to the
    /// built-in recommendations for the item's category.
    pub async fn recommend(&self, item: &ItemContext) -> (Recommendations, InsightsSource) {
        let message = LlmMessage {
            role: "user".into(),
            content: recommendation_prompt(item),
        };
        match self.llm.chat(&[message]).await {
            Ok(response) => {
                if let Some(usage) = &response.usage {
                    debug!(
                        target = "snapsell.insights",
                        model = self.llm.model(),
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "recommendations received"
                    );
                }
                match parse_recommendations(&response.text) {
                    Some(parsed) if !parsed.recommended_shots.is_empty() => {
                        (parsed, InsightsSource::Provider)
                    }
                    _ => {
                        warn!(
                            target = "snapsell.insights",
                            "unusable recommendation payload, using category defaults"
                        );
                        (default_recommendations(&item.category), InsightsSource::Fallback)
                    }
                }
            }
            Err(err) => {
                warn!(
                    target = "snapsell.insights",
                    error = %err,
                    "recommendation request failed, using category defaults"
                );
                (default_recommendations(&item.category), InsightsSource::Fallback)
            }
        }
    }
}

fn recommendation_prompt(item: &ItemContext) -> String {
    format!(
        r#"You are a product photographer who knows which photos sell items on online marketplaces.

Item: {name}
Category: {category}
Brand: {brand}

Recommend the product images that would maximize sales: the angles buyers need, lifestyle or context shots, close-up details, scale references, and backgrounds.

Reply with ONLY a JSON object of this shape:
{{
  "recommended_shots": [
    {{"type": "angle|lifestyle|detail|comparison", "description": "...", "prompt_elements": ["..."], "priority": "high|medium|low"}}
  ],
  "styling_recommendations": {{"backgrounds": ["..."], "lighting": "natural|studio|dramatic", "props": ["..."], "mood": "professional|casual|luxury"}},
  "category_insights": "..."
}}"#,
        name = item.item_name,
        category = item.category,
        brand = item.brand.as_deref().unwrap_or("Unknown"),
    )
}

/// Cut the outermost JSON object out of free text and parse it.
pub fn parse_recommendations(text: &str) -> Option<Recommendations> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Turn high and medium priority shots into edit prompts.
pub fn derive_prompts(description: &str, recommendations: &Recommendations) -> Vec<PromptSpec> {
    let styling = &recommendations.styling_recommendations;
    let lighting = styling.lighting.as_deref().unwrap_or("studio");

    recommendations
        .recommended_shots
        .iter()
        .filter(|shot| matches!(shot.priority, Priority::High | Priority::Medium))
        .map(|shot| {
            let mut prompt = format!(
                "Professional product photography of {description}, {}, ",
                shot.description
            );
            if !shot.prompt_elements.is_empty() {
                prompt.push_str(&shot.prompt_elements.join(", "));
                prompt.push_str(", ");
            }
            if shot.kind == "lifestyle" {
                let mood = styling.mood.as_deref().unwrap_or("professional");
                prompt.push_str(&format!("{mood} mood, {lighting} lighting, "));
                if !styling.props.is_empty() {
                    let props: Vec<&str> = styling.props.iter().take(2).map(String::as_str).collect();
                    prompt.push_str(&format!("with {}, ", props.join(", ")));
                }
            } else {
                let background = styling
                    .backgrounds
                    .first()
                    .map(String::as_str)
                    .unwrap_or("white");
                prompt.push_str(&format!("{background} background, {lighting} lighting, "));
            }
            prompt.push_str("4K quality, ultra detailed, professional product photography");

            PromptSpec {
                kind: shot.kind.clone(),
                description: shot.description.clone(),
                prompt,
                priority: Some(shot.priority),
            }
        })
        .collect()
}

fn shot(kind: &str, description: &str, elements: &[&str], priority: Priority) -> ShotRecommendation {
    ShotRecommendation {
        kind: kind.into(),
        description: description.into(),
        prompt_elements: elements.iter().map(|e| e.to_string()).collect(),
        priority,
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn default_recommendations(category: &str) -> Recommendations {
    use Priority::{High, Low, Medium};
    let category = category.to_lowercase();

    if category.contains("electronic") || category.contains("tech") {
        Recommendations {
            recommended_shots: vec![
                shot("angle", "Front view showing screen/display", &["front facing", "all buttons visible", "clean background"], High),
                shot("angle", "Back view showing ports and connections", &["rear view", "all ports visible", "cable compatibility"], High),
                shot("detail", "Close-up of model number and specifications", &["macro shot", "serial number", "specifications label"], Medium),
                shot("lifestyle", "Device in use on modern desk setup", &["workspace", "in use", "modern setting"], Medium),
                shot("comparison", "Size comparison with common objects", &["next to smartphone", "ruler", "hand for scale"], Low),
            ],
            styling_recommendations: Styling {
                backgrounds: strings(&["pure white", "dark gradient", "tech workspace"]),
                lighting: Some("studio".into()),
                props: strings(&["cables", "accessories", "original box"]),
                mood: Some("professional".into()),
            },
            category_insights: "Electronics sell best with clear technical details and all included accessories visible".into(),
        }
    } else if category.contains("furniture") || category.contains("home") {
        Recommendations {
            recommended_shots: vec![
                shot("angle", "3/4 view showing full item", &["three quarter angle", "full view", "neutral background"], High),
                shot("lifestyle", "Item in beautifully staged room", &["living room", "staged", "natural lighting"], High),
                shot("detail", "Close-up of materials and craftsmanship", &["texture detail", "material quality", "construction"], Medium),
                shot("angle", "Multiple angles showing all sides", &["360 degree views", "all angles", "consistent lighting"], Medium),
                shot("comparison", "Scale reference with person or room", &["human for scale", "room context", "dimensions"], High),
            ],
            styling_recommendations: Styling {
                backgrounds: strings(&["scandinavian interior", "white studio", "home setting"]),
                lighting: Some("natural".into()),
                props: strings(&["plants", "books", "decor items"]),
                mood: Some("casual".into()),
            },
            category_insights: "Furniture sells best when shown in context with warm, inviting staging".into(),
        }
    } else {
        Recommendations {
            recommended_shots: vec![
                shot("angle", "Clear front view on white background", &["centered", "white background", "professional"], High),
                shot("angle", "Multiple angles showing all sides", &["multi angle", "360 view", "consistent lighting"], High),
                shot("detail", "Close-ups of important features", &["detail shots", "key features", "quality indicators"], Medium),
                shot("lifestyle", "Item in use or context", &["in use", "lifestyle", "real world"], Medium),
            ],
            styling_recommendations: Styling {
                backgrounds: strings(&["pure white", "gradient", "contextual"]),
                lighting: Some("studio".into()),
                props: strings(&["minimal", "relevant accessories"]),
                mood: Some("professional".into()),
            },
            category_insights: "Focus on clear, honest representation with multiple angles".into(),
        }
    }
}
