use crate::insights::Recommendations;
use crate::portfolio::PortfolioMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PortfolioBody {
    /// Raw base64 or a `data:image/...;base64,` URL.
    pub image_base64: String,
    pub item: ItemContext,
    #[serde(default)]
    pub mode: PortfolioMode,
    #[serde(default)]
    pub prompts: Vec<String>,
    #[serde(default)]
    pub overrides: Option<PortfolioOverrides>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemContext {
    pub item_name: String,
    pub category: String,
    #[serde(default)]
    pub brand: Option<String>,
}

impl ItemContext {
    /// Brand-qualified name used inside generation prompts.
    pub fn description(&self) -> String {
        match self.brand.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            Some(brand) => format!("{brand} {}", self.item_name.trim()),
            None => self.item_name.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortfolioOverrides {
    #[serde(default)]
    pub insights: Option<Recommendations>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// One edit intent handed to the generation provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptSpec {
    pub kind: String,
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
