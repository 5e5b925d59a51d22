//! Ad copy
//!
//! The headline, description and call to action shown with a banner.

use serde::{Deserialize, Serialize};

use crate::brand::BrandKit;
use crate::error::Result;

pub const DEFAULT_HEADLINE: &str = "Your AI-Generated Headline";
pub const DEFAULT_DESCRIPTION: &str = "An example description generated using AI.";
pub const DEFAULT_CTA: &str = "Learn More";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdCopy {
    pub headline: String,
    pub description: String,
    pub cta: String,
}

impl Default for AdCopy {
    fn default() -> Self {
        Self {
            headline: DEFAULT_HEADLINE.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            cta: DEFAULT_CTA.to_string(),
        }
    }
}

/// Produces ad copy for a prompt (allows swapping in a text model)
#[async_trait::async_trait]
pub trait CopyWriter: Send + Sync {
    async fn write(&self, prompt: &str, brand: &BrandKit) -> Result<AdCopy>;
}

/// Deterministic copy built from the prompt and brand name.
#[derive(Debug, Clone)]
pub struct TemplateCopyWriter {
    pub cta: String,
}

impl Default for TemplateCopyWriter {
    fn default() -> Self {
        Self {
            cta: DEFAULT_CTA.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl CopyWriter for TemplateCopyWriter {
    async fn write(&self, prompt: &str, brand: &BrandKit) -> Result<AdCopy> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(AdCopy::default());
        }

        let name = brand.brand_name.as_deref();
        Ok(AdCopy {
            headline: format!("{} - {}", name.unwrap_or("Your Brand"), prompt),
            description: format!("Engage with {} now!", name.unwrap_or("our brand")),
            cta: self.cta.clone(),
        })
    }
}
