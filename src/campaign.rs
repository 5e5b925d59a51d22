//! Campaign pipeline
//!
//! Turns a brief into a finished creative:
//!
//! 1. Brand details from the brief, topped up by the scraper when a website is given
//! 2. Ad copy from the copy writer
//! 3. A generated banner when an image client is configured, otherwise a placeholder
//!
//! Only an empty prompt fails the pipeline. Every collaborator failure after
//! that degrades to the local fallback and is logged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::brand::{BrandKit, BrandSource, HttpBrandScraper};
use crate::config::{Config, PlaceholderConfig};
use crate::copy::{AdCopy, CopyWriter, TemplateCopyWriter};
use crate::error::{AdforgeError, Result};
use crate::inference::{GeneratedImage, ImageClient, ImageClientConfig, ImageRequest};
use crate::placeholder::generate_placeholder_banner;

const SCRAPER_TIMEOUT: Duration = Duration::from_secs(30);

/// Requested creative format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdFormat {
    #[default]
    Image,
    Video,
}

impl FromStr for AdFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(AdFormat::Image),
            "video" => Ok(AdFormat::Video),
            other => Err(format!("unknown format '{}', expected image or video", other)),
        }
    }
}

impl fmt::Display for AdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdFormat::Image => f.write_str("image"),
            AdFormat::Video => f.write_str("video"),
        }
    }
}

/// What the user asked for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignBrief {
    pub prompt: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slogan: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub instagram: Option<String>,
    #[serde(default)]
    pub facebook: Option<String>,
    #[serde(default)]
    pub twitter: Option<String>,
    #[serde(default)]
    pub format: AdFormat,
}

/// The banner shown with the copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    Generated(GeneratedImage),
    Placeholder { data_uri: String },
}

impl ImageRef {
    /// Something an `<img src>` can load.
    pub fn url(&self) -> &str {
        match self {
            ImageRef::Generated(image) => &image.image_url,
            ImageRef::Placeholder { data_uri } => data_uri,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ImageRef::Placeholder { .. })
    }
}

/// A finished creative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdCreative {
    pub prompt: String,
    pub format: AdFormat,
    pub brand: BrandKit,
    pub copy: AdCopy,
    pub image: ImageRef,
}

pub struct Campaign {
    copywriter: Box<dyn CopyWriter>,
    brands: Option<Arc<dyn BrandSource>>,
    images: Option<ImageClient>,
    placeholder: PlaceholderConfig,
}

impl Campaign {
    /// A campaign with template copy, no scraper and no image client.
    pub fn new(placeholder: PlaceholderConfig) -> Self {
        Self {
            copywriter: Box::new(TemplateCopyWriter::default()),
            brands: None,
            images: None,
            placeholder,
        }
    }

    /// Wire up every collaborator the configuration enables.
    ///
    /// The image client is only created when a credential is configured and
    /// starts connecting immediately, so this must run inside a Tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let scraper = HttpBrandScraper::new(config.scraper_url.clone(), SCRAPER_TIMEOUT)?;
        let mut campaign = Self::new(config.placeholder.clone()).with_brand_source(Arc::new(scraper));

        match ImageClientConfig::from_config(config) {
            Some(client_config) => {
                campaign = campaign.with_image_client(ImageClient::connect(client_config));
            }
            None => info!("No API key configured, banners will be placeholders"),
        }
        Ok(campaign)
    }

    pub fn with_copywriter(mut self, copywriter: Box<dyn CopyWriter>) -> Self {
        self.copywriter = copywriter;
        self
    }

    pub fn with_brand_source(mut self, brands: Arc<dyn BrandSource>) -> Self {
        self.brands = Some(brands);
        self
    }

    pub fn with_image_client(mut self, images: ImageClient) -> Self {
        self.images = Some(images);
        self
    }

    pub fn image_client(&self) -> Option<&ImageClient> {
        self.images.as_ref()
    }

    /// Produce a creative for `brief`.
    ///
    /// # Errors
    /// `InvalidInput` if the prompt is blank. Nothing else fails the pipeline.
    pub async fn generate(&self, brief: &CampaignBrief) -> Result<AdCreative> {
        let prompt = brief.prompt.trim();
        if prompt.is_empty() {
            return Err(AdforgeError::InvalidInput("prompt must not be empty".into()));
        }

        let brand = self.resolve_brand(brief).await;

        let copy = match self.copywriter.write(prompt, &brand).await {
            Ok(copy) => copy,
            Err(e) => {
                warn!(error = %e, "Copy generation failed, using default copy");
                AdCopy::default()
            }
        };

        let image = self.render(prompt, &brand, &copy).await;

        info!(
            format = %brief.format,
            placeholder = image.is_placeholder(),
            "Creative ready"
        );

        Ok(AdCreative {
            prompt: prompt.to_string(),
            format: brief.format,
            brand,
            copy,
            image,
        })
    }

    async fn resolve_brand(&self, brief: &CampaignBrief) -> BrandKit {
        let kit = BrandKit::from_brief(brief);

        let (Some(brands), Some(website)) = (&self.brands, kit.website.clone()) else {
            return kit;
        };

        match brands.lookup(&website).await {
            Ok(Some(scraped)) => kit.merge(scraped),
            Ok(None) => {
                debug!(website = %website, "No brand metadata found");
                kit
            }
            Err(e) => {
                warn!(website = %website, error = %e, "Brand lookup failed, using brief only");
                kit
            }
        }
    }

    async fn render(&self, prompt: &str, brand: &BrandKit, copy: &AdCopy) -> ImageRef {
        if let Some(images) = &self.images {
            match images.submit(ImageRequest::new(image_prompt(prompt, brand))).await {
                Ok(image) => return ImageRef::Generated(image),
                Err(e) => warn!(error = %e, "Image generation failed, using placeholder"),
            }
        }

        let subtitle = placeholder_subtitle(brand, copy);
        ImageRef::Placeholder {
            data_uri: generate_placeholder_banner(&copy.headline, Some(&subtitle), &self.placeholder),
        }
    }

    /// Stop the image client, failing anything still in flight.
    pub async fn shutdown(&self) {
        if let Some(images) = &self.images {
            images.shutdown().await;
        }
    }
}

/// Slogan if there is one, then social handles, then the ad description.
fn placeholder_subtitle(brand: &BrandKit, copy: &AdCopy) -> String {
    brand
        .slogan
        .clone()
        .or_else(|| brand.socials_summary())
        .unwrap_or_else(|| copy.description.clone())
}

/// Prompt sent to the image model: the brief plus whatever brand context exists.
fn image_prompt(prompt: &str, brand: &BrandKit) -> String {
    let mut parts = vec![format!("Advertising banner: {}", prompt)];
    if let Some(name) = &brand.brand_name {
        parts.push(format!("Brand: {}", name));
    }
    if let Some(slogan) = &brand.slogan {
        parts.push(format!("Slogan: \"{}\"", slogan));
    }
    parts.join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticBrands {
        result: Option<BrandKit>,
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl BrandSource for StaticBrands {
        async fn lookup(&self, website: &str) -> Result<Option<BrandKit>> {
            self.seen.lock().unwrap().push(website.to_string());
            if self.fail {
                return Err(AdforgeError::Protocol("scraper down".into()));
            }
            Ok(self.result.clone())
        }
    }

    struct FailingCopy;

    #[async_trait::async_trait]
    impl CopyWriter for FailingCopy {
        async fn write(&self, _prompt: &str, _brand: &BrandKit) -> Result<AdCopy> {
            Err(AdforgeError::Protocol("model unavailable".into()))
        }
    }

    fn brief(prompt: &str) -> CampaignBrief {
        CampaignBrief {
            prompt: prompt.into(),
            name: Some("Hydra".into()),
            website: Some("https://hydra.example".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_ad_format_parse() {
        assert_eq!("Image".parse::<AdFormat>().unwrap(), AdFormat::Image);
        assert_eq!("video".parse::<AdFormat>().unwrap(), AdFormat::Video);
        assert!("gif".parse::<AdFormat>().is_err());
    }

    #[test]
    fn test_image_prompt_includes_brand() {
        let brand = BrandKit {
            brand_name: Some("Hydra".into()),
            slogan: Some("Drink smarter".into()),
            ..Default::default()
        };
        assert_eq!(
            image_prompt("smart bottle", &brand),
            "Advertising banner: smart bottle. Brand: Hydra. Slogan: \"Drink smarter\""
        );
        assert_eq!(
            image_prompt("smart bottle", &BrandKit::default()),
            "Advertising banner: smart bottle"
        );
    }

    #[test]
    fn test_placeholder_subtitle_preference() {
        let copy = AdCopy::default();
        let mut brand = BrandKit::default();
        assert_eq!(placeholder_subtitle(&brand, &copy), copy.description);

        brand.socials.insert("instagram".into(), "@hydra".into());
        assert_eq!(placeholder_subtitle(&brand, &copy), "Instagram: @hydra");

        brand.slogan = Some("Drink smarter".into());
        assert_eq!(placeholder_subtitle(&brand, &copy), "Drink smarter");
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let campaign = Campaign::new(PlaceholderConfig::default());
        let result = campaign.generate(&brief("  ")).await;
        assert!(matches!(result, Err(AdforgeError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_without_image_client_uses_placeholder() {
        let brands = Arc::new(StaticBrands {
            result: Some(BrandKit {
                brand_name: Some("Scraped".into()),
                slogan: Some("Drink smarter".into()),
                ..Default::default()
            }),
            fail: false,
            seen: Mutex::new(Vec::new()),
        });
        let campaign =
            Campaign::new(PlaceholderConfig::default()).with_brand_source(brands.clone());

        let creative = campaign.generate(&brief("Stay hydrated")).await.unwrap();

        assert_eq!(*brands.seen.lock().unwrap(), vec!["https://hydra.example"]);
        assert_eq!(creative.brand.brand_name.as_deref(), Some("Hydra"));
        assert_eq!(creative.brand.slogan.as_deref(), Some("Drink smarter"));
        assert_eq!(creative.copy.headline, "Hydra - Stay hydrated");
        assert!(creative.image.is_placeholder());
        assert!(creative.image.url().starts_with("data:image/svg+xml"));
    }

    #[tokio::test]
    async fn test_failures_degrade_to_fallbacks() {
        let brands = Arc::new(StaticBrands {
            result: None,
            fail: true,
            seen: Mutex::new(Vec::new()),
        });
        let campaign = Campaign::new(PlaceholderConfig::default())
            .with_brand_source(brands)
            .with_copywriter(Box::new(FailingCopy));

        let creative = campaign.generate(&brief("Stay hydrated")).await.unwrap();

        assert_eq!(creative.brand.brand_name.as_deref(), Some("Hydra"));
        assert_eq!(creative.copy, AdCopy::default());
        assert!(creative.image.is_placeholder());
    }

    #[tokio::test]
    async fn test_from_config_without_key_has_no_image_client() {
        let campaign = Campaign::from_config(&Config::default()).unwrap();
        assert!(campaign.image_client().is_none());
    }

    #[test]
    fn test_image_ref_serializes_with_kind() {
        let value = serde_json::to_value(ImageRef::Placeholder {
            data_uri: "data:x".into(),
        })
        .unwrap();
        assert_eq!(value["kind"], "placeholder");
        assert_eq!(value["data_uri"], "data:x");
    }
}
