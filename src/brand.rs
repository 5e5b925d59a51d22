//! Brand metadata
//!
//! Brand details come from two places: what the user typed into the brief,
//! and what the scraper service can pull from the brand's website. User input
//! always wins; scraped values only fill the gaps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::campaign::CampaignBrief;
use crate::error::{AdforgeError, Result};

/// Everything known about the advertised brand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandKit {
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub slogan: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    /// Platform (lowercase) → handle or profile URL
    #[serde(default)]
    pub socials: BTreeMap<String, String>,
}

impl BrandKit {
    /// Brand details as supplied in the brief. Blank fields are dropped.
    pub fn from_brief(brief: &CampaignBrief) -> Self {
        let mut socials = BTreeMap::new();
        for (platform, handle) in [
            ("instagram", &brief.instagram),
            ("facebook", &brief.facebook),
            ("twitter", &brief.twitter),
        ] {
            if let Some(handle) = non_blank(handle) {
                socials.insert(platform.to_string(), handle);
            }
        }

        Self {
            brand_name: non_blank(&brief.name),
            slogan: non_blank(&brief.slogan),
            website: non_blank(&brief.website),
            logo_url: None,
            socials,
        }
    }

    /// Fill missing fields from `scraped`, keeping everything already set.
    pub fn merge(mut self, scraped: BrandKit) -> Self {
        self.brand_name = self.brand_name.or(scraped.brand_name);
        self.slogan = self.slogan.or(scraped.slogan);
        self.website = self.website.or(scraped.website);
        self.logo_url = self.logo_url.or(scraped.logo_url);
        for (platform, link) in scraped.socials {
            self.socials.entry(platform).or_insert(link);
        }
        self
    }

    /// "Instagram: @x | Twitter: @y", or None without socials.
    pub fn socials_summary(&self) -> Option<String> {
        if self.socials.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .socials
            .iter()
            .map(|(platform, handle)| format!("{}: {}", capitalize(platform), handle))
            .collect();
        Some(parts.join(" | "))
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// Brand Source Trait (for dependency injection)
// ============================================================================

/// Looks up brand metadata for a website (allows mocking in tests)
#[async_trait::async_trait]
pub trait BrandSource: Send + Sync {
    /// `Ok(None)` when the site yielded nothing usable.
    async fn lookup(&self, website: &str) -> Result<Option<BrandKit>>;
}

/// Client for the scraper service's `POST /scrape` endpoint.
pub struct HttpBrandScraper {
    url: String,
    http_client: reqwest::Client,
}

impl HttpBrandScraper {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdforgeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait::async_trait]
impl BrandSource for HttpBrandScraper {
    async fn lookup(&self, website: &str) -> Result<Option<BrandKit>> {
        debug!(scraper = %self.url, website = %website, "Requesting brand metadata");

        let response = self
            .http_client
            .post(&self.url)
            .form(&[("website", website)])
            .send()
            .await?
            .error_for_status()?;

        // The service answers `null` when every scraping strategy failed
        let scraped: Option<BrandKit> = response.json().await?;
        let scraped = scraped.map(|mut kit| {
            kit.website.get_or_insert_with(|| website.to_string());
            kit
        });

        info!(
            website = %website,
            found = scraped.as_ref().and_then(|k| k.brand_name.as_deref()).unwrap_or("-"),
            "Brand metadata received"
        );
        Ok(scraped)
    }
}
