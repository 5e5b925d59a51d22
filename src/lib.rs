//! adforge - AI ad creative generation
//!
//! Takes a campaign brief (prompt plus brand details) and produces a creative:
//! headline, description, call to action and a banner image.
//!
//! ## Architecture
//!
//! - **inference**: persistent, authenticated WebSocket client for the Runware
//!   image API. Many requests share one connection and are matched to results
//!   by task UUID. Reconnects on its own.
//! - **brand**: brand details from the brief, enriched by the scraper service
//! - **copy**: ad copy
//! - **placeholder**: local SVG banner used when no image can be generated
//! - **campaign**: ties the above together
//!
//! ## Config Layout
//!
//! ```text
//! ~/.config/adforge/
//! └── config.toml            # endpoint, api_key, timeouts, placeholder style
//! ```

pub mod brand;
pub mod campaign;
pub mod config;
pub mod copy;
pub mod error;
pub mod inference;
pub mod placeholder;

pub use brand::{BrandKit, BrandSource, HttpBrandScraper};
pub use campaign::{AdCreative, AdFormat, Campaign, CampaignBrief, ImageRef};
pub use config::{default_config_path, Config, PlaceholderConfig};
pub use copy::{AdCopy, CopyWriter, TemplateCopyWriter};
pub use error::{AdforgeError, Result};
pub use inference::{ConnectionState, GeneratedImage, ImageClient, ImageClientConfig, ImageRequest};
pub use placeholder::generate_placeholder_banner;
