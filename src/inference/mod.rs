//! Image Inference Connection Module
//!
//! A multiplexed client for the Runware image-inference WebSocket API.
//!
//! # Architecture
//!
//! The module is organized by concern, with each submodule having a single responsibility:
//!
//! | Module       | Responsibility                                       |
//! |--------------|------------------------------------------------------|
//! | `transport`  | WebSocket connect/send/receive                       |
//! | `protocol`   | JSON wire format, request defaults, frame parsing    |
//! | `auth`       | Credential exchange and session token reuse          |
//! | `correlator` | Task UUID → waiting caller                           |
//! | `router`     | Classify inbound items and deliver them              |
//! | `supervisor` | Connection lifecycle and automatic reconnection      |
//! | `client`     | `submit()` for callers                               |
//!
//! # Key Design Principles
//!
//! ## 1. Readiness Is a Value, Not a Flag
//!
//! - The supervisor publishes a `ReadyHandle` when a connection authenticates
//! - Only a `ReadyHandle` can put a task on the wire
//! - Callers wait on a `watch` channel, never on a polling loop
//!
//! ## 2. Every Request Gets Exactly One Answer
//!
//! - Results are matched by task UUID, not by arrival order
//! - A dropped connection fails the tasks sent on it, and only those
//! - Shutdown fails everything still pending
//!
//! ## 3. Connections Are Numbered
//!
//! - Each connection attempt gets a fresh number
//! - A task remembers the connection it was sent on
//! - Late results from an old connection cannot resolve anything
//!
//! # Usage
//!
//! ```ignore
//! use adforge::inference::{ImageClient, ImageClientConfig, ImageRequest};
//!
//! let client = ImageClient::connect(ImageClientConfig {
//!     api_key: std::env::var("RUNWARE_API_KEY")?,
//!     ..Default::default()
//! });
//!
//! let image = client
//!     .submit(ImageRequest::new("minimal poster for a coffee brand").with_size(1024, 512))
//!     .await?;
//! ```

// Internal modules - not exposed publicly
mod auth;
mod correlator;
mod protocol;
mod router;
mod supervisor;
mod transport;

mod client;

// Re-export the public API
pub use auth::Credential;
pub use client::{ImageClient, ImageClientConfig};
pub use correlator::PendingTaskInfo;
pub use protocol::{
    GeneratedImage, ImageRequest, PromptWeighting, DEFAULT_CFG_SCALE, DEFAULT_DIMENSION,
    DEFAULT_MODEL, DEFAULT_OUTPUT_FORMAT, DEFAULT_SCHEDULER, DEFAULT_STEPS, DEFAULT_STRENGTH,
};
pub use supervisor::ConnectionState;
