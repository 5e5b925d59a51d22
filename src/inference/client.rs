//! Image Client
//!
//! Single responsibility: Turn a typed request into a result over the shared connection.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                      ImageClient                        │
//! │  - Exposes submit() to callers                          │
//! │  - Composes the wire task from request + defaults       │
//! │  - Registers the task, sends it, awaits the result      │
//! └────────────────────────────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌──────────────────────────────┐  ┌──────────────────────────┐
//! │     ConnectionSupervisor     │  │      TaskCorrelator       │
//! │  - Connect, authenticate     │  │  - task UUID → oneshot    │
//! │  - Reconnect after drops     │  │  - resolve exactly once   │
//! │  - Publishes readiness       │  └──────────────────────────┘
//! └──────────────────────────────┘               ▲
//!                │                               │
//!                ▼                               │
//!       Transport ──────▶ MessageRouter ─────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let client = ImageClient::connect(ImageClientConfig {
//!     api_key: "...".to_string(),
//!     ..Default::default()
//! });
//!
//! // Waits for the connection if it is not ready yet
//! let image = client.submit(ImageRequest::new("red sneaker ad")).await?;
//! println!("{}", image.image_url);
//! ```
//!
//! Explicit task failures are returned as-is; retry policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::{AuthenticationHandshake, Credential};
use super::correlator::{PendingGuard, PendingTaskInfo, TaskCorrelator};
use super::protocol::{encode_batch, GeneratedImage, ImageInferenceTask, ImageRequest};
use super::supervisor::{ConnectionState, ConnectionSupervisor, SupervisorConfig};
use crate::config::{Config, DEFAULT_ENDPOINT};
use crate::error::AdforgeError;

/// Configuration for the image client.
#[derive(Debug, Clone)]
pub struct ImageClientConfig {
    /// WebSocket endpoint URL
    pub endpoint: String,
    /// API key sent on every (re)authentication
    pub api_key: String,
    /// Delay between reconnection attempts
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts before giving up (0 = unlimited)
    pub max_reconnect_attempts: u32,
    /// How long to wait for the authentication acknowledgement
    pub auth_timeout: Duration,
    /// Per-request timeout, None to wait indefinitely
    pub request_timeout: Option<Duration>,
}

impl Default for ImageClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 0, // Unlimited
            auth_timeout: Duration::from_secs(10),
            request_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl ImageClientConfig {
    /// Build from file config. None when no credential is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.credential()?;
        Some(Self {
            endpoint: config.endpoint.clone(),
            api_key: api_key.to_string(),
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            auth_timeout: config.auth_timeout(),
            request_timeout: config.request_timeout(),
        })
    }
}

/// Client for the image-inference endpoint.
///
/// # Guarantees
///
/// - Many `submit()` calls may be in flight at once over one connection
/// - A request is only written once the connection is authenticated
/// - Every submitted request resolves: with its own result, its own error,
///   a transport failure, a timeout, or teardown
///
/// # Non-Guarantees
///
/// - Requests are not resent after a connection drop
/// - Results arrive in no particular order
pub struct ImageClient {
    config: ImageClientConfig,
    supervisor: ConnectionSupervisor,
    correlator: Arc<TaskCorrelator>,
}

impl ImageClient {
    /// Create the client and start connecting in the background.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn connect(config: ImageClientConfig) -> Self {
        info!(endpoint = %config.endpoint, "Creating image client");

        let correlator = Arc::new(TaskCorrelator::new());
        let handshake = AuthenticationHandshake::new(
            Credential::new(config.api_key.clone()),
            config.auth_timeout,
        );
        let supervisor = ConnectionSupervisor::spawn(
            SupervisorConfig {
                endpoint: config.endpoint.clone(),
                reconnect_delay: config.reconnect_delay,
                max_reconnect_attempts: config.max_reconnect_attempts,
            },
            handshake,
            Arc::clone(&correlator),
        );

        Self {
            config,
            supervisor,
            correlator,
        }
    }

    /// Generate an image.
    ///
    /// Waits for the connection if needed, then sends the request with
    /// defaults filled in and waits for its result. The request timeout
    /// covers the whole call, including the wait for a ready connection.
    ///
    /// # Errors
    /// - `Task` if the endpoint rejected this request
    /// - `Transport` if the connection dropped before the result arrived
    /// - `Timeout` if no result arrived within the request timeout
    /// - `Connection` / `Closed` if the client gave up or was shut down
    pub async fn submit(&self, request: ImageRequest) -> Result<GeneratedImage, AdforgeError> {
        let task_uuid = Uuid::new_v4();
        let task = ImageInferenceTask::compose(task_uuid, &request);
        let frame = encode_batch(&task)?;

        debug!(task_uuid = %task_uuid, model = %task.model, "Submitting image task");

        let image = match self.config.request_timeout {
            // Dropping the inner future on expiry releases its pending entry
            Some(limit) => tokio::time::timeout(limit, self.dispatch(task_uuid, task, frame))
                .await
                .map_err(|_| {
                    warn!(task_uuid = %task_uuid, state = ?self.state(), "Image task timed out");
                    AdforgeError::Timeout(format!(
                        "No result for task {} within {:?}",
                        task_uuid, limit
                    ))
                })??,
            None => self.dispatch(task_uuid, task, frame).await?,
        };

        info!(task_uuid = %task_uuid, image_url = %image.image_url, "Image generated");
        Ok(image)
    }

    /// Wait for readiness, register, send, and wait for the result.
    async fn dispatch(
        &self,
        task_uuid: Uuid,
        task: ImageInferenceTask,
        frame: String,
    ) -> Result<GeneratedImage, AdforgeError> {
        let handle = self.supervisor.ensure_ready().await?;
        let receiver = self
            .correlator
            .register(task_uuid, handle.connection(), task)?;
        let _guard = PendingGuard::new(&self.correlator, task_uuid);

        handle.send(frame)?;

        receiver.await.map_err(|_| {
            AdforgeError::Closed(format!("Task {} was dropped without a result", task_uuid))
        })?
    }

    /// Wait until the connection is authenticated.
    pub async fn wait_until_ready(&self) -> Result<(), AdforgeError> {
        self.supervisor.ensure_ready().await.map(|_| ())
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Whether the client has stopped for good (shut down or out of retries).
    pub fn is_closed(&self) -> bool {
        self.supervisor.is_closed()
    }

    /// Number of tasks awaiting a result.
    pub fn pending_tasks(&self) -> usize {
        self.correlator.len()
    }

    pub fn pending_snapshot(&self) -> Vec<PendingTaskInfo> {
        self.correlator.snapshot()
    }

    /// Session token issued by the endpoint, if authenticated at least once.
    pub fn session_token(&self) -> Option<String> {
        self.supervisor.session_token()
    }

    /// Stop reconnecting and fail every pending task.
    pub async fn shutdown(&self) {
        info!("Shutting down image client");
        self.supervisor.shutdown().await;
        self.correlator.fail_all("client shut down");
    }
}

impl Drop for ImageClient {
    fn drop(&mut self) {
        let failed = self.correlator.fail_all("client dropped");
        if failed > 0 {
            debug!(failed, "Failed pending tasks on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ImageClientConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_attempts, 0); // Unlimited
    }

    #[test]
    fn test_from_config_requires_credential() {
        assert!(ImageClientConfig::from_config(&Config::default()).is_none());

        let config = Config {
            api_key: Some("key".into()),
            request_timeout_ms: 0,
            ..Default::default()
        };
        let client_config = ImageClientConfig::from_config(&config).unwrap();
        assert_eq!(client_config.api_key, "key");
        assert!(client_config.request_timeout.is_none());
    }

    fn unreachable_endpoint() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);
        endpoint
    }

    #[tokio::test]
    async fn test_timeout_covers_wait_for_connection() {
        let client = ImageClient::connect(ImageClientConfig {
            endpoint: unreachable_endpoint(),
            api_key: "key".into(),
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_attempts: 0,
            request_timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        });

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            client.submit(ImageRequest::new("red sneaker ad")),
        )
        .await
        .expect("submit must honour the request timeout while disconnected");

        assert!(matches!(result, Err(AdforgeError::Timeout(_))));
        assert_eq!(client.pending_tasks(), 0);
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let client = ImageClient::connect(ImageClientConfig {
            endpoint: unreachable_endpoint(),
            api_key: "key".into(),
            reconnect_delay: Duration::from_secs(60),
            ..Default::default()
        });
        client.shutdown().await;
        assert!(client.is_closed());

        let result = client.submit(ImageRequest::new("p")).await;
        assert!(matches!(result, Err(AdforgeError::Connection(_))));
        assert_eq!(client.pending_tasks(), 0);
    }
}
