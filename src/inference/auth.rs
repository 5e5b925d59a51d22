//! Connection Authentication
//!
//! Single responsibility: Authenticate a freshly opened connection.
//!
//! # Authentication Flow
//!
//! 1. Send exactly one `authentication` task carrying the API key, plus the
//!    session token from a previous connection if one was issued.
//! 2. Wait for exactly one acknowledgement. The message router delivers it
//!    through a oneshot, so task results arriving meanwhile are still routed
//!    in arrival order.
//! 3. Store the session token from the acknowledgement for the next reconnect.
//!
//! Every failure here is retryable; the supervisor decides when to try again.

use std::fmt;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::protocol::{encode_batch, AuthenticationTask};
use super::transport::{send_text, WsSink};
use crate::error::AdforgeError;

/// Result of one authentication exchange as seen by the router.
pub type AuthOutcome = Result<String, AdforgeError>;

/// The API key. Never printed.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self(api_key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Runs the credential exchange and remembers the issued session token.
pub struct AuthenticationHandshake {
    credential: Credential,
    session: RwLock<Option<String>>,
    timeout: Duration,
}

impl AuthenticationHandshake {
    pub fn new(credential: Credential, timeout: Duration) -> Self {
        Self {
            credential,
            session: RwLock::new(None),
            timeout,
        }
    }

    /// The session token issued by the last successful exchange, if any.
    pub fn session_token(&self) -> Option<String> {
        self.session.read().map(|s| s.clone()).unwrap_or(None)
    }

    fn store_session(&self, token: Option<String>) {
        if let Ok(mut session) = self.session.write() {
            *session = token;
        }
    }

    /// Authenticate the connection behind `sink`.
    ///
    /// `acknowledgement` must already be registered with the connection's router.
    ///
    /// # Errors
    /// - `Transport` if sending fails or the connection closes first
    /// - `Authentication` on rejection, a malformed acknowledgement, or timeout
    pub async fn run(
        &self,
        sink: &mut WsSink,
        acknowledgement: oneshot::Receiver<AuthOutcome>,
    ) -> Result<String, AdforgeError> {
        let previous = self.session_token();
        debug!(resuming = previous.is_some(), "Authenticating connection");

        let frame = encode_batch(&AuthenticationTask::new(
            self.credential.expose(),
            previous.as_deref(),
        ))?;
        send_text(sink, frame).await?;

        match timeout(self.timeout, acknowledgement).await {
            Err(_) => Err(AdforgeError::Authentication(format!(
                "No acknowledgement within {:?}",
                self.timeout
            ))),
            Ok(Err(_)) => Err(AdforgeError::Transport(
                "Connection closed during authentication".into(),
            )),
            Ok(Ok(Err(e))) => {
                if matches!(e, AdforgeError::Authentication(_)) {
                    warn!(error = %e, "Authentication rejected, discarding session token");
                    self.store_session(None);
                }
                Err(e)
            }
            Ok(Ok(Ok(token))) => {
                info!(resumed = previous.as_deref() == Some(token.as_str()), "Authenticated");
                self.store_session(Some(token.clone()));
                Ok(token)
            }
        }
    }
}
