//! Inbound Message Routing
//!
//! Single responsibility: Classify each inbound item and hand it to whoever
//! is waiting for it. Authentication results go to the pending handshake,
//! task results go to the correlator. One router exists per connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::auth::AuthOutcome;
use super::correlator::TaskCorrelator;
use super::protocol::{parse_frame, InboundItem};
use super::transport::{recv_text, WsStream};
use crate::error::AdforgeError;

pub struct MessageRouter {
    connection: u64,
    correlator: Arc<TaskCorrelator>,
    auth_waiter: Mutex<Option<oneshot::Sender<AuthOutcome>>>,
    dropped_frames: AtomicU64,
}

impl MessageRouter {
    pub fn new(connection: u64, correlator: Arc<TaskCorrelator>) -> Self {
        Self {
            connection,
            correlator,
            auth_waiter: Mutex::new(None),
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub fn connection(&self) -> u64 {
        self.connection
    }

    /// Register interest in the next authentication result.
    ///
    /// Replaces any earlier waiter, which then observes a closed channel.
    pub fn await_authentication(&self) -> oneshot::Receiver<AuthOutcome> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut waiter) = self.auth_waiter.lock() {
            *waiter = Some(tx);
        }
        rx
    }

    fn take_auth_waiter(&self) -> Option<oneshot::Sender<AuthOutcome>> {
        self.auth_waiter.lock().ok().and_then(|mut w| w.take())
    }

    /// Route one raw frame. Never fails; bad frames are logged and dropped.
    pub fn on_message(&self, raw: &str) {
        let items = match parse_frame(raw) {
            Ok(items) => items,
            Err(e) => {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!(connection = self.connection, error = %e, "Dropping malformed frame");
                return;
            }
        };

        for item in items {
            self.route(item);
        }
    }

    fn route(&self, item: InboundItem) {
        match item {
            InboundItem::Authenticated { session_token } => match self.take_auth_waiter() {
                Some(waiter) => {
                    let _ = waiter.send(Ok(session_token));
                }
                None => debug!(
                    connection = self.connection,
                    "Unsolicited authentication result, ignoring"
                ),
            },
            InboundItem::AuthenticationFailed { message } => match self.take_auth_waiter() {
                Some(waiter) => {
                    let _ = waiter.send(Err(AdforgeError::Authentication(message)));
                }
                None => warn!(
                    connection = self.connection,
                    message = %message,
                    "Authentication failure with no handshake in progress"
                ),
            },
            InboundItem::TaskResult { task_uuid, outcome } => {
                let outcome = outcome
                    .map_err(|message| AdforgeError::Task { task_uuid, message });
                self.correlator.resolve_on(self.connection, task_uuid, outcome);
            }
            InboundItem::Unroutable { reason } => {
                warn!(connection = self.connection, reason = %reason, "Discarding unroutable item");
            }
        }
    }

    /// Report a transport-level failure. A pending handshake fails with it.
    pub fn on_transport_error(&self, error: AdforgeError) {
        warn!(connection = self.connection, error = %error, "Transport error");
        if let Some(waiter) = self.take_auth_waiter() {
            let _ = waiter.send(Err(error));
        }
    }

    /// Frames dropped because they could not be parsed.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

/// Receiver loop - runs in a spawned task for the lifetime of one connection.
///
/// Returns a description of why the connection ended.
pub async fn receive_loop(mut stream: WsStream, router: Arc<MessageRouter>) -> String {
    debug!(connection = router.connection(), "Receiver loop started");

    let reason = loop {
        match recv_text(&mut stream).await {
            Ok(Some(text)) => router.on_message(&text),
            Ok(None) => {
                info!(connection = router.connection(), "Endpoint closed connection");
                break "connection closed by endpoint".to_string();
            }
            Err(e) => {
                let reason = e.to_string();
                router.on_transport_error(e);
                break reason;
            }
        }
    };

    if let Some(waiter) = router.take_auth_waiter() {
        let _ = waiter.send(Err(AdforgeError::Transport(reason.clone())));
    }

    let dropped = router.dropped_frames();
    if dropped > 0 {
        warn!(connection = router.connection(), dropped, "Malformed frames dropped on this connection");
    }
    debug!(connection = router.connection(), "Receiver loop ended");
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::correlator::TaskOutcome;
    use crate::inference::protocol::{ImageInferenceTask, ImageRequest};
    use serde_json::json;
    use uuid::Uuid;

    fn setup() -> (Arc<TaskCorrelator>, MessageRouter) {
        let correlator = Arc::new(TaskCorrelator::new());
        let router = MessageRouter::new(1, Arc::clone(&correlator));
        (correlator, router)
    }

    fn register(
        correlator: &TaskCorrelator,
        connection: u64,
    ) -> (Uuid, oneshot::Receiver<TaskOutcome>) {
        let id = Uuid::new_v4();
        let task = ImageInferenceTask::compose(id, &ImageRequest::new("p"));
        let rx = correlator.register(id, connection, task).unwrap();
        (id, rx)
    }

    fn result_frame(id: Uuid, url: &str) -> String {
        json!({
            "data": [{
                "taskType": "imageInference",
                "taskUUID": id.to_string(),
                "imageURL": url,
                "positivePrompt": "p",
                "seed": 3,
                "NSFWContent": false
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_auth_ack_reaches_waiter() {
        let (_, router) = setup();
        let rx = router.await_authentication();
        router.on_message(r#"{"data":[{"taskType":"authentication","connectionSessionUUID":"s1"}]}"#);
        assert_eq!(rx.await.unwrap().unwrap(), "s1");
    }

    #[tokio::test]
    async fn test_auth_rejection_reaches_waiter() {
        let (_, router) = setup();
        let rx = router.await_authentication();
        router.on_message(
            r#"{"errors":[{"taskType":"authentication","message":"Invalid API key"}]}"#,
        );
        assert!(matches!(rx.await.unwrap(), Err(AdforgeError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_out_of_order_results_match_identifiers() {
        let (correlator, router) = setup();
        let (a, rx_a) = register(&correlator, 1);
        let (b, rx_b) = register(&correlator, 1);

        router.on_message(&result_frame(b, "https://img/b"));
        router.on_message(&result_frame(a, "https://img/a"));

        let image_a = rx_a.await.unwrap().unwrap();
        let image_b = rx_b.await.unwrap().unwrap();
        assert_eq!((image_a.task_uuid, image_a.image_url.as_str()), (a, "https://img/a"));
        assert_eq!((image_b.task_uuid, image_b.image_url.as_str()), (b, "https://img/b"));
    }

    #[tokio::test]
    async fn test_task_error_is_scoped_to_task() {
        let (correlator, router) = setup();
        let (bad, rx_bad) = register(&correlator, 1);
        let (good, _rx_good) = register(&correlator, 1);

        router.on_message(
            &json!({ "errors": [{ "message": "nope", "taskUUID": bad.to_string() }] }).to_string(),
        );

        match rx_bad.await.unwrap() {
            Err(AdforgeError::Task { task_uuid, message }) => {
                assert_eq!(task_uuid, bad);
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(correlator.contains(good));
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let (_, router) = setup();
        router.on_message("{{{");
        router.on_message(r#"{"unexpected":true}"#);
        assert_eq!(router.dropped_frames(), 2);
    }

    #[tokio::test]
    async fn test_results_for_other_connection_are_ignored() {
        let (correlator, router) = setup();
        let (id, _rx) = register(&correlator, 7);
        router.on_message(&result_frame(id, "https://img/stale"));
        assert!(correlator.contains(id));
    }

    #[tokio::test]
    async fn test_transport_error_fails_handshake() {
        let (_, router) = setup();
        let rx = router.await_authentication();
        router.on_transport_error(AdforgeError::Transport("reset".into()));
        assert!(matches!(rx.await.unwrap(), Err(AdforgeError::Transport(_))));
    }
}
