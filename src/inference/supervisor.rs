//! Connection Supervision
//!
//! Single responsibility: Keep one authenticated connection alive.
//!
//! # State Machine
//!
//! ```text
//!            ┌──────────────┐  connect ok   ┌────────────────┐  ack   ┌───────┐
//!  start ──▶ │  Connecting  │ ────────────▶ │ Authenticating │ ─────▶ │ Ready │
//!            └──────────────┘               └────────────────┘        └───────┘
//!                   ▲  │ fail                      │ fail                 │ drop
//!                   │  ▼                           ▼                      ▼
//!                   │ ┌──────────────────────────────────────────────────────┐
//!                   └─│              Disconnected (wait reconnect_delay)      │
//!                     └──────────────────────────────────────────────────────┘
//! ```
//!
//! The state lives in a `watch` channel owned by the supervisor task. Callers
//! never poll it: `ensure_ready()` waits for the next `Ready` (or terminal
//! close) and every concurrent caller observes the same transition.
//!
//! When a connection drops, its writer is torn down first and only then are
//! the tasks sent on it failed. A send racing the drop therefore either fails
//! outright or was registered in time to be failed.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::auth::AuthenticationHandshake;
use super::correlator::TaskCorrelator;
use super::router::{receive_loop, MessageRouter};
use super::transport::{send_text, Transport, WsSink};
use crate::error::AdforgeError;

/// Lifecycle of the supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

/// Permission to send on one specific, authenticated connection.
#[derive(Debug, Clone)]
pub struct ReadyHandle {
    connection: u64,
    outbound: mpsc::UnboundedSender<String>,
}

impl ReadyHandle {
    /// Identifier of the connection this handle sends on.
    pub fn connection(&self) -> u64 {
        self.connection
    }

    /// Queue a frame on the connection's writer.
    ///
    /// Fails once the connection has been torn down.
    pub fn send(&self, frame: String) -> Result<(), AdforgeError> {
        self.outbound.send(frame).map_err(|_| {
            AdforgeError::Transport(format!(
                "Connection {} closed before the request could be sent",
                self.connection
            ))
        })
    }
}

#[derive(Debug, Clone)]
enum Readiness {
    Pending(ConnectionState),
    Ready(ReadyHandle),
    Closed(String),
}

/// Configuration for the supervisor loop.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// WebSocket endpoint URL
    pub endpoint: String,
    /// Delay between reconnection attempts
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts before giving up (0 = unlimited)
    pub max_reconnect_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::config::DEFAULT_ENDPOINT.to_string(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Owns the connection lifecycle and publishes readiness.
pub struct ConnectionSupervisor {
    readiness: watch::Receiver<Readiness>,
    shutdown: watch::Sender<bool>,
    handshake: Arc<AuthenticationHandshake>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    /// Start supervising. Returns immediately; connecting happens in the background.
    pub fn spawn(
        config: SupervisorConfig,
        handshake: AuthenticationHandshake,
        correlator: Arc<TaskCorrelator>,
    ) -> Self {
        let (readiness_tx, readiness_rx) =
            watch::channel(Readiness::Pending(ConnectionState::Disconnected));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handshake = Arc::new(handshake);

        let worker = SupervisorLoop {
            config,
            handshake: Arc::clone(&handshake),
            correlator,
            readiness: readiness_tx,
        };
        let task = tokio::spawn(worker.run(shutdown_rx));

        Self {
            readiness: readiness_rx,
            shutdown: shutdown_tx,
            handshake,
            task: Mutex::new(Some(task)),
        }
    }

    /// Wait until the connection is ready to carry requests.
    ///
    /// # Errors
    /// `Connection` if the supervisor has shut down or gave up reconnecting.
    pub async fn ensure_ready(&self) -> Result<ReadyHandle, AdforgeError> {
        let mut readiness = self.readiness.clone();
        let current = readiness
            .wait_for(|r| matches!(r, Readiness::Ready(_) | Readiness::Closed(_)))
            .await
            .map_err(|_| AdforgeError::Connection("Supervisor stopped".into()))?;

        match &*current {
            Readiness::Ready(handle) => Ok(handle.clone()),
            Readiness::Closed(reason) => Err(AdforgeError::Connection(reason.clone())),
            Readiness::Pending(state) => Err(AdforgeError::Connection(format!(
                "Connection not ready ({:?})",
                state
            ))),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match &*self.readiness.borrow() {
            Readiness::Pending(state) => *state,
            Readiness::Ready(_) => ConnectionState::Ready,
            Readiness::Closed(_) => ConnectionState::Disconnected,
        }
    }

    /// Whether the supervisor has stopped for good.
    pub fn is_closed(&self) -> bool {
        matches!(&*self.readiness.borrow(), Readiness::Closed(_))
    }

    /// Session token from the most recent successful authentication.
    pub fn session_token(&self) -> Option<String> {
        self.handshake.session_token()
    }

    /// Stop the supervisor and wait for it to finish tearing down.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Supervisor task panicked");
                }
            }
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.lock().ok().and_then(|mut t| t.take()) {
            task.abort();
        }
        debug!("Supervisor dropped");
    }
}

/// How one connection attempt ended.
enum ConnectionEnd {
    /// Never reached Ready
    Failed(AdforgeError),
    /// Was Ready, then dropped
    Dropped(String),
}

/// Tasks scoped to one connection. Aborted on drop.
struct ConnectionTasks {
    reader: JoinHandle<String>,
    writer: Option<JoinHandle<String>>,
}

impl ConnectionTasks {
    /// Abort both tasks and wait until their resources are released.
    async fn shutdown(mut self) {
        // A finished task has already dropped its resources and must not be polled again
        if !self.reader.is_finished() {
            self.reader.abort();
            let _ = (&mut self.reader).await;
        }
        if let Some(writer) = self.writer.take() {
            if !writer.is_finished() {
                writer.abort();
                let _ = writer.await;
            }
        }
    }
}

impl Drop for ConnectionTasks {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(writer) = &self.writer {
            writer.abort();
        }
    }
}

struct SupervisorLoop {
    config: SupervisorConfig,
    handshake: Arc<AuthenticationHandshake>,
    correlator: Arc<TaskCorrelator>,
    readiness: watch::Sender<Readiness>,
}

impl SupervisorLoop {
    fn publish(&self, readiness: Readiness) {
        self.readiness.send_replace(readiness);
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(endpoint = %self.config.endpoint, "Connection supervisor started");

        let mut connection: u64 = 0;
        let mut failures: u32 = 0;

        let close_reason = loop {
            if *shutdown.borrow() {
                break "client shut down".to_string();
            }

            connection += 1;
            let mut tasks: Option<ConnectionTasks> = None;

            let end = tokio::select! {
                end = self.run_connection(connection, &mut tasks) => end,
                _ = shutdown.changed() => {
                    if let Some(tasks) = tasks.take() {
                        tasks.shutdown().await;
                    }
                    break "client shut down".to_string();
                }
            };

            // Stop accepting sends before failing what was sent
            self.publish(Readiness::Pending(ConnectionState::Disconnected));
            if let Some(tasks) = tasks.take() {
                tasks.shutdown().await;
            }

            let reason = match end {
                ConnectionEnd::Failed(e) => {
                    failures += 1;
                    warn!(
                        connection,
                        attempt = failures,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Connection attempt failed"
                    );
                    e.to_string()
                }
                ConnectionEnd::Dropped(reason) => {
                    failures = 0;
                    warn!(connection, reason = %reason, "Connection lost");
                    reason
                }
            };

            let failed = self
                .correlator
                .fail_connection(connection, &format!("connection lost: {}", reason));
            if failed > 0 {
                warn!(connection, failed, "Failed in-flight tasks after connection loss");
            }

            if self.config.max_reconnect_attempts > 0
                && failures >= self.config.max_reconnect_attempts
            {
                error!(
                    attempts = failures,
                    "Max reconnection attempts exceeded, giving up"
                );
                break format!(
                    "Max reconnection attempts ({}) exceeded: {}",
                    self.config.max_reconnect_attempts, reason
                );
            }

            debug!(delay_ms = self.config.reconnect_delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown.changed() => break "client shut down".to_string(),
            }
        };

        self.publish(Readiness::Closed(close_reason.clone()));
        let failed = self.correlator.fail_all(&close_reason);
        info!(reason = %close_reason, failed, "Connection supervisor stopped");
    }

    /// Drive one connection from connect to drop.
    ///
    /// Spawned tasks are parked in `tasks` so the caller can tear them down
    /// whichever way this future ends.
    async fn run_connection(
        &self,
        connection: u64,
        tasks: &mut Option<ConnectionTasks>,
    ) -> ConnectionEnd {
        self.publish(Readiness::Pending(ConnectionState::Connecting));
        debug!(connection, endpoint = %self.config.endpoint, "Connecting");

        let transport = match Transport::connect(&self.config.endpoint).await {
            Ok(transport) => transport,
            Err(e) => return ConnectionEnd::Failed(e),
        };
        let (mut sink, stream) = transport.split();

        let router = Arc::new(MessageRouter::new(connection, Arc::clone(&self.correlator)));
        let acknowledgement = router.await_authentication();
        let reader = tokio::spawn(receive_loop(stream, Arc::clone(&router)));
        *tasks = Some(ConnectionTasks {
            reader,
            writer: None,
        });

        self.publish(Readiness::Pending(ConnectionState::Authenticating));
        if let Err(e) = self.handshake.run(&mut sink, acknowledgement).await {
            return ConnectionEnd::Failed(e);
        }

        let (outbound, frames) = mpsc::unbounded_channel();
        let Some(active) = tasks.as_mut() else {
            return ConnectionEnd::Failed(AdforgeError::Transport("Reader task missing".into()));
        };
        active.writer = Some(tokio::spawn(write_loop(connection, sink, frames)));

        self.publish(Readiness::Ready(ReadyHandle {
            connection,
            outbound,
        }));
        info!(connection, "Connection ready");

        let Some(ConnectionTasks {
            reader,
            writer: Some(writer),
        }) = tasks.as_mut()
        else {
            return ConnectionEnd::Dropped("Connection tasks missing".into());
        };

        tokio::select! {
            reason = reader => ConnectionEnd::Dropped(
                reason.unwrap_or_else(|e| format!("receiver task ended: {}", e)),
            ),
            reason = writer => ConnectionEnd::Dropped(
                reason.unwrap_or_else(|e| format!("writer task ended: {}", e)),
            ),
        }
    }
}

/// Writer loop - owns the sink and the outbound queue of one connection.
async fn write_loop(
    connection: u64,
    mut sink: WsSink,
    mut frames: mpsc::UnboundedReceiver<String>,
) -> String {
    use futures_util::SinkExt;

    while let Some(frame) = frames.recv().await {
        if let Err(e) = send_text(&mut sink, frame).await {
            error!(connection, error = %e, "Send failed");
            return e.to_string();
        }
    }

    let _ = sink.close().await;
    "outbound queue closed".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::auth::Credential;

    fn unreachable_endpoint() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    fn handshake() -> AuthenticationHandshake {
        AuthenticationHandshake::new(Credential::new("key"), Duration::from_millis(200))
    }

    #[test]
    fn test_supervisor_config_default() {
        let config = SupervisorConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn test_bounded_retries_close_supervisor() {
        let supervisor = ConnectionSupervisor::spawn(
            SupervisorConfig {
                endpoint: unreachable_endpoint(),
                reconnect_delay: Duration::from_millis(10),
                max_reconnect_attempts: 2,
            },
            handshake(),
            Arc::new(TaskCorrelator::new()),
        );

        let result = supervisor.ensure_ready().await;
        assert!(matches!(result, Err(AdforgeError::Connection(_))));
        assert!(supervisor.is_closed());
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_outcome() {
        let supervisor = Arc::new(ConnectionSupervisor::spawn(
            SupervisorConfig {
                endpoint: unreachable_endpoint(),
                reconnect_delay: Duration::from_millis(10),
                max_reconnect_attempts: 1,
            },
            handshake(),
            Arc::new(TaskCorrelator::new()),
        ));

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let supervisor = Arc::clone(&supervisor);
                tokio::spawn(async move { supervisor.ensure_ready().await })
            })
            .collect();

        for waiter in waiters {
            let result = waiter.await.unwrap();
            assert!(matches!(result, Err(AdforgeError::Connection(_))));
        }
    }

    #[tokio::test]
    async fn test_shutdown_fails_waiters() {
        let supervisor = ConnectionSupervisor::spawn(
            SupervisorConfig {
                endpoint: unreachable_endpoint(),
                reconnect_delay: Duration::from_secs(60),
                max_reconnect_attempts: 0,
            },
            handshake(),
            Arc::new(TaskCorrelator::new()),
        );

        supervisor.shutdown().await;
        assert!(supervisor.is_closed());
        assert!(supervisor.ensure_ready().await.is_err());
    }

    #[tokio::test]
    async fn test_ready_handle_send_fails_after_close() {
        let (outbound, frames) = mpsc::unbounded_channel();
        let handle = ReadyHandle {
            connection: 4,
            outbound,
        };
        assert!(handle.send("[]".into()).is_ok());
        drop(frames);
        assert!(matches!(handle.send("[]".into()), Err(AdforgeError::Transport(_))));
    }
}
