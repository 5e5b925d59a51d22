//! Test infrastructure: an in-process stand-in for the image-inference endpoint
//!
//! Every accepted WebSocket connection is handed to the test, which scripts
//! the endpoint's side of the conversation frame by frame.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use adforge::ImageClientConfig;

pub const TEST_API_KEY: &str = "test-key";
const FRAME_WAIT: Duration = Duration::from_secs(5);

pub struct MockEndpoint {
    addr: String,
    connections: mpsc::UnboundedReceiver<MockConnection>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockEndpoint {
    /// Start listening on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, connections) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                match accept_async(stream).await {
                    Ok(ws) => {
                        if tx.send(MockConnection { ws }).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("Handshake error: {}", e),
                }
            }
        });

        Self {
            addr,
            connections,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Client config pointing at this endpoint with short test timings.
    pub fn client_config(&self) -> ImageClientConfig {
        ImageClientConfig {
            endpoint: self.url(),
            api_key: TEST_API_KEY.to_string(),
            reconnect_delay: Duration::from_millis(50),
            max_reconnect_attempts: 0,
            auth_timeout: Duration::from_secs(2),
            request_timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Wait for the client's next connection.
    pub async fn next_connection(&mut self) -> MockConnection {
        timeout(FRAME_WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("listener stopped")
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct MockConnection {
    ws: WebSocketStream<TcpStream>,
}

impl MockConnection {
    /// Next task sent by the client. Batches must contain exactly one task.
    pub async fn recv_task(&mut self) -> Value {
        self.try_recv_task(FRAME_WAIT)
            .await
            .expect("timed out waiting for a frame")
    }

    /// Like `recv_task`, but `None` if nothing arrives within `wait`.
    pub async fn try_recv_task(&mut self, wait: Duration) -> Option<Value> {
        loop {
            let message = match timeout(wait, self.ws.next()).await {
                Err(_) => return None,
                Ok(None) => panic!("client closed the connection"),
                Ok(Some(message)) => message.expect("websocket error"),
            };

            if let Message::Text(text) = message {
                let mut batch: Vec<Value> = serde_json::from_str(&text).unwrap();
                assert_eq!(batch.len(), 1, "expected a single-task batch: {}", text);
                return Some(batch.remove(0));
            }
        }
    }

    pub async fn send(&mut self, frame: Value) {
        self.ws
            .send(Message::Text(frame.to_string()))
            .await
            .unwrap();
    }

    /// Expect an authentication task, acknowledge it with `session`, and
    /// return the task as received.
    pub async fn authenticate(&mut self, session: &str) -> Value {
        let auth = self.recv_task().await;
        assert_eq!(auth["taskType"], "authentication");
        assert_eq!(auth["apiKey"], TEST_API_KEY);
        self.send(json!({
            "data": [{ "taskType": "authentication", "connectionSessionUUID": session }]
        }))
        .await;
        auth
    }

    /// Reply to an image task with a successful result.
    pub async fn complete(&mut self, task: &Value, image_url: &str) {
        self.send(result_frame(task, image_url)).await;
    }
}

pub fn result_frame(task: &Value, image_url: &str) -> Value {
    json!({
        "data": [{
            "taskType": "imageInference",
            "taskUUID": task["taskUUID"],
            "imageURL": image_url,
            "positivePrompt": task["positivePrompt"],
            "seed": 42,
            "NSFWContent": false
        }]
    })
}

/// Wait until `check` holds, polling briefly.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    timeout(FRAME_WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
