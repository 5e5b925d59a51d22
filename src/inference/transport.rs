//! WebSocket Transport Layer
//!
//! Single responsibility: Connect to a WebSocket and send/receive text frames.
//! No knowledge of the inference protocol, authentication, or reconnection.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::USER_AGENT, HeaderValue, Request},
        protocol::Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::AdforgeError;

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// A connected WebSocket transport.
///
/// Raw duplex text channel. Can only be constructed via `Transport::connect()`.
pub struct Transport {
    sink: WsSink,
    stream: WsStream,
}

impl Transport {
    /// Connect to a WebSocket endpoint (`ws://` or `wss://`).
    pub async fn connect(url: &str) -> Result<Self, AdforgeError> {
        debug!(url = %url, "Connecting to WebSocket");

        let (ws, response) = connect_async(upgrade_request(url)?)
            .await
            .map_err(|e| AdforgeError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(url = %url, status = %response.status(), "WebSocket connected");
        Ok(Self { sink, stream })
    }

    /// Split into separate sink and stream for concurrent send/receive.
    pub fn split(self) -> (WsSink, WsStream) {
        (self.sink, self.stream)
    }
}

/// Send one text frame on a split sink.
pub async fn send_text(sink: &mut WsSink, text: String) -> Result<(), AdforgeError> {
    sink.send(Message::Text(text))
        .await
        .map_err(|e| AdforgeError::Transport(format!("Failed to send: {}", e)))
}

/// Receive the next text frame from a split stream.
///
/// Returns None if the connection is closed.
/// Binary frames are accepted when they hold UTF-8. Ping/pong is handled by tungstenite.
pub async fn recv_text(stream: &mut WsStream) -> Result<Option<String>, AdforgeError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(text)),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => return Ok(Some(text)),
                Err(_) => {
                    debug!("Skipping non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(AdforgeError::Transport(format!("WebSocket error: {}", e))),
            None => return Ok(None),
        }
    }
}

/// Upgrade request for `url`. Host and handshake headers come from the URL.
fn upgrade_request(url: &str) -> Result<Request<()>, AdforgeError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| AdforgeError::Transport(format!("Invalid endpoint {:?}: {}", url, e)))?;
    request.headers_mut().insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("adforge/", env!("CARGO_PKG_VERSION"))),
    );
    Ok(request)
}
