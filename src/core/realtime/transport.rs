//! Transport abstraction for the realtime protocol client.
//!
//! The client is written against a single injected transport, chosen once
//! at startup. Production uses a tokio-tungstenite WebSocket; tests inject
//! channel-backed fakes so connection loss and replay can be driven
//! deterministically.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use super::base::{RealtimeError, RealtimeResult};

/// A framed message crossing the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
    /// JSON text frame
    Text(String),
    /// Binary frame (not used by the protocol, passed through for completeness)
    Binary(Vec<u8>),
    /// Keep-alive ping
    Ping(Vec<u8>),
    /// Keep-alive pong
    Pong(Vec<u8>),
    /// Close notification
    Close,
}

/// Outbound half of an open connection.
pub type TransportSink = Pin<Box<dyn Sink<TransportFrame, Error = RealtimeError> + Send>>;

/// Inbound half of an open connection.
pub type TransportStream =
    Pin<Box<dyn Stream<Item = RealtimeResult<TransportFrame>> + Send>>;

/// Connection parameters resolved at client construction.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Full WebSocket URL including query parameters
    pub url: String,
    /// Extra headers (authentication and protocol negotiation)
    pub headers: Vec<(String, String)>,
}

/// One injected transport implementation, able to open connections to the
/// provider on demand (initial connect and every reconnect attempt).
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a connection and return its framed halves.
    async fn open(&self, request: &ConnectRequest) -> RealtimeResult<(TransportSink, TransportStream)>;
}

// =============================================================================
// WebSocket implementation
// =============================================================================

/// Production transport backed by tokio-tungstenite.
#[derive(Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    pub fn new() -> Self {
        Self
    }
}

fn frame_to_message(frame: TransportFrame) -> Message {
    match frame {
        TransportFrame::Text(text) => Message::Text(text.into()),
        TransportFrame::Binary(data) => Message::Binary(data.into()),
        TransportFrame::Ping(data) => Message::Ping(data.into()),
        TransportFrame::Pong(data) => Message::Pong(data.into()),
        TransportFrame::Close => Message::Close(None),
    }
}

fn message_to_frame(message: Message) -> TransportFrame {
    match message {
        Message::Text(text) => TransportFrame::Text(text.to_string()),
        Message::Binary(data) => TransportFrame::Binary(data.to_vec()),
        Message::Ping(data) => TransportFrame::Ping(data.to_vec()),
        Message::Pong(data) => TransportFrame::Pong(data.to_vec()),
        Message::Close(_) | Message::Frame(_) => TransportFrame::Close,
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn open(
        &self,
        request: &ConnectRequest,
    ) -> RealtimeResult<(TransportSink, TransportStream)> {
        let url = url::Url::parse(&request.url)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid URL: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| RealtimeError::InvalidConfiguration("URL has no host".to_string()))?
            .to_string();

        let mut builder = http::Request::builder()
            .uri(request.url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            );
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let http_request = builder
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(http_request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let (ws_sink, ws_stream) = ws_stream.split();

        let sink = ws_sink
            .sink_map_err(|e| RealtimeError::WebSocketError(e.to_string()))
            .with(|frame: TransportFrame| {
                futures_util::future::ready(Ok::<Message, RealtimeError>(frame_to_message(frame)))
            });

        let stream = ws_stream.map(|result| {
            result
                .map(message_to_frame)
                .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_message_round_trip() {
        let frame = TransportFrame::Text("{\"type\":\"response.cancel\"}".to_string());
        let message = frame_to_message(frame.clone());
        assert_eq!(message_to_frame(message), frame);

        let ping = TransportFrame::Ping(vec![1, 2, 3]);
        assert_eq!(message_to_frame(frame_to_message(ping.clone())), ping);
    }

    #[test]
    fn test_close_maps_to_close() {
        assert_eq!(
            message_to_frame(Message::Close(None)),
            TransportFrame::Close
        );
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_url() {
        let transport = WebSocketTransport::new();
        let request = ConnectRequest {
            url: "not a url".to_string(),
            headers: vec![],
        };
        let result = transport.open(&request).await;
        assert!(matches!(
            result,
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }
}
