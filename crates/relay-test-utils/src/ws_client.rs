//! WebSocket test client
//!
//! Thin wrapper over `tokio-tungstenite` that speaks the relay's JSON frames
//! and fails fast instead of hanging when an expected event never arrives.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Default wait for an expected event.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Default quiet period for [`TestWsClient::expect_silence`].
pub const SILENCE_WINDOW: Duration = Duration::from_millis(200);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A connected test peer.
pub struct TestWsClient {
    stream: WsStream,
}

impl TestWsClient {
    /// Open a WebSocket connection.
    ///
    /// Fails if the handshake is rejected (for example `400 Invalid role`).
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", url, e))?;
        Ok(Self { stream })
    }

    /// Receive the next JSON frame, skipping control frames.
    pub async fn recv_json(&mut self) -> Result<Value, anyhow::Error> {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("Timed out waiting for a frame"))?;

            match frame {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| anyhow::anyhow!("Invalid JSON frame {}: {}", text, e));
                }
                Some(Ok(Message::Close(_))) | None => {
                    anyhow::bail!("Connection closed while waiting for a frame")
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => anyhow::bail!("WebSocket error: {}", e),
            }
        }
    }

    /// Receive the next JSON frame and check its `type`.
    pub async fn expect_event(&mut self, event_type: &str) -> Result<Value, anyhow::Error> {
        let event = self.recv_json().await?;
        if event["type"] != event_type {
            anyhow::bail!("Expected '{}' event, got {}", event_type, event);
        }
        Ok(event)
    }

    /// Receive events until one of `event_type` arrives, discarding the rest.
    pub async fn skip_until(&mut self, event_type: &str) -> Result<Value, anyhow::Error> {
        loop {
            let event = self.recv_json().await?;
            if event["type"] == event_type {
                return Ok(event);
            }
        }
    }

    /// Send a JSON value as a text frame.
    pub async fn send_json(&mut self, value: &Value) -> Result<(), anyhow::Error> {
        self.send_text(&value.to_string()).await
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send frame: {}", e))
    }

    /// Send a binary frame.
    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), anyhow::Error> {
        self.stream
            .send(Message::Binary(data))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send frame: {}", e))
    }

    /// Fail if any data frame arrives within [`SILENCE_WINDOW`].
    pub async fn expect_silence(&mut self) -> Result<(), anyhow::Error> {
        match timeout(SILENCE_WINDOW, self.stream.next()).await {
            Err(_) => Ok(()),
            Ok(Some(Ok(Message::Text(text)))) => anyhow::bail!("Unexpected frame: {}", text),
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                anyhow::bail!("Connection closed unexpectedly")
            }
            Ok(Some(Ok(_))) => Ok(()),
            Ok(Some(Err(e))) => anyhow::bail!("WebSocket error: {}", e),
        }
    }

    /// Wait for the server to close the connection.
    pub async fn expect_closed(&mut self) -> Result<(), anyhow::Error> {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("Timed out waiting for close"))?;
            match frame {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return Ok(()),
                Some(Ok(Message::Text(text))) => {
                    anyhow::bail!("Expected close, got frame: {}", text)
                }
                Some(Ok(_)) => {}
            }
        }
    }

    /// Close the connection with a normal close frame.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.stream
            .close(None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to close: {}", e))
    }
}
