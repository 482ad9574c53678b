//! Transport seam between the channel manager and the wire. Production runs
//! over tokio-tungstenite; tests drive the manager with an in-memory fake.

use crate::error::SyncError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// Close code reported when the peer vanishes without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Codes that mean the closure was intentional — no reconnect.
pub fn is_normal_close(code: u16) -> bool {
    code == 1000 || code == 1001
}

/// What a transport can hand back to the channel task.
#[derive(Debug)]
pub enum TransportEvent {
    Text(String),
    Closed { code: u16, reason: String },
    Error(String),
}

/// One live bidirectional connection.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError>;

    /// Next inbound event; `None` once the stream is finished.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Best-effort normal close.
    async fn close(&mut self);
}

/// Dials new transports. Injected into the channel manager so reconnection
/// logic can be exercised without a network.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn dial(&self, url: &str) -> Result<Box<dyn Transport>, SyncError>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct WsTransport {
    write: WsSink,
    read: WsSource,
}

/// The production connector.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn dial(&self, url: &str) -> Result<Box<dyn Transport>, SyncError> {
        let url = Url::parse(url)
            .map_err(|e| SyncError::Config(format!("Invalid channel URL '{}': {}", url, e)))?;

        log::info!("🌐 Dialing {}", url);
        let (stream, response) = connect_async(url.as_str()).await?;
        log::debug!("WebSocket handshake status: {}", response.status());

        let (write, read) = stream.split();
        Ok(Box::new(WsTransport { write, read }))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SyncError::Connectivity(format!("Send failed: {}", e)))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        while let Some(item) = self.read.next().await {
            match item {
                Ok(Message::Text(text)) => return Some(TransportEvent::Text(text.to_string())),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        None => (1005, String::new()),
                    };
                    return Some(TransportEvent::Closed { code, reason });
                }
                // tungstenite answers pings itself; both directions still
                // count as liveness upstream
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(other) => {
                    log::trace!("Ignoring non-text frame: {:?}", other);
                    continue;
                }
                Err(e) => return Some(TransportEvent::Error(e.to_string())),
            }
        }
        None
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        };
        let _ = self.write.send(Message::Close(Some(frame))).await;
        let _ = self.write.close().await;
    }
}
