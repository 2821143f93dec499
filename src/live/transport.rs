use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::classifier::InboundFrame;
use super::failure::TransportFault;

/// What a transport reports after it is open
#[derive(Debug)]
pub enum TransportEvent {
    Frame(InboundFrame),
    Closed { code: u16, reason: String },
    Error(TransportFault),
}

/// An open bidirectional message transport
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportFault>;

    /// Next inbound event, `None` once the transport is finished
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Close with a normal closure code
    async fn close(&mut self) -> Result<(), TransportFault>;
}

/// Opens transports to a URL
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportFault>;
}

// ============================================================================
// WebSocket
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector over rustls with webpki roots
#[derive(Debug, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        // Process-wide crypto provider; fails harmlessly if one is installed
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn fault_from(err: tungstenite::Error) -> TransportFault {
    match err {
        tungstenite::Error::Http(response) => TransportFault::Rejected {
            status: response.status().as_u16(),
        },
        tungstenite::Error::Tls(e) => TransportFault::Tls(e.to_string()),
        tungstenite::Error::Protocol(e) => TransportFault::Protocol(e.to_string()),
        other => TransportFault::Other(other.to_string()),
    }
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportFault> {
        info!("Opening WebSocket to {}", redact(url));

        let (stream, response) = connect_async(url).await.map_err(fault_from)?;
        debug!("WebSocket upgrade answered with {}", response.status());

        let (sink, stream) = stream.split();
        Ok(Box::new(WsTransport {
            sink,
            stream,
            finished: false,
        }))
    }
}

pub struct WsTransport {
    sink: SplitSink<WsStream, tungstenite::Message>,
    stream: SplitStream<WsStream>,
    finished: bool,
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportFault> {
        self.sink
            .send(tungstenite::Message::Text(text.into()))
            .await
            .map_err(fault_from)
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.finished {
            return None;
        }

        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(match e {
                        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                            TransportEvent::Closed {
                                code: 1006,
                                reason: String::new(),
                            }
                        }
                        other => TransportEvent::Error(fault_from(other)),
                    });
                }
                None => {
                    // Stream ended without a close frame
                    self.finished = true;
                    return Some(TransportEvent::Closed {
                        code: 1006,
                        reason: String::new(),
                    });
                }
            };

            match message {
                tungstenite::Message::Text(text) => {
                    return Some(TransportEvent::Frame(InboundFrame::Text(text.to_string())))
                }
                tungstenite::Message::Binary(bytes) => {
                    return Some(TransportEvent::Frame(InboundFrame::Binary(bytes.to_vec())))
                }
                tungstenite::Message::Close(frame) => {
                    self.finished = true;
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        // Close without a status code
                        None => (1005, String::new()),
                    };
                    return Some(TransportEvent::Closed { code, reason });
                }
                // Ping/pong are answered by tungstenite
                _ => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportFault> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        match self.sink.send(tungstenite::Message::Close(Some(frame))).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send close frame: {}", e);
                Err(fault_from(e))
            }
        }
    }
}
