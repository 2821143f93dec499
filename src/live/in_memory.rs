use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::classifier::{InboundFrame, ReaderPayload};
use super::failure::TransportFault;
use super::transport::{Connector, Transport, TransportEvent};

#[derive(Debug, Clone)]
enum ConnectMode {
    Accept,
    Stall,
    Reject(TransportFault),
}

/// Connector whose remote end is driven in-process through a `RemotePeer`
///
/// Used by tests and by embedders that bridge the session to something other
/// than a socket.
pub struct InMemoryConnector {
    mode: ConnectMode,
    peers: Option<mpsc::UnboundedSender<RemotePeer>>,
}

impl InMemoryConnector {
    /// Accepting connector; each successful connect yields a peer on the receiver
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemotePeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                mode: ConnectMode::Accept,
                peers: Some(tx),
            },
            rx,
        )
    }

    /// Connector whose connect never completes
    pub fn stalled() -> Self {
        Self {
            mode: ConnectMode::Stall,
            peers: None,
        }
    }

    /// Connector whose connect fails immediately
    pub fn rejecting(fault: TransportFault) -> Self {
        Self {
            mode: ConnectMode::Reject(fault),
            peers: None,
        }
    }
}

#[async_trait::async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportFault> {
        match &self.mode {
            ConnectMode::Stall => {
                futures::future::pending::<()>().await;
                Err(TransportFault::Other("connect stalled".to_string()))
            }
            ConnectMode::Reject(fault) => Err(fault.clone()),
            ConnectMode::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let client_closed = Arc::new(AtomicBool::new(false));

                let peer = RemotePeer {
                    url: url.to_string(),
                    sent: outbound_rx,
                    events: inbound_tx,
                    client_closed: Arc::clone(&client_closed),
                };

                let peers = self
                    .peers
                    .as_ref()
                    .ok_or_else(|| TransportFault::Other("no peer listener".to_string()))?;
                peers
                    .send(peer)
                    .map_err(|_| TransportFault::Other("peer listener dropped".to_string()))?;

                debug!("In-memory transport opened");

                Ok(Box::new(InMemoryTransport {
                    outbound: outbound_tx,
                    inbound: inbound_rx,
                    client_closed,
                }))
            }
        }
    }
}

struct InMemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    client_closed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportFault> {
        if self.client_closed.load(Ordering::SeqCst) {
            return Err(TransportFault::Other("transport closed".to_string()));
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportFault::Other("remote peer gone".to_string()))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportFault> {
        self.client_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The remote end of an in-memory transport
pub struct RemotePeer {
    url: String,
    sent: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    client_closed: Arc<AtomicBool>,
}

impl RemotePeer {
    /// URL the client connected to, credential included
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next text frame sent by the client
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    pub fn try_next_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    /// Next client frame parsed as JSON
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        let text = self.next_sent().await?;
        serde_json::from_str(&text).ok()
    }

    pub fn is_closed_by_client(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Client transport dropped, event discarded");
        }
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Frame(InboundFrame::Text(text.into())));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.emit(TransportEvent::Frame(InboundFrame::Binary(bytes)));
    }

    /// Binary frame delivered as a deferred handle
    pub fn send_deferred(&self, bytes: Vec<u8>) {
        let payload = ReaderPayload::from_bytes(bytes);
        self.emit(TransportEvent::Frame(InboundFrame::Deferred(Box::new(payload))));
    }

    pub fn send_json(&self, value: &serde_json::Value) {
        self.send_text(value.to_string());
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.into(),
        });
    }

    pub fn fail(&self, fault: TransportFault) {
        self.emit(TransportEvent::Error(fault));
    }
}
