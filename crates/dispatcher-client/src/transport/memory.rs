//! In-process transport for tests and embedding.
//!
//! [`MemoryConnector::new`] returns the connector and a receiver of
//! [`MemoryPeer`]s, one per accepted connection. The peer plays the server:
//! it reads what the client sent and injects frames back.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use dispatcher_core::{ClientError, Envelope, Result};

use super::{Connector, FRAME_BUFFER, OutboundFrame, TransportChannels, TransportEvent};

/// Connector that hands each connection to the test as a [`MemoryPeer`].
#[derive(Debug)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
}

impl MemoryConnector {
    /// Create a connector and the receiver of its server-side peers.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (accepted, peers) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            refuse: AtomicBool::new(false),
        };
        (connector, peers)
    }

    /// Make subsequent connection attempts fail (or succeed again).
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<TransportChannels> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ClientError::Transport {
                message: format!("connection to {url} refused"),
            });
        }
        let (out_tx, out_rx) = mpsc::channel(FRAME_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(FRAME_BUFFER);
        let peer = MemoryPeer {
            url: url.to_owned(),
            from_client: out_rx,
            to_client: in_tx,
        };
        self.accepted.send(peer).map_err(|_| ClientError::Transport {
            message: "memory listener dropped".into(),
        })?;
        Ok(TransportChannels {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    /// URL the client connected to.
    pub url: String,
    from_client: mpsc::Receiver<OutboundFrame>,
    to_client: mpsc::Sender<TransportEvent>,
}

impl MemoryPeer {
    /// Next raw frame from the client. `None` once the client closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        match self.from_client.recv().await? {
            OutboundFrame::Text(text) => Some(text),
            OutboundFrame::Close => None,
        }
    }

    /// Next frame from the client, decoded. Undecodable frames are skipped.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            let text = self.recv_text().await?;
            if let Ok(envelope) = Envelope::decode(&text) {
                return Some(envelope);
            }
        }
    }

    /// Send a raw text frame to the client.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .send(TransportEvent::Message(text.into()))
            .await
            .is_ok()
    }

    /// Encode and send an envelope to the client.
    pub async fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(text) => self.send_text(text).await,
            Err(_) => false,
        }
    }

    /// Close the connection from the server side.
    pub async fn close(self, reason: Option<&str>) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed {
                reason: reason.map(str::to_owned),
            })
            .await;
    }
}
