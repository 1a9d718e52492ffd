//! Transport seam between the event loop and the socket.
//!
//! The event loop never touches a socket directly. A [`Connector`] opens a
//! connection and hands back a [`TransportChannels`] pair: frames written to
//! `outbound` go to the server, and everything the server sends (or the
//! connection closing) arrives on `inbound`.

mod memory;
mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use dispatcher_core::Result;

pub use memory::{MemoryConnector, MemoryPeer};
pub use ws::WsConnector;

/// Buffer size of the outbound and inbound frame channels.
pub const FRAME_BUFFER: usize = 256;

/// Frame queued for the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Text frame.
    Text(String),
    /// Close the connection.
    Close,
}

/// Something that happened on the connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text frame from the server.
    Message(String),
    /// Connection closed by either side or failed.
    Closed {
        /// Close reason, when one was given.
        reason: Option<String>,
    },
}

/// Channels of one established connection.
pub struct TransportChannels {
    /// Frames to send.
    pub outbound: mpsc::Sender<OutboundFrame>,
    /// Frames and close notifications received.
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens connections to the dispatcher.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `url` and return the connection's channels.
    async fn connect(&self, url: &str) -> Result<TransportChannels>;
}
