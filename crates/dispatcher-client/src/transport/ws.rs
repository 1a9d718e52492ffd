//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use dispatcher_core::{ClientError, Result};

use super::{Connector, FRAME_BUFFER, OutboundFrame, TransportChannels, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the dispatcher over a WebSocket.
///
/// Each connection gets a reader task and a writer task. Both stop when the
/// socket closes or the client drops its channels.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<TransportChannels> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Transport {
                message: format!("WebSocket connect to {url}: {e}"),
            })?;
        debug!(url, "websocket connected");

        let (ws_tx, ws_rx) = ws.split();
        let (out_tx, out_rx) = mpsc::channel(FRAME_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(FRAME_BUFFER);

        drop(tokio::spawn(write_loop(ws_tx, out_rx)));
        drop(tokio::spawn(read_loop(ws_rx, in_tx)));

        Ok(TransportChannels {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

async fn write_loop(mut ws_tx: SplitSink<WsStream, Message>, mut out_rx: mpsc::Receiver<OutboundFrame>) {
    while let Some(frame) = out_rx.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    warn!(error = %e, "websocket write failed");
                    return;
                }
            }
            OutboundFrame::Close => break,
        }
    }
    let _ = ws_tx.close().await;
}

async fn read_loop(mut ws_rx: SplitStream<WsStream>, in_tx: mpsc::Sender<TransportEvent>) {
    let reason = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => {
                if in_tx
                    .send(TransportEvent::Message(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => {
                    if in_tx.send(TransportEvent::Message(text)).await.is_err() {
                        return;
                    }
                }
                Err(_) => warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                break frame.map(|f| f.reason.as_str().to_owned());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        }
    };
    debug!(reason = reason.as_deref().unwrap_or(""), "websocket closed");
    let _ = in_tx.send(TransportEvent::Closed { reason }).await;
}
