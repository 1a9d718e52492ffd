//! The client's event loop.
//!
//! One task per client owns the [`Correlator`] and the current transport.
//! It outlives individual connections: when the transport closes, pending
//! calls stay registered and their timers keep running, so a response that
//! arrives after a reconnect still completes its call.
//!
//! The loop stops when every [`DispatcherClient`](crate::DispatcherClient)
//! handle has been dropped.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use dispatcher_core::constants::{
    EINVAL, NAME_CALL, NAME_ERROR, NAME_EVENT, NAME_LOGOUT, NAME_RESPONSE,
};
use dispatcher_core::{
    CallId, ClientError, Envelope, ErrorReport, Namespace, Result, RpcErrorBody,
};

use crate::connection::ConnectionState;
use crate::correlator::{CallCallback, Correlator, invoke};
use crate::events::{EventDispatcher, EventNotice, deliver};
use crate::transport::{OutboundFrame, TransportChannels, TransportEvent};

/// Connection lifecycle notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientSignal {
    /// Transport established.
    Connected,
    /// Transport closed, by either side.
    Disconnected,
    /// Login call succeeded.
    LoggedIn {
        /// Session token returned by the server, if any.
        token: Option<String>,
    },
}

// ── Shared state ──

/// State visible to both the loop and the client handles.
pub(crate) struct Shared {
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) dispatcher: RwLock<EventDispatcher>,
    pub(crate) errors: broadcast::Sender<ErrorReport>,
    pub(crate) signals: broadcast::Sender<ClientSignal>,
    pub(crate) events: broadcast::Sender<EventNotice>,
    pub(crate) token: Mutex<Option<String>>,
}

impl Shared {
    pub(crate) fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (errors, _) = broadcast::channel(buffer);
        let (signals, _) = broadcast::channel(buffer);
        let (events, _) = broadcast::channel(buffer);
        Self {
            state,
            dispatcher: RwLock::new(EventDispatcher::new()),
            errors,
            signals,
            events,
            token: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send_replace(state);
    }

    pub(crate) fn report(&self, report: ErrorReport) {
        debug!(kind = %report.kind, error = %report.error, "reporting error");
        let _ = self.errors.send(report);
    }

    pub(crate) fn signal(&self, signal: ClientSignal) {
        let _ = self.signals.send(signal);
    }
}

// ── Commands ──

/// Requests from client handles to the loop.
pub(crate) enum Command {
    Attach {
        channels: TransportChannels,
        ack: oneshot::Sender<()>,
    },
    Disconnect {
        ack: oneshot::Sender<()>,
    },
    Call {
        id: CallId,
        method: String,
        frame: Envelope,
        timeout: Duration,
        callback: CallCallback,
    },
    Cancel {
        id: CallId,
        reply: oneshot::Sender<bool>,
    },
    Send {
        frame: Envelope,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    PendingCount {
        reply: oneshot::Sender<usize>,
    },
}

// ── Loop ──

pub(crate) struct EventLoop {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    expired: mpsc::UnboundedReceiver<CallId>,
    correlator: Correlator,
    outbound: Option<mpsc::Sender<OutboundFrame>>,
    inbound: Option<mpsc::Receiver<TransportEvent>>,
}

impl EventLoop {
    /// Spawn the loop and return its command sender.
    pub(crate) fn spawn(shared: Arc<Shared>) -> mpsc::UnboundedSender<Command> {
        let (cmd_tx, commands) = mpsc::unbounded_channel();
        let (expiry_tx, expired) = mpsc::unbounded_channel();
        let event_loop = Self {
            shared,
            commands,
            expired,
            correlator: Correlator::new(expiry_tx),
            outbound: None,
            inbound: None,
        };
        drop(tokio::spawn(event_loop.run()));
        cmd_tx
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle_command(cmd).await;
                }
                Some(id) = self.expired.recv() => {
                    let _ = self.correlator.expire(&id);
                }
                event = next_inbound(&mut self.inbound) => {
                    self.handle_transport(event).await;
                }
            }
        }

        debug!(pending = self.correlator.len(), "event loop stopped");
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.try_send(OutboundFrame::Close);
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Attach { channels, ack } => {
                self.outbound = Some(channels.outbound);
                self.inbound = Some(channels.inbound);
                self.shared.set_state(ConnectionState::Connected);
                info!("connected");
                self.shared.signal(ClientSignal::Connected);
                self.resubscribe().await;
                let _ = ack.send(());
            }
            Command::Disconnect { ack } => {
                if let Some(outbound) = self.outbound.take() {
                    let _ = outbound.send(OutboundFrame::Close).await;
                    self.inbound = None;
                    info!(pending = self.correlator.len(), "disconnected");
                    self.shared.signal(ClientSignal::Disconnected);
                }
                self.shared.set_state(ConnectionState::Disconnected);
                let _ = ack.send(());
            }
            Command::Call {
                id,
                method,
                frame,
                timeout,
                callback,
            } => self.start_call(id, method, &frame, timeout, callback).await,
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.correlator.cancel(&id));
            }
            Command::Send { frame, reply } => {
                let result = self.send(&frame).await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                } else if let Err(e) = result {
                    warn!(name = %frame.name, error = %e, "failed to send frame");
                }
            }
            Command::PendingCount { reply } => {
                let _ = reply.send(self.correlator.len());
            }
        }
    }

    async fn start_call(
        &mut self,
        id: CallId,
        method: String,
        frame: &Envelope,
        timeout: Duration,
        callback: CallCallback,
    ) {
        if self.outbound.is_none() {
            invoke(&id, callback, Err(ClientError::NotConnected));
            return;
        }
        if !self.correlator.register(id.clone(), method, timeout, callback) {
            return;
        }
        if let Err(e) = self.send(frame).await {
            let _ = self.correlator.complete(&id, Err(e));
        }
    }

    async fn send(&mut self, frame: &Envelope) -> Result<()> {
        let Some(outbound) = &self.outbound else {
            return Err(ClientError::NotConnected);
        };
        let text = frame.encode()?;
        debug!(namespace = frame.namespace.as_str(), name = %frame.name, "sending frame");
        outbound
            .send(OutboundFrame::Text(text))
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    async fn resubscribe(&mut self) {
        let (names, handlers) = {
            let dispatcher = self.shared.dispatcher.read();
            if dispatcher.is_empty() {
                return;
            }
            (dispatcher.names(), dispatcher.len())
        };
        debug!(names = names.len(), handlers, "restoring event subscriptions");
        if let Err(e) = self.send(&Envelope::subscribe(&names)).await {
            warn!(error = %e, "failed to restore event subscriptions");
        }
    }

    // ── Inbound ──

    async fn handle_transport(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(text)) => self.handle_frame(&text).await,
            Some(TransportEvent::Closed { reason }) => self.transport_closed(reason.as_deref()),
            None => self.transport_closed(None),
        }
    }

    fn transport_closed(&mut self, reason: Option<&str>) {
        self.outbound = None;
        self.inbound = None;
        self.shared.set_state(ConnectionState::Disconnected);
        info!(
            reason = reason.unwrap_or(""),
            pending = self.correlator.len(),
            "connection closed"
        );
        self.shared.report(ErrorReport::new(ClientError::ConnectionClosed));
        self.shared.signal(ClientSignal::Disconnected);
    }

    async fn handle_frame(&mut self, raw: &str) {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "dropping malformed frame");
                self.shared.report(ErrorReport::new(e));
                return;
            }
        };

        let name = envelope.name.clone();
        match (envelope.namespace, name.as_str()) {
            (Namespace::Rpc, NAME_RESPONSE) => {
                let Envelope { id, args, .. } = envelope;
                self.resolve(id, Ok(args));
            }
            (Namespace::Rpc, NAME_ERROR) => {
                let error = envelope.error_body().map_or_else(|e| e, ClientError::from);
                self.resolve(envelope.id, Err(error));
            }
            (Namespace::Rpc, NAME_CALL) => self.reject_server_call(envelope).await,
            (Namespace::Events, NAME_EVENT) => self.dispatch_event(&envelope),
            (Namespace::Events, NAME_LOGOUT) => {
                warn!("session logged out by server");
                *self.shared.token.lock() = None;
                self.shared.report(ErrorReport::new(ClientError::Logout));
            }
            (namespace, name) => {
                debug!(namespace = namespace.as_str(), name, "ignoring frame");
            }
        }
    }

    fn resolve(&mut self, id: Option<CallId>, outcome: Result<Value>) {
        let Some(id) = id else {
            warn!("response frame without id");
            self.shared.report(ErrorReport::new(ClientError::Parse {
                message: "response frame without id".into(),
            }));
            return;
        };
        if !self.correlator.complete(&id, outcome) {
            warn!(call_id = %id, "spurious response");
            self.shared.report(ErrorReport::for_call(
                id.clone(),
                ClientError::SpuriousResponse {
                    id: id.into_inner(),
                },
            ));
        }
    }

    async fn reject_server_call(&mut self, envelope: Envelope) {
        warn!(call_id = ?envelope.id, "rejecting call from server");
        let body = RpcErrorBody {
            code: EINVAL,
            message: "Server functionality is not supported".into(),
            extra: None,
            stacktrace: None,
        };
        if let Err(e) = self.send(&Envelope::error(envelope.id, &body)).await {
            warn!(error = %e, "failed to reject server call");
        }
    }

    fn dispatch_event(&self, envelope: &Envelope) {
        let payload = match envelope.event_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "dropping malformed event");
                self.shared.report(ErrorReport::new(e));
                return;
            }
        };

        let handlers = self.shared.dispatcher.read().handlers_for(&payload.name);
        debug!(event = %payload.name, handlers = handlers.len(), "event received");
        let _ = deliver(&payload.name, &payload.args, &handlers);
        let _ = self.shared.events.send(EventNotice {
            name: payload.name,
            args: payload.args,
        });
    }
}

async fn next_inbound(inbound: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
