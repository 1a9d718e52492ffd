//! Public client handle.
//!
//! [`DispatcherClient`] is a cheap, cloneable handle onto one event loop.
//! Calls take a callback that runs exactly once with the response, the
//! server's error, or a timeout. [`DispatcherClient::call_async`] wraps that
//! in a future.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use dispatcher_core::constants::{DEFAULT_CALL_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS};
use dispatcher_core::{CallId, ClientError, Envelope, ErrorReport, HandlerCookie, Result};
use dispatcher_settings::ClientSettings;

use crate::connection::{ConnectionState, resolve_endpoint};
use crate::correlator::{CallCallback, CallResult};
use crate::event_loop::{ClientSignal, Command, EventLoop, Shared};
use crate::events::EventNotice;
use crate::transport::{Connector, WsConnector};

const DEFAULT_EVENT_BUFFER: usize = 256;

/// Connection and timing options for a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// Socket URL.
    pub url: String,
    /// Timeout applied by [`DispatcherClient::call`].
    pub call_timeout: Duration,
    /// Bound on establishing the transport.
    pub connect_timeout: Duration,
    /// Capacity of the error, signal, and event channels.
    pub event_buffer: usize,
}

impl ClientOptions {
    /// Options for `endpoint` (host, `host:port`, or URL) with default timing.
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            url: resolve_endpoint(endpoint)?,
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        })
    }

    /// Options from loaded settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            url: settings.socket_url(),
            call_timeout: settings.call_timeout(),
            connect_timeout: settings.connect_timeout(),
            event_buffer: settings.event_buffer_size,
        }
    }

    /// Replace the default call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Replace the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

struct Inner {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    connecting: tokio::sync::Mutex<()>,
}

/// Handle to a dispatcher connection.
#[derive(Clone)]
pub struct DispatcherClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DispatcherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherClient")
            .field("url", &self.inner.options.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DispatcherClient {
    /// Client using the WebSocket transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(options: ClientOptions) -> Self {
        Self::with_connector(options, Arc::new(WsConnector))
    }

    /// Client using a custom transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Self {
        let shared = Arc::new(Shared::new(options.event_buffer));
        let commands = EventLoop::spawn(Arc::clone(&shared));
        Self {
            inner: Arc::new(Inner {
                options,
                connector,
                commands,
                shared,
                connecting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Options this client was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    // ── Connection ──

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    /// Whether the transport is up.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state.subscribe()
    }

    /// Establish the transport. A no-op when already connected.
    ///
    /// Fails with [`ClientError::ConnectionTimeout`] if the transport is not
    /// up within the connect timeout.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.connecting.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let url = &self.inner.options.url;
        let timeout = self.inner.options.connect_timeout;
        let shared = &self.inner.shared;
        shared.set_state(ConnectionState::Connecting);
        info!(url = %url, "connecting");

        let channels = match tokio::time::timeout(timeout, self.inner.connector.connect(url)).await {
            Ok(Ok(channels)) => channels,
            Ok(Err(e)) => {
                shared.set_state(ConnectionState::Disconnected);
                warn!(url = %url, error = %e, "connect failed");
                return Err(e);
            }
            Err(_) => {
                shared.set_state(ConnectionState::Disconnected);
                let error = ClientError::ConnectionTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                warn!(url = %url, error = %error, "connect timed out");
                shared.report(ErrorReport::new(error.clone()));
                return Err(error);
            }
        };

        let (ack, acked) = oneshot::channel();
        self.send_command(Command::Attach { channels, ack })?;
        acked.await.map_err(|_| loop_stopped())
    }

    /// Close the transport. Pending calls stay pending until they time out
    /// or a later connection delivers their responses.
    pub async fn disconnect(&self) {
        let (ack, acked) = oneshot::channel();
        if self.send_command(Command::Disconnect { ack }).is_ok() {
            let _ = acked.await;
        }
    }

    // ── Calls ──

    /// Call `method` with the default timeout. `callback` runs exactly once.
    pub fn call<F>(&self, method: &str, args: Value, callback: F) -> Result<CallId>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        self.call_with_timeout(method, args, self.inner.options.call_timeout, callback)
    }

    /// Call `method` with an explicit timeout.
    pub fn call_with_timeout<F>(
        &self,
        method: &str,
        args: Value,
        timeout: Duration,
        callback: F,
    ) -> Result<CallId>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        let id = CallId::new();
        let frame = Envelope::call(id.clone(), method, args);
        self.start(id, method, frame, timeout, Box::new(callback))
    }

    /// Call `method` and await its outcome.
    pub async fn call_async(&self, method: &str, args: Value) -> Result<Value> {
        self.call_async_with_timeout(method, args, self.inner.options.call_timeout)
            .await
    }

    /// Call `method` with an explicit timeout and await its outcome.
    pub async fn call_async_with_timeout(
        &self,
        method: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let _ = self.call_with_timeout(method, args, timeout, move |outcome| {
            let _ = tx.send(outcome);
        })?;
        rx.await.map_err(|_| ClientError::Other {
            message: format!("call {method} was dropped"),
        })?
    }

    /// Forget a pending call; its callback will not run.
    pub async fn cancel(&self, id: &CallId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .send_command(Command::Cancel {
                id: id.clone(),
                reply,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Number of calls awaiting a response.
    pub async fn pending_calls(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.send_command(Command::PendingCount { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    fn start(
        &self,
        id: CallId,
        method: &str,
        frame: Envelope,
        timeout: Duration,
        callback: CallCallback,
    ) -> Result<CallId> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.send_command(Command::Call {
            id: id.clone(),
            method: method.to_owned(),
            frame,
            timeout,
            callback,
        })?;
        Ok(id)
    }

    // ── Login ──

    /// Log in with credentials.
    ///
    /// Success stores the session token and emits [`ClientSignal::LoggedIn`];
    /// failure is reported on the error channel.
    pub fn login(&self, username: &str, password: &str) -> Result<CallId> {
        let id = CallId::new();
        let frame = Envelope::auth(id.clone(), username, password);
        self.start_login(id, frame, None)
    }

    /// Log in with credentials and await the session token.
    pub async fn login_async(&self, username: &str, password: &str) -> Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        let id = CallId::new();
        let frame = Envelope::auth(id.clone(), username, password);
        let _ = self.start_login(id, frame, Some(tx))?;
        rx.await.map_err(|_| ClientError::Other {
            message: "login was dropped".into(),
        })?
    }

    /// Resume a session from a token.
    pub fn login_token(&self, token: &str) -> Result<CallId> {
        let id = CallId::new();
        let frame = Envelope::auth_token(id.clone(), token);
        self.start_login(id, frame, None)
    }

    /// Session token from the last successful login.
    pub fn token(&self) -> Option<String> {
        self.inner.shared.token.lock().clone()
    }

    fn start_login(
        &self,
        id: CallId,
        frame: Envelope,
        notify: Option<oneshot::Sender<Result<Option<String>>>>,
    ) -> Result<CallId> {
        let shared = Arc::clone(&self.inner.shared);
        let call_id = id.clone();
        let method = frame.name.clone();
        let callback = move |outcome: CallResult| {
            let outcome = outcome.map(|result| session_token(&result));
            match &outcome {
                Ok(token) => {
                    info!("logged in");
                    *shared.token.lock() = token.clone();
                    shared.signal(ClientSignal::LoggedIn {
                        token: token.clone(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "login failed");
                    shared.report(ErrorReport::for_call(call_id, e.clone()));
                }
            }
            if let Some(notify) = notify {
                let _ = notify.send(outcome);
            }
        };
        self.start(id, &method, frame, self.inner.options.call_timeout, Box::new(callback))
    }

    // ── Events ──

    /// Emit an event to the server.
    pub async fn emit_event(&self, name: &str, args: Value) -> Result<()> {
        self.send(Envelope::event(name, args)).await
    }

    /// Ask the server to start sending events matching `masks`.
    pub async fn subscribe_events(&self, masks: &[String]) -> Result<()> {
        self.send(Envelope::subscribe(masks)).await
    }

    /// Ask the server to stop sending events matching `masks`.
    pub async fn unsubscribe_events(&self, masks: &[String]) -> Result<()> {
        self.send(Envelope::unsubscribe(masks)).await
    }

    /// Register a handler for `name`.
    ///
    /// The first handler for a name subscribes to it on the server. Handlers
    /// run on the event loop; they must not block.
    pub fn register_event_handler<F>(&self, name: &str, handler: F) -> HandlerCookie
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let (cookie, first) = {
            let mut dispatcher = self.inner.shared.dispatcher.write();
            let first = !dispatcher.has_handlers(name);
            (dispatcher.register(name, handler), first)
        };
        debug!(event = name, %cookie, "event handler registered");
        if first && self.is_connected() {
            self.post_frame(Envelope::subscribe(&[name.to_owned()]));
        }
        cookie
    }

    /// Remove the handler registered under `cookie`.
    ///
    /// Returns `false` when `cookie` is not registered for `name`.
    pub fn unregister_event_handler(&self, name: &str, cookie: HandlerCookie) -> bool {
        let (removed, last) = {
            let mut dispatcher = self.inner.shared.dispatcher.write();
            let removed = dispatcher.unregister(name, cookie);
            (removed, !dispatcher.has_handlers(name))
        };
        if removed {
            debug!(event = name, %cookie, "event handler removed");
            if last && self.is_connected() {
                self.post_frame(Envelope::unsubscribe(&[name.to_owned()]));
            }
        }
        removed
    }

    // ── Channels ──

    /// Connection-level and unsolicited errors.
    pub fn errors(&self) -> broadcast::Receiver<ErrorReport> {
        self.inner.shared.errors.subscribe()
    }

    /// Connection lifecycle signals.
    pub fn signals(&self) -> broadcast::Receiver<ClientSignal> {
        self.inner.shared.signals.subscribe()
    }

    /// Every event received, whether or not a handler is registered.
    pub fn events(&self) -> broadcast::Receiver<EventNotice> {
        self.inner.shared.events.subscribe()
    }

    // ── Frames ──

    /// Send a raw frame.
    ///
    /// Fails with [`ClientError::NotConnected`] when no transport is up.
    pub async fn send(&self, frame: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Send {
            frame,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| loop_stopped())?
    }

    // ── Internals ──

    fn post_frame(&self, frame: Envelope) {
        if let Err(e) = self.send_command(Command::Send { frame, reply: None }) {
            warn!(error = %e, "failed to queue frame");
        }
    }

    fn send_command(&self, cmd: Command) -> Result<()> {
        self.inner.commands.send(cmd).map_err(|_| loop_stopped())
    }
}

fn loop_stopped() -> ClientError {
    ClientError::Other {
        message: "event loop stopped".into(),
    }
}

/// Token from a login result: the first element of an array result, or the
/// result itself when it is a string.
fn session_token(result: &Value) -> Option<String> {
    match result {
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_owned),
        Value::String(token) => Some(token.clone()),
        _ => None,
    }
}
