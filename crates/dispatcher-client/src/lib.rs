//! # dispatcher-client
//!
//! Client side of the dispatcher socket protocol.
//!
//! - **Connection**: [`DispatcherClient::connect`] brings up a transport
//!   through a [`Connector`] ([`WsConnector`] in production)
//! - **Correlator**: every call is matched to its response by [`CallId`]
//!   and bounded by its own timer
//! - **Events**: handlers keyed by name and [`HandlerCookie`], plus a
//!   catch-all broadcast of every event received
//! - **Errors and signals**: connection-level failures go to
//!   [`DispatcherClient::errors`], lifecycle changes to
//!   [`DispatcherClient::signals`]
//!
//! [`CallId`]: dispatcher_core::CallId
//! [`HandlerCookie`]: dispatcher_core::HandlerCookie

#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod correlator;
pub mod event_loop;
pub mod events;
pub mod transport;

pub use client::{ClientOptions, DispatcherClient};
pub use connection::{ConnectionState, resolve_endpoint};
pub use correlator::{CallCallback, CallResult, Correlator};
pub use event_loop::ClientSignal;
pub use events::{EventDispatcher, EventHandler, EventNotice};
pub use transport::{
    Connector, MemoryConnector, MemoryPeer, OutboundFrame, TransportChannels, TransportEvent,
    WsConnector,
};
