//! # dispatcher-core
//!
//! Foundation types shared by every dispatcher client crate:
//!
//! - **Envelope**: the JSON frame that wraps every message on the socket,
//!   with typed payloads for calls, responses, errors, and events
//! - **Branded IDs**: [`CallId`] (UUID v4) and [`HandlerCookie`]
//! - **Errors**: [`ClientError`] and the [`ErrorKind`] codes reported on the
//!   client's error channel
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use envelope::{Envelope, EventPayload, Namespace, RpcCallPayload, RpcErrorBody};
pub use errors::{ClientError, ErrorKind, ErrorReport, Result};
pub use ids::{CallId, HandlerCookie};
