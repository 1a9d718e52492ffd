//! Error taxonomy for the dispatcher client.
//!
//! - [`ClientError`]: every failure the client can produce. Per-call failures
//!   (`CallTimeout`, `Call`) are delivered to the call's own callback.
//! - [`ErrorKind`]: coarse classification with the numeric codes used by the
//!   dispatcher's own clients.
//! - [`ErrorReport`]: the cloneable record published on a client's
//!   process-wide error channel for connection- and protocol-level failures.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::constants::ETIMEDOUT;
use crate::envelope::RpcErrorBody;
use crate::ids::CallId;

/// Client error type.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ClientError {
    /// Inbound frame could not be decoded.
    #[error("malformed frame: {message}")]
    Parse {
        /// Decoder message.
        message: String,
    },

    /// Transport did not come up within the connect timeout.
    #[error("connection timed out after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Configured connect timeout.
        timeout_ms: u64,
    },

    /// Transport closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// No response arrived before the call's timer fired.
    #[error("call {method} timed out after {timeout_ms}ms")]
    CallTimeout {
        /// Method that was called.
        method: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// Server reported a failure for the call.
    #[error("[{code}] {message}")]
    Call {
        /// Server error code.
        code: i64,
        /// Server message.
        message: String,
        /// Optional structured detail.
        extra: Option<Value>,
        /// Optional server-side stack trace.
        stacktrace: Option<Value>,
    },

    /// Response for an id with no pending call.
    #[error("spurious response for call {id}")]
    SpuriousResponse {
        /// The unmatched id.
        id: String,
    },

    /// Server ended the session.
    #[error("session logged out by server")]
    Logout,

    /// Operation requires an established connection.
    #[error("not connected")]
    NotConnected,

    /// Transport-level failure while connecting or sending.
    #[error("transport error: {message}")]
    Transport {
        /// Description.
        message: String,
    },

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Description.
        message: String,
    },
}

impl ClientError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } => ErrorKind::Parse,
            Self::ConnectionTimeout { .. } => ErrorKind::ConnectionTimeout,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::CallTimeout { .. } => ErrorKind::CallTimeout,
            Self::Call { .. } => ErrorKind::CallError,
            Self::SpuriousResponse { .. } => ErrorKind::SpuriousResponse,
            Self::Logout => ErrorKind::Logout,
            Self::NotConnected | Self::Transport { .. } | Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Server-style error code: the server's code for `Call`, `ETIMEDOUT` for
    /// call timeouts, `None` otherwise.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Call { code, .. } => Some(*code),
            Self::CallTimeout { .. } => Some(ETIMEDOUT),
            _ => None,
        }
    }

    /// Whether the failure belongs to a single call rather than the
    /// connection.
    pub fn is_call_scoped(&self) -> bool {
        matches!(self, Self::CallTimeout { .. } | Self::Call { .. })
    }
}

impl From<RpcErrorBody> for ClientError {
    fn from(body: RpcErrorBody) -> Self {
        Self::Call {
            code: body.code,
            message: body.message,
            extra: body.extra,
            stacktrace: body.stacktrace,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Coarse error classification.
///
/// Numeric values match the error codes of the dispatcher's JavaScript and
/// Python clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed inbound frame.
    Parse = 1,
    /// Connect timed out.
    ConnectionTimeout = 2,
    /// Connection closed.
    ConnectionClosed = 3,
    /// Call timed out.
    CallTimeout = 4,
    /// Server-reported call failure.
    CallError = 5,
    /// Response with no pending call.
    SpuriousResponse = 6,
    /// Server-forced session end.
    Logout = 7,
    /// Anything else.
    Other = 8,
}

impl ErrorKind {
    /// Numeric code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parse => "INVALID_JSON_RESPONSE",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::CallTimeout => "RPC_CALL_TIMEOUT",
            Self::CallError => "RPC_CALL_ERROR",
            Self::SpuriousResponse => "SPURIOUS_RPC_RESPONSE",
            Self::Logout => "LOGOUT",
            Self::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// Entry on a client's error channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorReport {
    /// Classification.
    pub kind: ErrorKind,
    /// Call the report relates to, if any.
    pub call_id: Option<CallId>,
    /// The underlying error.
    pub error: ClientError,
}

impl ErrorReport {
    /// Report not tied to a call.
    pub fn new(error: ClientError) -> Self {
        Self {
            kind: error.kind(),
            call_id: None,
            error,
        }
    }

    /// Report tied to a call id.
    pub fn for_call(call_id: CallId, error: ClientError) -> Self {
        Self {
            kind: error.kind(),
            call_id: Some(call_id),
            error,
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.call_id {
            Some(id) => write!(f, "{} ({id}): {}", self.kind, self.error),
            None => write!(f, "{}: {}", self.kind, self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_codes_match_wire_values() {
        assert_eq!(ErrorKind::Parse.code(), 1);
        assert_eq!(ErrorKind::ConnectionTimeout.code(), 2);
        assert_eq!(ErrorKind::ConnectionClosed.code(), 3);
        assert_eq!(ErrorKind::CallTimeout.code(), 4);
        assert_eq!(ErrorKind::CallError.code(), 5);
        assert_eq!(ErrorKind::SpuriousResponse.code(), 6);
        assert_eq!(ErrorKind::Logout.code(), 7);
        assert_eq!(ErrorKind::Other.code(), 8);
    }

    #[test]
    fn call_error_from_body() {
        let body = RpcErrorBody {
            code: 13,
            message: "denied".into(),
            extra: Some(json!({"field": "name"})),
            stacktrace: None,
        };
        let err = ClientError::from(body);
        assert_eq!(err.kind(), ErrorKind::CallError);
        assert_eq!(err.code(), Some(13));
        assert_eq!(err.to_string(), "[13] denied");
        assert!(err.is_call_scoped());
    }

    #[test]
    fn call_timeout_has_etimedout_code() {
        let err = ClientError::CallTimeout {
            method: "disks.query".into(),
            timeout_ms: 500,
        };
        assert_eq!(err.code(), Some(ETIMEDOUT));
        assert_eq!(err.kind(), ErrorKind::CallTimeout);
        assert!(err.to_string().contains("disks.query"));
    }

    #[test]
    fn connection_errors_are_not_call_scoped() {
        assert!(!ClientError::ConnectionClosed.is_call_scoped());
        assert!(!ClientError::Logout.is_call_scoped());
        assert_eq!(ClientError::NotConnected.kind(), ErrorKind::Other);
    }

    #[test]
    fn report_display() {
        let report = ErrorReport::for_call(
            CallId::from("abc"),
            ClientError::SpuriousResponse { id: "abc".into() },
        );
        assert_eq!(report.kind, ErrorKind::SpuriousResponse);
        assert_eq!(
            report.to_string(),
            "SPURIOUS_RPC_RESPONSE (abc): spurious response for call abc"
        );
        assert_eq!(
            ErrorReport::new(ClientError::Logout).to_string(),
            "LOGOUT: session logged out by server"
        );
    }

    #[test]
    fn kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::SpuriousResponse).unwrap(),
            "\"SPURIOUS_RESPONSE\""
        );
    }
}
