//! Wire envelope shared by RPC and event traffic.
//!
//! Every frame on the socket is a JSON object
//! `{namespace, id, name, args}`. `namespace` routes the frame to the RPC
//! correlator or the event dispatcher, `name` selects the frame kind inside
//! the namespace, and `args` is an opaque payload whose shape depends on the
//! kind. The typed payload structs below cover the kinds the client itself
//! produces or inspects.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::constants::{
    NAME_AUTH, NAME_AUTH_TOKEN, NAME_CALL, NAME_ERROR, NAME_EVENT, NAME_LOGOUT, NAME_RESPONSE,
    NAME_SUBSCRIBE, NAME_UNSUBSCRIBE,
};
use crate::errors::{ClientError, Result};
use crate::ids::CallId;

/// Top-level routing discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Correlated request/response traffic.
    Rpc,
    /// Uncorrelated notifications.
    Events,
}

impl Namespace {
    /// Wire name of the namespace.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Events => "events",
        }
    }
}

/// One frame on the socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing namespace.
    pub namespace: Namespace,
    /// Call identifier; `null` for frames that are not correlated.
    #[serde(default)]
    pub id: Option<CallId>,
    /// Frame kind within the namespace.
    pub name: String,
    /// Kind-specific payload.
    #[serde(default)]
    pub args: Value,
}

/// `args` of an outbound `rpc/call` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcCallPayload {
    /// Fully qualified method name, e.g. `volumes.query`.
    pub method: String,
    /// Method arguments.
    #[serde(default)]
    pub args: Value,
}

/// `args` of an `events/event` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Event name, e.g. `entity-subscriber.disks.changed`.
    pub name: String,
    /// Event arguments.
    #[serde(default)]
    pub args: Value,
}

/// `args` of an `rpc/error` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Numeric error code (an `errno` value on the dispatcher).
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    /// Optional server-side stack trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Value>,
}

impl Envelope {
    /// Build an envelope from its parts.
    pub fn new(namespace: Namespace, name: impl Into<String>, id: Option<CallId>, args: Value) -> Self {
        Self {
            namespace,
            id,
            name: name.into(),
            args,
        }
    }

    /// `rpc/call` frame invoking `method`.
    pub fn call(id: CallId, method: impl Into<String>, args: Value) -> Self {
        let payload = RpcCallPayload {
            method: method.into(),
            args,
        };
        Self::new(Namespace::Rpc, NAME_CALL, Some(id), to_value(&payload))
    }

    /// `rpc/auth` frame with username/password credentials.
    pub fn auth(id: CallId, username: &str, password: &str) -> Self {
        Self::new(
            Namespace::Rpc,
            NAME_AUTH,
            Some(id),
            json!({ "username": username, "password": password }),
        )
    }

    /// `rpc/auth_token` frame resuming a session from a token.
    pub fn auth_token(id: CallId, token: &str) -> Self {
        Self::new(Namespace::Rpc, NAME_AUTH_TOKEN, Some(id), json!({ "token": token }))
    }

    /// `rpc/response` frame. The client only builds these in tests and
    /// loopback servers.
    pub fn response(id: CallId, result: Value) -> Self {
        Self::new(Namespace::Rpc, NAME_RESPONSE, Some(id), result)
    }

    /// `rpc/error` frame.
    pub fn error(id: Option<CallId>, body: &RpcErrorBody) -> Self {
        Self::new(Namespace::Rpc, NAME_ERROR, id, to_value(body))
    }

    /// `events/event` frame.
    pub fn event(name: impl Into<String>, args: Value) -> Self {
        let payload = EventPayload {
            name: name.into(),
            args,
        };
        Self::new(Namespace::Events, NAME_EVENT, None, to_value(&payload))
    }

    /// `events/subscribe` frame for a set of event masks.
    pub fn subscribe(masks: &[String]) -> Self {
        Self::new(Namespace::Events, NAME_SUBSCRIBE, None, json!(masks))
    }

    /// `events/unsubscribe` frame for a set of event masks.
    pub fn unsubscribe(masks: &[String]) -> Self {
        Self::new(Namespace::Events, NAME_UNSUBSCRIBE, None, json!(masks))
    }

    /// `events/logout` frame.
    pub fn logout() -> Self {
        Self::new(Namespace::Events, NAME_LOGOUT, None, Value::Null)
    }

    /// Parse a raw text frame.
    ///
    /// Fails with [`ClientError::Parse`] when the text is not JSON, is not an
    /// object, or lacks a known `namespace` or a `name`.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ClientError::Parse {
            message: e.to_string(),
        })
    }

    /// Serialize to the text sent on the socket.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ClientError::Other {
            message: format!("failed to encode envelope: {e}"),
        })
    }

    /// Whether this frame is `namespace/name`.
    pub fn is(&self, namespace: Namespace, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }

    /// Interpret `args` as an event payload.
    pub fn event_payload(&self) -> Result<EventPayload> {
        serde_json::from_value(self.args.clone()).map_err(|e| ClientError::Parse {
            message: format!("malformed event payload: {e}"),
        })
    }

    /// Interpret `args` as an RPC error body.
    pub fn error_body(&self) -> Result<RpcErrorBody> {
        serde_json::from_value(self.args.clone()).map_err(|e| ClientError::Parse {
            message: format!("malformed error payload: {e}"),
        })
    }
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    // Payload structs contain only strings, integers and `Value`s.
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn call_frame_shape() {
        let env = Envelope::call(CallId::from("c1"), "disks.query", json!([[], {}]));
        let v: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(v["namespace"], "rpc");
        assert_eq!(v["name"], "call");
        assert_eq!(v["id"], "c1");
        assert_eq!(v["args"]["method"], "disks.query");
        assert_eq!(v["args"]["args"], json!([[], {}]));
    }

    #[test]
    fn auth_frame_shape() {
        let env = Envelope::auth(CallId::from("a1"), "root", "secret");
        assert!(env.is(Namespace::Rpc, "auth"));
        assert_eq!(env.args["username"], "root");
        assert_eq!(env.args["password"], "secret");
    }

    #[test]
    fn event_frame_has_null_id() {
        let env = Envelope::event("system.ready", json!({"up": true}));
        let v: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(v["namespace"], "events");
        assert!(v["id"].is_null());
        assert_eq!(v["args"]["name"], "system.ready");
        assert_eq!(v["args"]["args"]["up"], true);
    }

    #[test]
    fn subscribe_frame_carries_masks() {
        let env = Envelope::subscribe(&["entity-subscriber.*".to_owned()]);
        assert_eq!(env.args, json!(["entity-subscriber.*"]));
        assert!(env.is(Namespace::Events, "subscribe"));
    }

    #[test]
    fn decode_response() {
        let env = Envelope::decode(r#"{"namespace":"rpc","id":"x","name":"response","args":[1,2]}"#)
            .unwrap();
        assert_eq!(env.namespace, Namespace::Rpc);
        assert_eq!(env.id, Some(CallId::from("x")));
        assert_eq!(env.args, json!([1, 2]));
    }

    #[test]
    fn decode_logout_without_args() {
        let env = Envelope::decode(r#"{"namespace":"events","name":"logout"}"#).unwrap();
        assert!(env.is(Namespace::Events, "logout"));
        assert!(env.id.is_none());
        assert!(env.args.is_null());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_matches!(Envelope::decode("not json"), Err(ClientError::Parse { .. }));
        assert_matches!(Envelope::decode("[1,2,3]"), Err(ClientError::Parse { .. }));
        assert_matches!(Envelope::decode(""), Err(ClientError::Parse { .. }));
    }

    #[test]
    fn decode_rejects_missing_name_or_namespace() {
        assert_matches!(
            Envelope::decode(r#"{"namespace":"rpc","id":"x"}"#),
            Err(ClientError::Parse { .. })
        );
        assert_matches!(
            Envelope::decode(r#"{"name":"response","id":"x"}"#),
            Err(ClientError::Parse { .. })
        );
    }

    #[test]
    fn decode_rejects_unknown_namespace() {
        assert_matches!(
            Envelope::decode(r#"{"namespace":"shell","name":"data"}"#),
            Err(ClientError::Parse { .. })
        );
    }

    #[test]
    fn error_body_with_extra() {
        let env = Envelope::decode(
            r#"{"namespace":"rpc","id":"e","name":"error",
                "args":{"code":2,"message":"not found","extra":{"path":"/x"},"stacktrace":"tb"}}"#,
        )
        .unwrap();
        let body = env.error_body().unwrap();
        assert_eq!(body.code, 2);
        assert_eq!(body.message, "not found");
        assert_eq!(body.extra.unwrap()["path"], "/x");
        assert_eq!(body.stacktrace, Some(json!("tb")));
    }

    #[test]
    fn event_payload_missing_args_defaults_null() {
        let env = Envelope::decode(r#"{"namespace":"events","name":"event","args":{"name":"ping"}}"#)
            .unwrap();
        let payload = env.event_payload().unwrap();
        assert_eq!(payload.name, "ping");
        assert!(payload.args.is_null());
    }

    #[test]
    fn event_payload_without_name_is_parse_error() {
        let env = Envelope::decode(r#"{"namespace":"events","name":"event","args":{}}"#).unwrap();
        assert_matches!(env.event_payload(), Err(ClientError::Parse { .. }));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_never_panics(raw in ".{0,200}") {
                let _ = Envelope::decode(&raw);
            }

            #[test]
            fn frames_without_name_are_rejected(ns in "(rpc|events)", id in "[a-z0-9-]{0,12}") {
                let raw = json!({"namespace": ns, "id": id, "args": null}).to_string();
                prop_assert!(matches!(Envelope::decode(&raw), Err(ClientError::Parse { .. })), "expected ClientError::Parse");
            }
        }
    }
}
