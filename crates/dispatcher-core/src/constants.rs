//! Protocol constants shared between the client and entity crates.

/// Default dispatcher port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default host when none is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Path of the RPC/event socket on the dispatcher.
pub const SOCKET_PATH: &str = "/socket";

/// Default RPC call timeout in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 20_000;

/// Default transport connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default capacity of an entity collection.
pub const DEFAULT_ENTITY_MAX_SIZE: usize = 2000;

/// `errno` value sent back when the server tries to call into the client.
pub const EINVAL: i64 = 22;

/// `errno` value used for synthesized call timeouts.
pub const ETIMEDOUT: i64 = 60;

// ── Frame names ─────────────────────────────────────────────────────

/// Outbound RPC call.
pub const NAME_CALL: &str = "call";
/// Inbound RPC success response.
pub const NAME_RESPONSE: &str = "response";
/// Inbound (or outbound) RPC failure.
pub const NAME_ERROR: &str = "error";
/// Username/password authentication.
pub const NAME_AUTH: &str = "auth";
/// Token authentication.
pub const NAME_AUTH_TOKEN: &str = "auth_token";
/// Event notification.
pub const NAME_EVENT: &str = "event";
/// Server-forced session end.
pub const NAME_LOGOUT: &str = "logout";
/// Server-side event mask subscription.
pub const NAME_SUBSCRIBE: &str = "subscribe";
/// Server-side event mask removal.
pub const NAME_UNSUBSCRIBE: &str = "unsubscribe";

/// Event name carrying change notifications for an entity collection.
pub fn entity_changed_event(collection: &str) -> String {
    format!("entity-subscriber.{collection}.changed")
}

/// Remote query method for an entity collection.
pub fn entity_query_method(collection: &str) -> String {
    format!("{collection}.query")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_event_name() {
        assert_eq!(entity_changed_event("disks"), "entity-subscriber.disks.changed");
    }

    #[test]
    fn entity_query_name() {
        assert_eq!(entity_query_method("volumes"), "volumes.query");
    }
}
