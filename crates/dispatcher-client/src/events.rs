//! Event handler registry.
//!
//! Handlers are keyed by event name and by a [`HandlerCookie`] that is unique
//! for the life of the process, so unregistering one handler never touches
//! another. Cookies increase monotonically, which keeps registration order
//! in a `BTreeMap`.

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use dispatcher_core::HandlerCookie;

/// Event handler. Errors are logged and never reach other handlers.
pub type EventHandler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Event received from the server, as published on the catch-all channel.
#[derive(Clone, Debug, PartialEq)]
pub struct EventNotice {
    /// Event name.
    pub name: String,
    /// Event arguments.
    pub args: Value,
}

/// Handlers by event name.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, BTreeMap<HandlerCookie, EventHandler>>,
}

impl EventDispatcher {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `name` and return its cookie.
    pub fn register<F>(&mut self, name: &str, handler: F) -> HandlerCookie
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let cookie = HandlerCookie::next();
        let _ = self
            .handlers
            .entry(name.to_owned())
            .or_default()
            .insert(cookie, Arc::new(handler));
        cookie
    }

    /// Remove the handler registered under `cookie` for `name`.
    ///
    /// Unknown names and cookies are ignored and return `false`.
    pub fn unregister(&mut self, name: &str, cookie: HandlerCookie) -> bool {
        let Some(handlers) = self.handlers.get_mut(name) else {
            return false;
        };
        let removed = handlers.remove(&cookie).is_some();
        if handlers.is_empty() {
            let _ = self.handlers.remove(name);
        }
        removed
    }

    /// Handlers for `name` in registration order.
    pub fn handlers_for(&self, name: &str) -> Vec<EventHandler> {
        self.handlers
            .get(name)
            .map(|h| h.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any handler is registered for `name`.
    pub fn has_handlers(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Event names with at least one handler, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.values().map(BTreeMap::len).sum()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Invoke `handlers` in order with `args`, isolating each one.
///
/// Returns the number of handlers that failed or panicked.
pub fn deliver(name: &str, args: &Value, handlers: &[EventHandler]) -> usize {
    let mut failed = 0;
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(args))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed += 1;
                warn!(event = name, error = %e, "event handler failed");
            }
            Err(_) => {
                failed += 1;
                error!(event = name, "event handler panicked");
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use dispatcher_core::logging::capture_logs;
    use parking_lot::Mutex;
    use serde_json::json;
    use tracing::Level;

    use super::*;

    fn recording(
        log: &Arc<Mutex<Vec<String>>>,
        tag: &str,
    ) -> impl Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        let tag = tag.to_owned();
        move |args| {
            log.lock().push(format!("{tag}:{args}"));
            Ok(())
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut d = EventDispatcher::new();
        let _ = d.register("disk.changed", recording(&log, "a"));
        let _ = d.register("disk.changed", recording(&log, "b"));
        let _ = d.register("disk.changed", recording(&log, "c"));

        let failed = deliver("disk.changed", &json!(1), &d.handlers_for("disk.changed"));
        assert_eq!(failed, 0);
        assert_eq!(*log.lock(), vec!["a:1", "b:1", "c:1"]);
    }

    #[test]
    fn unregister_removes_only_that_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut d = EventDispatcher::new();
        let a = d.register("e", recording(&log, "a"));
        let _b = d.register("e", recording(&log, "b"));

        assert!(d.unregister("e", a));
        assert!(!d.unregister("e", a));
        let _ = deliver("e", &json!(null), &d.handlers_for("e"));
        assert_eq!(*log.lock(), vec!["b:null"]);
    }

    #[test]
    fn unknown_name_or_cookie_is_noop() {
        let mut d = EventDispatcher::new();
        let cookie = d.register("e", |_| Ok(()));
        assert!(!d.unregister("other", cookie));
        assert!(!d.unregister("e", HandlerCookie::next()));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn cookie_from_other_name_does_not_match() {
        let mut d = EventDispatcher::new();
        let a = d.register("a", |_| Ok(()));
        let _ = d.register("b", |_| Ok(()));
        assert!(!d.unregister("b", a));
        assert!(d.has_handlers("a"));
        assert!(d.has_handlers("b"));
    }

    #[test]
    fn last_unregister_drops_name() {
        let mut d = EventDispatcher::new();
        let c = d.register("e", |_| Ok(()));
        assert_eq!(d.names(), vec!["e"]);
        assert!(d.unregister("e", c));
        assert!(!d.has_handlers("e"));
        assert!(d.is_empty());
    }

    #[test]
    fn failing_handler_does_not_stop_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut d = EventDispatcher::new();
        let _ = d.register("e", |_| anyhow::bail!("bad handler"));
        let _ = d.register("e", |_| -> anyhow::Result<()> { panic!("worse handler") });
        let _ = d.register("e", recording(&log, "ok"));

        let (logs, _guard) = capture_logs();
        let failed = deliver("e", &json!(2), &d.handlers_for("e"));
        assert_eq!(failed, 2);
        assert_eq!(*log.lock(), vec!["ok:2"]);

        assert!(logs.has_event(Level::WARN, "event handler failed"));
        assert!(logs.has_event(Level::ERROR, "event handler panicked"));
        let failure = logs
            .events()
            .into_iter()
            .find(|e| e.level == Level::WARN)
            .unwrap();
        assert_eq!(failure.field("event"), Some("e"));
        assert_eq!(failure.field("error"), Some("bad handler"));
    }

    #[test]
    fn no_handlers_is_fine() {
        let d = EventDispatcher::new();
        assert!(d.handlers_for("nothing").is_empty());
        assert_eq!(deliver("nothing", &json!(null), &[]), 0);
    }
}
