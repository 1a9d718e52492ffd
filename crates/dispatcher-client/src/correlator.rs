//! Pending-call table.
//!
//! Every outbound call gets an entry keyed by its [`CallId`] and a timer task.
//! Whichever comes first, the response or the timer, removes the entry and
//! invokes the callback; the loser finds nothing and does nothing. A timer
//! that fires after completion only sends its id down the expiry channel,
//! where [`Correlator::expire`] ignores it.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use dispatcher_core::{CallId, ClientError};

/// Outcome delivered to a call's callback.
pub type CallResult = Result<Value, ClientError>;

/// Callback invoked once with a call's outcome.
pub type CallCallback = Box<dyn FnOnce(CallResult) + Send + 'static>;

struct PendingCall {
    method: String,
    timeout: Duration,
    callback: CallCallback,
    timer: JoinHandle<()>,
}

/// Table of in-flight calls.
pub struct Correlator {
    pending: HashMap<CallId, PendingCall>,
    expiry_tx: mpsc::UnboundedSender<CallId>,
}

impl Correlator {
    /// Create a correlator whose timers report on `expiry_tx`.
    pub fn new(expiry_tx: mpsc::UnboundedSender<CallId>) -> Self {
        Self {
            pending: HashMap::new(),
            expiry_tx,
        }
    }

    /// Register a call and arm its timer.
    ///
    /// Returns `false` (and fails the callback) if `id` is already pending.
    pub fn register(
        &mut self,
        id: CallId,
        method: impl Into<String>,
        timeout: Duration,
        callback: CallCallback,
    ) -> bool {
        let method = method.into();
        if self.pending.contains_key(&id) {
            error!(call_id = %id, method = %method, "duplicate call id");
            invoke(
                &id,
                callback,
                Err(ClientError::Other {
                    message: format!("duplicate call id {id}"),
                }),
            );
            return false;
        }

        let expiry_tx = self.expiry_tx.clone();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = expiry_tx.send(timer_id);
        });

        debug!(call_id = %id, method = %method, timeout_ms = millis(timeout), "call registered");
        let _ = self.pending.insert(
            id,
            PendingCall {
                method,
                timeout,
                callback,
                timer,
            },
        );
        true
    }

    /// Deliver a response or server error for `id`.
    ///
    /// Returns `false` when no call is pending under `id`.
    pub fn complete(&mut self, id: &CallId, outcome: CallResult) -> bool {
        let Some(call) = self.pending.remove(id) else {
            return false;
        };
        call.timer.abort();
        debug!(call_id = %id, method = %call.method, ok = outcome.is_ok(), "call completed");
        invoke(id, call.callback, outcome);
        true
    }

    /// Fail `id` with a timeout if it is still pending.
    pub fn expire(&mut self, id: &CallId) -> bool {
        let Some(call) = self.pending.remove(id) else {
            debug!(call_id = %id, "timer fired for a finished call");
            return false;
        };
        let timeout_ms = millis(call.timeout);
        warn!(call_id = %id, method = %call.method, timeout_ms, "call timed out");
        invoke(
            id,
            call.callback,
            Err(ClientError::CallTimeout {
                method: call.method,
                timeout_ms,
            }),
        );
        true
    }

    /// Drop `id` without invoking its callback.
    pub fn cancel(&mut self, id: &CallId) -> bool {
        let Some(call) = self.pending.remove(id) else {
            return false;
        };
        call.timer.abort();
        debug!(call_id = %id, method = %call.method, "call cancelled");
        true
    }

    /// Whether `id` is pending.
    pub fn is_pending(&self, id: &CallId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending calls.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no calls are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        for call in self.pending.values() {
            call.timer.abort();
        }
    }
}

/// Run `callback` with `outcome`, containing panics.
pub(crate) fn invoke(id: &CallId, callback: CallCallback, outcome: CallResult) {
    if catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
        error!(call_id = %id, "call callback panicked");
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    type Outcomes = Arc<Mutex<Vec<CallResult>>>;

    fn recorder() -> (Outcomes, CallCallback) {
        let outcomes: Outcomes = Arc::default();
        let sink = Arc::clone(&outcomes);
        (outcomes, Box::new(move |r| sink.lock().push(r)))
    }

    fn correlator() -> (Correlator, mpsc::UnboundedReceiver<CallId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Correlator::new(tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn response_completes_once() {
        let (mut c, mut expired) = correlator();
        let (outcomes, cb) = recorder();
        let id = CallId::new();
        assert!(c.register(id.clone(), "system.info", Duration::from_secs(1), cb));
        assert!(c.is_pending(&id));

        assert!(c.complete(&id, Ok(json!({"version": "1"}))));
        assert!(!c.complete(&id, Ok(json!(null))));
        assert!(c.is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(expired.try_recv().is_err());

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0], Ok(json!({"version": "1"})));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fails_call_with_timeout() {
        let (mut c, mut expired) = correlator();
        let (outcomes, cb) = recorder();
        let id = CallId::new();
        let _ = c.register(id.clone(), "disk.query", Duration::from_millis(500), cb);

        let fired = expired.recv().await.unwrap();
        assert_eq!(fired, id);
        assert!(c.expire(&fired));

        // Late response is unmatched.
        assert!(!c.complete(&id, Ok(json!(1))));

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert_matches!(
            &outcomes[0],
            Err(ClientError::CallTimeout { method, timeout_ms: 500 }) if method == "disk.query"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_after_completion_is_noop() {
        let (mut c, _expired) = correlator();
        let (outcomes, cb) = recorder();
        let id = CallId::new();
        let _ = c.register(id.clone(), "m", Duration::from_secs(1), cb);
        assert!(c.complete(&id, Err(ClientError::Logout)));
        assert!(!c.expire(&id));
        assert_eq!(outcomes.lock().len(), 1);
    }

    #[tokio::test]
    async fn cancel_skips_callback() {
        let (mut c, _expired) = correlator();
        let (outcomes, cb) = recorder();
        let id = CallId::new();
        let _ = c.register(id.clone(), "m", Duration::from_secs(1), cb);
        assert!(c.cancel(&id));
        assert!(!c.cancel(&id));
        assert!(!c.complete(&id, Ok(json!(1))));
        assert!(outcomes.lock().is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let (mut c, _expired) = correlator();
        let (first, cb1) = recorder();
        let (second, cb2) = recorder();
        let id = CallId::from("fixed");
        assert!(c.register(id.clone(), "a", Duration::from_secs(1), cb1));
        assert!(!c.register(id.clone(), "b", Duration::from_secs(1), cb2));
        assert_eq!(c.len(), 1);
        assert!(first.lock().is_empty());
        assert_matches!(second.lock()[0], Err(ClientError::Other { .. }));
    }

    #[tokio::test]
    async fn panicking_callback_is_contained() {
        let (mut c, _expired) = correlator();
        let id = CallId::new();
        let _ = c.register(id.clone(), "m", Duration::from_secs(1), Box::new(|_| panic!("boom")));
        assert!(c.complete(&id, Ok(json!(null))));
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn independent_calls() {
        let (mut c, _expired) = correlator();
        let (a_out, a) = recorder();
        let (b_out, b) = recorder();
        let (ia, ib) = (CallId::new(), CallId::new());
        let _ = c.register(ia.clone(), "a", Duration::from_secs(1), a);
        let _ = c.register(ib.clone(), "b", Duration::from_secs(1), b);
        assert!(c.complete(&ib, Ok(json!("b"))));
        assert!(c.is_pending(&ia));
        assert!(c.complete(&ia, Ok(json!("a"))));
        assert_eq!(a_out.lock()[0], Ok(json!("a")));
        assert_eq!(b_out.lock()[0], Ok(json!("b")));
    }
}
