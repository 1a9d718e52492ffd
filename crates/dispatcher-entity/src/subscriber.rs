//! Live entity cache for one collection.
//!
//! [`EntitySubscriber::start`] registers for
//! `entity-subscriber.<collection>.changed` and applies every change event to
//! the cache. Queries run locally while the cache is known to be complete and
//! go to `<collection>.query` on the server otherwise.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use dispatcher_client::DispatcherClient;
use dispatcher_core::HandlerCookie;
use dispatcher_core::constants::{entity_changed_event, entity_query_method};
use dispatcher_settings::EntitySettings;

use crate::change::{ChangeAction, ChangeEvent, CollectionChange, EntityId};
use crate::collection::{Collection, Upsert};
use crate::errors::{ChangeError, QueryError, Result};
use crate::query::{Query, QueryResult};

const CHANGE_BUFFER: usize = 256;

/// Cache of one server collection, kept current by change events.
pub struct EntitySubscriber {
    name: String,
    client: DispatcherClient,
    collection: Arc<RwLock<Collection>>,
    changes: broadcast::Sender<CollectionChange>,
    cookie: Mutex<Option<HandlerCookie>>,
    fetch_initial_snapshot: bool,
}

impl EntitySubscriber {
    /// Subscriber for `name` holding at most `max_size` entities.
    pub fn new(client: DispatcherClient, name: &str, max_size: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            name: name.to_owned(),
            client,
            collection: Arc::new(RwLock::new(Collection::new(name, max_size))),
            changes,
            cookie: Mutex::new(None),
            fetch_initial_snapshot: false,
        }
    }

    /// Subscriber configured from settings.
    pub fn from_settings(client: DispatcherClient, name: &str, settings: &EntitySettings) -> Self {
        Self::new(client, name, settings.max_size).with_initial_snapshot(settings.fetch_initial_snapshot)
    }

    /// Load the collection from the server when started.
    #[must_use]
    pub fn with_initial_snapshot(mut self, enabled: bool) -> Self {
        self.fetch_initial_snapshot = enabled;
        self
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Lifecycle ──

    /// Start following change events. Calling it again is a no-op.
    ///
    /// With the initial snapshot enabled, also loads up to `max_size`
    /// entities from the server; a failed load is returned but the
    /// subscription stays active.
    pub async fn start(&self) -> Result<()> {
        {
            let mut cookie = self.cookie.lock();
            if cookie.is_some() {
                return Ok(());
            }
            let collection = Arc::clone(&self.collection);
            let changes = self.changes.clone();
            *cookie = Some(self.client.register_event_handler(
                &entity_changed_event(&self.name),
                move |args: &Value| {
                    let _ = apply_change(&collection, &changes, args)?;
                    Ok(())
                },
            ));
        }
        info!(collection = %self.name, "entity subscriber started");

        if self.fetch_initial_snapshot {
            self.load_snapshot().await?;
        }
        Ok(())
    }

    /// Stop following change events. The cache keeps its contents.
    pub fn stop(&self) -> bool {
        let Some(cookie) = self.cookie.lock().take() else {
            return false;
        };
        let removed = self
            .client
            .unregister_event_handler(&entity_changed_event(&self.name), cookie);
        info!(collection = %self.name, "entity subscriber stopped");
        removed
    }

    /// Whether change events are being followed.
    pub fn is_started(&self) -> bool {
        self.cookie.lock().is_some()
    }

    /// Applied changes, as they happen.
    pub fn changes(&self) -> broadcast::Receiver<CollectionChange> {
        self.changes.subscribe()
    }

    async fn load_snapshot(&self) -> Result<()> {
        let limit = self.collection.read().max_size();
        let result = self
            .client
            .call_async(&entity_query_method(&self.name), json!([[], {"limit": limit}]))
            .await?;
        let Value::Array(entities) = result else {
            warn!(collection = %self.name, "snapshot query did not return a list");
            return Ok(());
        };

        let change = {
            let mut collection = self.collection.write();
            let ids = entities
                .into_iter()
                .filter_map(|entity| match collection.upsert(entity) {
                    Upsert::Inserted { id, .. } | Upsert::Updated { id } => Some(id),
                    Upsert::MissingId => None,
                })
                .collect();
            CollectionChange {
                collection: self.name.clone(),
                action: ChangeAction::Create,
                ids,
            }
        };
        debug!(collection = %self.name, loaded = change.ids.len(), "initial snapshot loaded");
        let _ = self.changes.send(change);
        Ok(())
    }

    // ── Cache access ──

    /// Apply a change event's `args` directly.
    pub fn apply_change(&self, args: &Value) -> std::result::Result<CollectionChange, ChangeError> {
        apply_change(&self.collection, &self.changes, args)
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.collection.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.collection.read().is_empty()
    }

    /// Cached entity by id.
    pub fn get(&self, id: &EntityId) -> Option<Value> {
        self.collection.read().get(id).cloned()
    }

    /// All cached entities in insertion order.
    pub fn snapshot(&self) -> Vec<Value> {
        self.collection.read().snapshot()
    }

    /// Capacity.
    pub fn max_size(&self) -> usize {
        self.collection.read().max_size()
    }

    /// Change capacity; returns evicted ids.
    pub fn resize(&self, max_size: usize) -> Vec<EntityId> {
        self.collection.write().resize(max_size)
    }

    /// Whether queries are answered locally.
    pub fn is_complete(&self) -> bool {
        self.collection.read().is_complete()
    }

    // ── Queries ──

    /// Query the collection.
    pub async fn query(&self, rules: Value, options: Value) -> Result<QueryResult> {
        if let Some(result) = self.query_local(&rules, &options)? {
            return Ok(result);
        }
        let value = self
            .client
            .call_async(&entity_query_method(&self.name), json!([rules, options]))
            .await?;
        Ok(QueryResult::Remote(value))
    }

    /// Query the collection, delivering the result to `callback`.
    ///
    /// Local results are delivered before this returns.
    pub fn query_with<F>(&self, rules: Value, options: Value, callback: F)
    where
        F: FnOnce(Result<QueryResult>) + Send + 'static,
    {
        match self.query_local(&rules, &options) {
            Ok(Some(result)) => return callback(Ok(result)),
            Err(e) => return callback(Err(e)),
            Ok(None) => {}
        }

        let slot = Arc::new(Mutex::new(Some(callback)));
        let pending = Arc::clone(&slot);
        let sent = self.client.call(
            &entity_query_method(&self.name),
            json!([rules, options]),
            move |outcome| {
                let callback = pending.lock().take();
                if let Some(callback) = callback {
                    callback(outcome.map(QueryResult::Remote).map_err(QueryError::from));
                }
            },
        );
        if let Err(e) = sent {
            let callback = slot.lock().take();
            if let Some(callback) = callback {
                callback(Err(e.into()));
            }
        }
    }

    /// Local answer, or `None` when the cache may be incomplete.
    fn query_local(&self, rules: &Value, options: &Value) -> Result<Option<QueryResult>> {
        let query = Query::parse(rules, options)?;
        let collection = self.collection.read();
        if !collection.is_complete() {
            debug!(
                collection = %self.name,
                size = collection.len(),
                evicted = collection.has_evicted(),
                "cache may be incomplete, querying server"
            );
            return Ok(None);
        }
        Ok(Some(query.run(collection.iter())))
    }
}

impl Drop for EntitySubscriber {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for EntitySubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySubscriber")
            .field("name", &self.name)
            .field("started", &self.is_started())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

fn apply_change(
    collection: &RwLock<Collection>,
    changes: &broadcast::Sender<CollectionChange>,
    args: &Value,
) -> std::result::Result<CollectionChange, ChangeError> {
    let event = ChangeEvent::from_value(args).inspect_err(|e| {
        warn!(error = %e, "dropping malformed change event");
    })?;
    let change = collection.write().apply(&event);
    let _ = changes.send(change.clone());
    Ok(change)
}
