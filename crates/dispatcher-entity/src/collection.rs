//! Bounded, insertion-ordered entity store.
//!
//! Entities live in an [`IndexMap`] in insertion order. When an insert pushes
//! the size over `max_size`, the oldest entry goes. Updates replace the value
//! in place and keep the entry's position.
//!
//! Once anything has been evicted the collection may no longer mirror the
//! server, and [`Collection::is_complete`] stays false for good.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::change::{ChangeAction, ChangeEvent, CollectionChange, EntityId};

/// Result of [`Collection::upsert`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Upsert {
    /// New entity; `evicted` is the oldest entry dropped to make room.
    Inserted {
        /// Id of the inserted entity.
        id: EntityId,
        /// Entry evicted to make room, if any.
        evicted: Option<EntityId>,
    },
    /// Existing entity replaced.
    Updated {
        /// Id of the replaced entity.
        id: EntityId,
    },
    /// Entity has no usable `id`; nothing stored.
    MissingId,
}

/// One cached collection.
#[derive(Clone, Debug)]
pub struct Collection {
    name: String,
    max_size: usize,
    store: IndexMap<EntityId, Value>,
    evicted: bool,
}

impl Collection {
    /// Empty collection holding at most `max_size` entities (at least one).
    pub fn new(name: impl Into<String>, max_size: usize) -> Self {
        Self {
            name: name.into(),
            max_size: max_size.max(1),
            store: IndexMap::new(),
            evicted: false,
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Whether `id` is cached.
    pub fn has(&self, id: &EntityId) -> bool {
        self.store.contains_key(id)
    }

    /// Cached entity for `id`.
    pub fn get(&self, id: &EntityId) -> Option<&Value> {
        self.store.get(id)
    }

    /// Entities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.store.values()
    }

    /// Copy of all entities in insertion order.
    pub fn snapshot(&self) -> Vec<Value> {
        self.store.values().cloned().collect()
    }

    /// Whether anything has ever been evicted.
    pub fn has_evicted(&self) -> bool {
        self.evicted
    }

    /// Whether local answers are trustworthy: nothing was ever evicted and
    /// the collection is not at capacity.
    pub fn is_complete(&self) -> bool {
        !self.evicted && self.store.len() < self.max_size
    }

    /// Insert or replace an entity by its `id`.
    pub fn upsert(&mut self, entity: Value) -> Upsert {
        let Some(id) = EntityId::of(&entity) else {
            warn!(collection = %self.name, "ignoring entity without id");
            return Upsert::MissingId;
        };

        if let Some(slot) = self.store.get_mut(&id) {
            *slot = entity;
            return Upsert::Updated { id };
        }

        let _ = self.store.insert(id.clone(), entity);
        let evicted = if self.store.len() > self.max_size {
            self.evict_oldest()
        } else {
            None
        };
        Upsert::Inserted { id, evicted }
    }

    /// Remove `id`. Returns the entity if it was cached.
    pub fn remove(&mut self, id: &EntityId) -> Option<Value> {
        self.store.shift_remove(id)
    }

    /// Change capacity, evicting oldest entries if the collection is over the
    /// new limit. Returns the evicted ids.
    pub fn resize(&mut self, max_size: usize) -> Vec<EntityId> {
        let max_size = max_size.max(1);
        let mut evicted = Vec::new();
        while self.store.len() > max_size {
            match self.evict_oldest() {
                Some(id) => evicted.push(id),
                None => break,
            }
        }
        debug!(collection = %self.name, max_size, evicted = evicted.len(), "collection resized");
        self.max_size = max_size;
        evicted
    }

    /// Apply a change event in one step.
    pub fn apply(&mut self, event: &ChangeEvent) -> CollectionChange {
        let mut ids = Vec::with_capacity(event.entities.len());
        match event.action {
            ChangeAction::Create | ChangeAction::Update => {
                for entity in &event.entities {
                    match self.upsert(entity.clone()) {
                        Upsert::Inserted { id, .. } | Upsert::Updated { id } => ids.push(id),
                        Upsert::MissingId => {}
                    }
                }
            }
            ChangeAction::Delete => {
                for target in &event.entities {
                    let Some(id) = EntityId::of_target(target) else {
                        warn!(collection = %self.name, "ignoring delete target without id");
                        continue;
                    };
                    if self.remove(&id).is_some() {
                        ids.push(id);
                    }
                }
            }
        }
        debug!(
            collection = %self.name,
            action = %event.action,
            applied = ids.len(),
            size = self.store.len(),
            "change applied"
        );
        CollectionChange {
            collection: self.name.clone(),
            action: event.action,
            ids,
        }
    }

    fn evict_oldest(&mut self) -> Option<EntityId> {
        let (id, _) = self.store.shift_remove_index(0)?;
        self.evicted = true;
        debug!(collection = %self.name, id = %id, "evicted oldest entity");
        Some(id)
    }
}
