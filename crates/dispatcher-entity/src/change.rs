//! Collection change events.
//!
//! The server publishes `entity-subscriber.<collection>.changed` with
//! `{action, entities}`. Delete events list either ids or objects carrying an
//! `id`; some servers send the ids in a separate `ids` array instead.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ChangeError;

/// Identity of a cached entity.
///
/// String ids are kept verbatim; other scalars use their JSON text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Id from a scalar JSON value. `null`, arrays and objects have none.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            Value::Bool(b) => Some(Self(b.to_string())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Id of an entity object, read from its `id` field.
    pub fn of(entity: &Value) -> Option<Self> {
        entity.get("id").and_then(Self::from_value)
    }

    /// Id for a delete target: an object carrying `id`, or a bare id.
    pub fn of_target(target: &Value) -> Option<Self> {
        if target.is_object() {
            Self::of(target)
        } else {
            Self::from_value(target)
        }
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Entities added.
    Create,
    /// Entities replaced.
    Update,
    /// Entities removed.
    Delete,
}

impl ChangeAction {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed change event.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    /// What happened.
    pub action: ChangeAction,
    /// Entities (create/update) or delete targets.
    pub entities: Vec<Value>,
}

impl ChangeEvent {
    /// Parse an event's `args`.
    pub fn from_value(args: &Value) -> Result<Self, ChangeError> {
        let obj = args
            .as_object()
            .ok_or_else(|| ChangeError::Malformed("expected an object".into()))?;

        let action = match obj.get("action").and_then(Value::as_str) {
            Some("create") => ChangeAction::Create,
            Some("update") => ChangeAction::Update,
            Some("delete") => ChangeAction::Delete,
            Some(other) => return Err(ChangeError::UnknownAction(other.to_owned())),
            None => return Err(ChangeError::Malformed("missing action".into())),
        };

        let mut entities = list(obj.get("entities"), "entities")?;
        if action == ChangeAction::Delete {
            entities.extend(list(obj.get("ids"), "ids")?);
        }
        Ok(Self { action, entities })
    }
}

fn list(value: Option<&Value>, key: &str) -> Result<Vec<Value>, ChangeError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(ChangeError::Malformed(format!("{key} must be an array"))),
    }
}

/// Applied change, as published to subscriber listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionChange {
    /// Collection name.
    pub collection: String,
    /// What happened.
    pub action: ChangeAction,
    /// Ids written (create/update) or actually removed (delete).
    pub ids: Vec<EntityId>,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn ids_from_scalars() {
        assert_eq!(EntityId::from_value(&json!("ada0")).unwrap().as_str(), "ada0");
        assert_eq!(EntityId::from_value(&json!(42)).unwrap().as_str(), "42");
        assert_eq!(EntityId::from_value(&json!(true)).unwrap().as_str(), "true");
        assert!(EntityId::from_value(&json!(null)).is_none());
        assert!(EntityId::from_value(&json!([1])).is_none());
    }

    #[test]
    fn id_of_entity() {
        assert_eq!(EntityId::of(&json!({"id": 7, "name": "x"})), Some(EntityId::from("7")));
        assert_eq!(EntityId::of(&json!({"name": "x"})), None);
    }

    #[test]
    fn delete_targets() {
        assert_eq!(EntityId::of_target(&json!({"id": "a"})), Some("a".into()));
        assert_eq!(EntityId::of_target(&json!("b")), Some("b".into()));
        assert_eq!(EntityId::of_target(&json!(3)), Some("3".into()));
    }

    #[test]
    fn parse_create() {
        let event = ChangeEvent::from_value(&json!({
            "action": "create",
            "entities": [{"id": 1}, {"id": 2}],
        }))
        .unwrap();
        assert_eq!(event.action, ChangeAction::Create);
        assert_eq!(event.entities.len(), 2);
    }

    #[test]
    fn parse_delete_merges_ids() {
        let event = ChangeEvent::from_value(&json!({
            "action": "delete",
            "entities": [{"id": 1}],
            "ids": [2, 3],
        }))
        .unwrap();
        assert_eq!(event.entities, vec![json!({"id": 1}), json!(2), json!(3)]);
    }

    #[test]
    fn ids_ignored_outside_delete() {
        let event = ChangeEvent::from_value(&json!({
            "action": "update",
            "entities": [{"id": 1}],
            "ids": [2],
        }))
        .unwrap();
        assert_eq!(event.entities.len(), 1);
    }

    #[test]
    fn missing_entities_is_empty() {
        let event = ChangeEvent::from_value(&json!({"action": "delete", "ids": ["x"]})).unwrap();
        assert_eq!(event.entities, vec![json!("x")]);
    }

    #[test]
    fn malformed_events() {
        assert_matches!(
            ChangeEvent::from_value(&json!([1, 2])),
            Err(ChangeError::Malformed(_))
        );
        assert_matches!(
            ChangeEvent::from_value(&json!({"entities": []})),
            Err(ChangeError::Malformed(_))
        );
        assert_matches!(
            ChangeEvent::from_value(&json!({"action": "rename", "entities": []})),
            Err(ChangeError::UnknownAction(a)) if a == "rename"
        );
        assert_matches!(
            ChangeEvent::from_value(&json!({"action": "create", "entities": {"id": 1}})),
            Err(ChangeError::Malformed(_))
        );
    }

    #[test]
    fn action_names() {
        assert_eq!(ChangeAction::Delete.to_string(), "delete");
        assert_eq!(serde_json::to_value(ChangeAction::Update).unwrap(), json!("update"));
    }
}
