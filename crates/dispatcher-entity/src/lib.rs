//! # dispatcher-entity
//!
//! Client-side mirror of server entity collections.
//!
//! - **Collection**: bounded FIFO store keyed by [`EntityId`]; eviction marks
//!   the cache as possibly incomplete
//! - **Changes**: `create`, `update` and `delete` events parsed into
//!   [`ChangeEvent`]s and applied in one step
//! - **Queries**: rule filters, multi-key sort, pagination and result shapes
//!   run locally, or on the server through `<collection>.query` when the
//!   cache cannot answer
//! - **Subscriber**: [`EntitySubscriber`] ties a collection to a
//!   [`DispatcherClient`](dispatcher_client::DispatcherClient)

#![deny(unsafe_code)]

pub mod change;
pub mod collection;
pub mod errors;
pub mod query;
pub mod subscriber;

pub use change::{ChangeAction, ChangeEvent, CollectionChange, EntityId};
pub use collection::{Collection, Upsert};
pub use errors::{ChangeError, QueryError, Result};
pub use query::{Query, QueryOptions, QueryResult, Rule, SortKey};
pub use subscriber::EntitySubscriber;
