//! Query engine over cached entities.
//!
//! A query is a list of [`Rule`]s (implicitly and-ed) plus
//! [`QueryOptions`]. Local execution filters, sorts, paginates, then shapes
//! the result into a [`QueryResult`].

pub mod engine;
pub mod eval;
pub mod options;
pub mod rules;

pub use engine::{Query, QueryResult, sort_entities};
pub use eval::{compare, field_value, loose_eq, matches, sort_cmp};
pub use options::{QueryOptions, SortKey};
pub use rules::{Conversion, FieldOperator, FieldRule, LogicOperator, Rule, parse_rules};
