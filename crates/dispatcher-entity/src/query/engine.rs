//! Local query execution: filter, sort, paginate, shape.

use serde_json::{Value, json};

use super::eval::{field_value, matches, sort_cmp};
use super::options::{QueryOptions, SortKey};
use super::rules::{Rule, parse_rules};
use crate::errors::Result;

/// Query outcome.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryResult {
    /// `single`: the first match, if any.
    Single(Option<Value>),
    /// `count`: number of matches after pagination.
    Count(usize),
    /// Matches in order.
    Entities(Vec<Value>),
    /// Answer from the server, passed through unchanged.
    Remote(Value),
}

impl QueryResult {
    /// JSON form: the entity or `null`, the count, the array, or the
    /// server's result.
    pub fn into_value(self) -> Value {
        match self {
            Self::Single(entity) => entity.unwrap_or(Value::Null),
            Self::Count(n) => json!(n),
            Self::Entities(entities) => Value::Array(entities),
            Self::Remote(value) => value,
        }
    }

    /// Whether the server answered.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// A parsed query.
#[derive(Clone, Debug, Default)]
pub struct Query {
    /// Filter; implicitly and-ed.
    pub rules: Vec<Rule>,
    /// Sort, pagination and shape.
    pub options: QueryOptions,
}

impl Query {
    /// Query from parsed parts.
    pub fn new(rules: Vec<Rule>, options: QueryOptions) -> Self {
        Self { rules, options }
    }

    /// Parse rules and options from JSON.
    pub fn parse(rules: &Value, options: &Value) -> Result<Self> {
        Ok(Self {
            rules: parse_rules(rules)?,
            options: QueryOptions::from_value(options)?,
        })
    }

    /// Run against `entities`, given in cache order.
    pub fn run<'a, I>(&self, entities: I) -> QueryResult
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut selected: Vec<&Value> = entities
            .into_iter()
            .filter(|e| matches(e, &self.rules))
            .collect();

        let keys = self.options.sort_keys();
        if !keys.is_empty() {
            sort_entities(&mut selected, &keys);
        }

        let offset = self.options.offset.unwrap_or(0);
        let limit = self.options.limit.unwrap_or(usize::MAX);
        let mut page = selected.into_iter().skip(offset).take(limit);

        if self.options.single {
            QueryResult::Single(page.next().cloned())
        } else if self.options.count {
            QueryResult::Count(page.count())
        } else {
            QueryResult::Entities(page.cloned().collect())
        }
    }
}

/// Stable multi-key sort. Ties on every key keep their input order.
pub fn sort_entities(entities: &mut [&Value], keys: &[SortKey]) {
    entities.sort_by(|a, b| {
        keys.iter()
            .map(|key| {
                let ord = sort_cmp(field_value(a, &key.field), field_value(b, &key.field));
                if key.descending { ord.reverse() } else { ord }
            })
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disks() -> Vec<Value> {
        vec![
            json!({"id": 1, "name": "ada0", "status": "up", "size": 500}),
            json!({"id": 2, "name": "ada1", "status": "down", "size": 1000}),
            json!({"id": 3, "name": "da0", "status": "up", "size": 250}),
            json!({"id": 4, "name": "da1", "status": "up", "size": 1000}),
            json!({"id": 5, "name": "nvd0", "status": "up", "size": 2000}),
            json!({"id": 6, "name": "ada2", "status": "up", "size": 500}),
        ]
    }

    fn run(rules: Value, options: Value) -> QueryResult {
        Query::parse(&rules, &options).unwrap().run(&disks())
    }

    fn ids(result: QueryResult) -> Vec<i64> {
        let QueryResult::Entities(entities) = result else {
            panic!("expected entities, got {result:?}");
        };
        entities.iter().map(|e| e["id"].as_i64().unwrap()).collect()
    }

    #[test]
    fn filter_by_status() {
        assert_eq!(ids(run(json!([["status", "=", "up"]]), json!({}))), vec![1, 3, 4, 5, 6]);
    }

    #[test]
    fn or_filter() {
        assert_eq!(
            ids(run(json!([["or", [["id", "=", 1], ["id", "=", 2]]]]), json!({}))),
            vec![1, 2]
        );
        assert_eq!(
            ids(run(json!(["or", [["id", "=", 1], ["id", "=", 2]]]), json!({}))),
            vec![1, 2]
        );
    }

    #[test]
    fn bare_or_tuple_selects_only_matches() {
        let entities = vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})];
        let query = Query::parse(&json!(["or", [["a", "=", 1], ["a", "=", 2]]]), &json!({})).unwrap();
        assert_eq!(
            query.run(&entities),
            QueryResult::Entities(vec![json!({"a": 1}), json!({"a": 2})])
        );
    }

    #[test]
    fn sort_descending_is_stable() {
        assert_eq!(
            ids(run(json!([]), json!({"sort": ["-size"]}))),
            vec![5, 2, 4, 1, 6, 3]
        );
    }

    #[test]
    fn multi_key_sort() {
        assert_eq!(
            ids(run(json!([]), json!({"sort": ["size", "-name"]}))),
            vec![3, 6, 1, 4, 2, 5]
        );
    }

    #[test]
    fn sort_by_name_descending() {
        assert_eq!(
            ids(run(json!([]), json!({"sort": ["-name"]}))),
            vec![5, 4, 3, 6, 2, 1]
        );
    }

    #[test]
    fn offset_then_limit() {
        // Five matches; the second one.
        assert_eq!(
            ids(run(json!([["status", "=", "up"]]), json!({"offset": 1, "limit": 1}))),
            vec![3]
        );
        assert_eq!(ids(run(json!([]), json!({"offset": 4}))), vec![5, 6]);
        assert_eq!(ids(run(json!([]), json!({"limit": 2}))), vec![1, 2]);
        assert!(ids(run(json!([]), json!({"offset": 10}))).is_empty());
        assert!(ids(run(json!([]), json!({"limit": 0}))).is_empty());
    }

    #[test]
    fn single_shape() {
        assert_eq!(
            run(json!([["name", "=", "da0"]]), json!({"single": true})),
            QueryResult::Single(Some(disks()[2].clone()))
        );
        assert_eq!(
            run(json!([["name", "=", "none"]]), json!({"single": true})),
            QueryResult::Single(None)
        );
    }

    #[test]
    fn single_wins_over_count() {
        assert_matches::assert_matches!(
            run(json!([]), json!({"single": true, "count": true})),
            QueryResult::Single(Some(_))
        );
    }

    #[test]
    fn count_after_pagination() {
        assert_eq!(run(json!([["status", "=", "up"]]), json!({"count": true})), QueryResult::Count(5));
        assert_eq!(
            run(json!([]), json!({"count": true, "offset": 2, "limit": 3})),
            QueryResult::Count(3)
        );
    }

    #[test]
    fn into_value_shapes() {
        assert_eq!(QueryResult::Single(None).into_value(), Value::Null);
        assert_eq!(QueryResult::Count(3).into_value(), json!(3));
        assert_eq!(QueryResult::Entities(vec![json!(1)]).into_value(), json!([1]));
        assert_eq!(QueryResult::Remote(json!({"a": 1})).into_value(), json!({"a": 1}));
        assert!(QueryResult::Remote(Value::Null).is_remote());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sort_is_stable(keys in proptest::collection::vec(0u8..4, 0..40), descending: bool) {
                let entities: Vec<Value> = keys
                    .iter()
                    .enumerate()
                    .map(|(seq, k)| json!({"k": k, "seq": seq}))
                    .collect();
                let mut refs: Vec<&Value> = entities.iter().collect();
                let key = SortKey { field: "k".into(), descending };
                sort_entities(&mut refs, &[key]);

                for pair in refs.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    let (ka, kb) = (a["k"].as_u64().unwrap(), b["k"].as_u64().unwrap());
                    if descending {
                        prop_assert!(ka >= kb);
                    } else {
                        prop_assert!(ka <= kb);
                    }
                    if ka == kb {
                        prop_assert!(a["seq"].as_u64() < b["seq"].as_u64());
                    }
                }
            }

            #[test]
            fn pagination_is_a_window(n in 0usize..30, offset in 0usize..35, limit in 0usize..35) {
                let entities: Vec<Value> = (0..n).map(|i| json!({"i": i})).collect();
                let options = QueryOptions::default().offset(offset).limit(limit);
                let result = Query::new(Vec::new(), options).run(&entities);
                let expected: Vec<Value> = entities.iter().skip(offset).take(limit).cloned().collect();
                prop_assert_eq!(result, QueryResult::Entities(expected));
            }
        }
    }
}
