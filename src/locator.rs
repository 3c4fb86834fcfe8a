//! References to remote state: collection queries and single documents.
//!
//! A [`Locator`] is what a binding attaches to. Its variant fixes the
//! [`Operation`] reported when the remote layer denies the read: `List`
//! for collection queries and `Get` for document references.
//!
//! Paths are slash-separated, `collection` for queries and
//! `collection/id` for documents.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::permission::Operation;

/// Sort direction for [`CollectionQuery::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Equality constraint on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    /// Field name.
    pub field: String,
    /// Required value.
    pub value: Value,
}

/// A query over one collection.
///
/// # Examples
///
/// ```
/// use office_sync::locator::{CollectionQuery, Direction};
///
/// let query = CollectionQuery::new("tasks")
///     .where_eq("assignee_id", "alice")
///     .order_by("created_at", Direction::Descending)
///     .limit(20);
/// assert_eq!(query.collection(), "tasks");
/// assert_eq!(query.filters().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionQuery {
    collection: String,
    filters: Vec<FieldFilter>,
    order: Option<(String, Direction)>,
    limit: Option<usize>,
}

impl CollectionQuery {
    /// Selects every document of `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Adds an equality filter.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Orders results by `field`.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order = Some((field.into(), direction));
        self
    }

    /// Caps the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Equality filters, all of which must hold.
    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    /// Returns `true` if `data` satisfies every filter.
    pub fn matches(&self, data: &Value) -> bool {
        self.filters
            .iter()
            .all(|filter| data.get(&filter.field) == Some(&filter.value))
    }

    /// Filters, orders and truncates `(id, data)` rows.
    ///
    /// Rows without the ordering field sort last; ties keep input order.
    pub fn apply<'a>(&self, rows: Vec<(&'a str, &'a Value)>) -> Vec<(&'a str, &'a Value)> {
        let mut rows: Vec<_> = rows
            .into_iter()
            .filter(|(_, data)| self.matches(data))
            .collect();

        if let Some((field, direction)) = &self.order {
            rows.sort_by(|(_, a), (_, b)| {
                let ordering = match (a.get(field), b.get(field)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    (Some(_), None) => return Ordering::Less,
                    (None, Some(_)) => return Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}

/// Total order over JSON values: values of different kinds order by
/// kind (null, bool, number, string, array, object).
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Reference to a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    collection: String,
    id: String,
}

impl DocumentRef {
    /// Refers to document `id` in `collection`.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Document id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `collection/id`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

/// What a binding attaches to.
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    /// A live collection query.
    Collection(CollectionQuery),
    /// A live single document.
    Document(DocumentRef),
}

impl Locator {
    /// The read operation this locator performs.
    ///
    /// # Examples
    ///
    /// ```
    /// use office_sync::locator::{CollectionQuery, DocumentRef, Locator};
    /// use office_sync::Operation;
    ///
    /// assert_eq!(Locator::from(CollectionQuery::new("tasks")).operation(), Operation::List);
    /// assert_eq!(Locator::from(DocumentRef::new("users", "bob")).operation(), Operation::Get);
    /// ```
    pub fn operation(&self) -> Operation {
        match self {
            Self::Collection(_) => Operation::List,
            Self::Document(_) => Operation::Get,
        }
    }

    /// Resource path reported in permission errors.
    pub fn path(&self) -> String {
        match self {
            Self::Collection(query) => query.collection().to_string(),
            Self::Document(doc) => doc.path(),
        }
    }
}

impl From<CollectionQuery> for Locator {
    fn from(query: CollectionQuery) -> Self {
        Self::Collection(query)
    }
}

impl From<DocumentRef> for Locator {
    fn from(doc: DocumentRef) -> Self {
        Self::Document(doc)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation(), self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_require_every_field() {
        let query = CollectionQuery::new("tasks")
            .where_eq("assignee_id", "alice")
            .where_eq("status", "done");
        assert!(query.matches(&json!({"assignee_id": "alice", "status": "done"})));
        assert!(!query.matches(&json!({"assignee_id": "alice", "status": "todo"})));
        assert!(!query.matches(&json!({"status": "done"})));
    }

    #[test]
    fn apply_orders_and_limits() {
        let a = json!({"rank": 3});
        let b = json!({"rank": 1});
        let c = json!({"rank": 2});
        let d = json!({});
        let rows = vec![("a", &a), ("b", &b), ("d", &d), ("c", &c)];

        let ascending = CollectionQuery::new("x").order_by("rank", Direction::Ascending);
        let ids: Vec<&str> = ascending.apply(rows.clone()).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["b", "c", "a", "d"]);

        let top = CollectionQuery::new("x")
            .order_by("rank", Direction::Descending)
            .limit(2);
        let ids: Vec<&str> = top.apply(rows).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn mixed_value_kinds_sort_by_kind() {
        let values = [
            json!("b"),
            json!(2),
            json!(null),
            json!({"k": 1}),
            json!(true),
            json!("a"),
            json!([1]),
            json!(1.5),
        ];
        let docs: Vec<Value> = values.iter().map(|v| json!({ "rank": v })).collect();
        let ids: Vec<String> = (0..docs.len()).map(|i| i.to_string()).collect();
        let rows: Vec<(&str, &Value)> = ids.iter().map(String::as_str).zip(docs.iter()).collect();

        let query = CollectionQuery::new("x").order_by("rank", Direction::Ascending);
        let sorted: Vec<&Value> = query
            .apply(rows)
            .into_iter()
            .map(|(_, data)| &data["rank"])
            .collect();
        assert_eq!(
            sorted,
            vec![
                &json!(null),
                &json!(true),
                &json!(1.5),
                &json!(2),
                &json!("a"),
                &json!("b"),
                &json!([1]),
                &json!({"k": 1}),
            ]
        );
    }

    #[test]
    fn locator_paths() {
        assert_eq!(Locator::from(CollectionQuery::new("tasks")).path(), "tasks");
        assert_eq!(Locator::from(DocumentRef::new("users", "bob")).path(), "users/bob");
        assert_eq!(
            Locator::from(DocumentRef::new("users", "bob")).to_string(),
            "get users/bob"
        );
    }

    #[test]
    fn equal_queries_compare_equal() {
        let a = CollectionQuery::new("tasks").where_eq("assignee_id", "alice");
        let b = CollectionQuery::new("tasks").where_eq("assignee_id", "alice");
        let c = CollectionQuery::new("tasks").where_eq("assignee_id", "bob");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
