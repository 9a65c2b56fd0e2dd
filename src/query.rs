//! Query description (offset, limit, sort, one predicate) and the result envelope.

use serde_json::{Map, Value};

/// The single predicate of a query. Setting one form replaces the other.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Predicate {
    #[default]
    None,
    /// Equality constraints, ANDed, in key order.
    Map(Map<String, Value>),
    /// Raw predicate with positional `$1..$n` placeholders.
    Raw { sql: String, args: Vec<Value> },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub(crate) offset: Option<u64>,
    pub(crate) limit: Option<u64>,
    pub(crate) sort: Option<String>,
    pub(crate) predicate: Predicate,
}

/// Shorthand for `Query::new()`.
pub fn q() -> Query {
    Query::new()
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn offset(mut self, value: u64) -> Self {
        self.offset = Some(value);
        self
    }

    /// Negative values clear the limit.
    pub fn limit(mut self, value: i64) -> Self {
        self.limit = u64::try_from(value).ok();
        self
    }

    /// Raw ORDER BY text, e.g. `"name DESC"`.
    pub fn sort(mut self, order: impl Into<String>) -> Self {
        let order = order.into();
        self.sort = if order.trim().is_empty() { None } else { Some(order) };
        self
    }

    pub fn where_map(mut self, constraints: Map<String, Value>) -> Self {
        self.predicate = Predicate::Map(constraints);
        self
    }

    /// Adds one equality constraint, switching to the map form if needed.
    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = match std::mem::take(&mut self.predicate) {
            Predicate::Map(m) => m,
            _ => Map::new(),
        };
        map.insert(column.into(), value.into());
        self.predicate = Predicate::Map(map);
        self
    }

    pub fn where_raw(mut self, sql: impl Into<String>, args: Vec<Value>) -> Self {
        let sql = sql.into();
        self.predicate = if sql.trim().is_empty() {
            Predicate::None
        } else {
            Predicate::Raw { sql, args }
        };
        self
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn get_limit(&self) -> Option<u64> {
        self.limit
    }
}

/// Result envelope of a data operation. Errors travel in the surrounding `Result`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn new(rows_affected: u64) -> Self {
        QueryResult { rows_affected }
    }

    pub fn is_empty(&self) -> bool {
        self.rows_affected == 0
    }
}
