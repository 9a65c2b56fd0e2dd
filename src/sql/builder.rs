//! Builds parameterized SELECT, INSERT, upsert, COUNT and DELETE for link operations.
//! Identifiers are quoted, values are always parameters.

use crate::query::{Predicate, Query};
use crate::url::Dialect;
use serde_json::{Map, Value};

/// Quote one identifier (double quotes, embedded quotes doubled).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified name part by part (`a.b` -> `"a"."b"`).
pub fn quoted_path(name: &str) -> String {
    name.split('.').map(quoted).collect::<Vec<_>>().join(".")
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Appends ` WHERE ...` for the predicate. Raw predicates must be the first params.
    fn push_where(&mut self, predicate: &Predicate) {
        match predicate {
            Predicate::None => {}
            Predicate::Map(map) if map.is_empty() => {}
            Predicate::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(col, val)| {
                        if val.is_null() {
                            format!("{} IS NULL", quoted(col))
                        } else {
                            let n = self.push_param(val.clone());
                            format!("{} = ${}", quoted(col), n)
                        }
                    })
                    .collect();
                self.sql.push_str(" WHERE ");
                self.sql.push_str(&parts.join(" AND "));
            }
            Predicate::Raw { sql, args } => {
                self.sql.push_str(&format!(" WHERE ({})", sql));
                self.params.extend(args.iter().cloned());
            }
        }
    }
}

fn push_paging(q: &mut QueryBuf, query: &Query, dialect: Dialect) {
    if let Some(sort) = &query.sort {
        q.sql.push_str(&format!(" ORDER BY {}", sort));
    }
    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => q.sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
        (Some(limit), None) => q.sql.push_str(&format!(" LIMIT {}", limit)),
        // SQLite only accepts OFFSET after a LIMIT.
        (None, Some(offset)) if offset > 0 => match dialect {
            Dialect::Postgres => q.sql.push_str(&format!(" OFFSET {}", offset)),
            Dialect::Sqlite => q.sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
        },
        _ => {}
    }
}

/// SELECT * with predicate, ORDER BY, LIMIT/OFFSET.
pub fn select(table: &str, query: &Query, dialect: Dialect) -> QueryBuf {
    select_columns(table, "*", query, dialect)
}

/// SELECT one column (pluck).
pub fn select_column(table: &str, column: &str, query: &Query, dialect: Dialect) -> QueryBuf {
    select_columns(table, &quoted(column), query, dialect)
}

fn select_columns(table: &str, columns: &str, query: &Query, dialect: Dialect) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.sql = format!("SELECT {} FROM {}", columns, quoted_path(table));
    q.push_where(&query.predicate);
    push_paging(&mut q, query, dialect);
    q
}

/// SELECT COUNT(*) AS count with predicate only.
pub fn count(table: &str, predicate: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.sql = format!("SELECT COUNT(*) AS count FROM {}", quoted_path(table));
    q.push_where(predicate);
    q
}

/// INSERT one row. Null values are omitted so column defaults apply.
pub fn insert(table: &str, row: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for (name, val) in row {
        if val.is_null() {
            continue;
        }
        let n = q.push_param(val.clone());
        cols.push(quoted(name));
        placeholders.push(format!("${}", n));
    }
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quoted_path(table))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            quoted_path(table),
            cols.join(", "),
            placeholders.join(", ")
        )
    };
    q
}

/// INSERT or UPDATE by id column. Falls back to a plain insert when the row has no id.
/// Null fields are written as NULL so an update clears them.
pub fn upsert(table: &str, id_column: &str, row: &Map<String, Value>) -> QueryBuf {
    let has_id = row.get(id_column).map(|v| !v.is_null()).unwrap_or(false);
    if !has_id {
        return insert(table, row);
    }
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    let mut sets = Vec::new();
    for (name, val) in row {
        cols.push(quoted(name));
        // A literal NULL takes the column's type; a bound one would be typed by the driver.
        if val.is_null() {
            placeholders.push("NULL".to_string());
        } else {
            let n = q.push_param(val.clone());
            placeholders.push(format!("${}", n));
        }
        if name != id_column {
            sets.push(format!("{} = excluded.{}", quoted(name), quoted(name)));
        }
    }
    let action = if sets.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", sets.join(", "))
    };
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {} RETURNING *",
        quoted_path(table),
        cols.join(", "),
        placeholders.join(", "),
        quoted(id_column),
        action
    );
    q
}

/// DELETE every row (truncate without DDL so it stays transactional on both dialects).
pub fn delete_all(table: &str) -> QueryBuf {
    QueryBuf {
        sql: format!("DELETE FROM {}", quoted_path(table)),
        params: Vec::new(),
    }
}

pub fn create_schema(name: &str, if_not_exists: bool) -> String {
    if if_not_exists {
        format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(name))
    } else {
        format!("CREATE SCHEMA {}", quoted(name))
    }
}

/// Transaction-local search path switch.
pub fn set_local_search_path(name: &str) -> String {
    format!("SET LOCAL search_path TO {}", quoted(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::q;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn select_with_map_sort_and_paging() {
        let query = q()
            .where_eq("status", "open")
            .where_eq("owner", "ada")
            .sort("created DESC")
            .limit(10)
            .offset(20);
        let buf = select("svc_tickets", &query, Dialect::Postgres);
        assert_eq!(
            buf.sql,
            "SELECT * FROM \"svc_tickets\" WHERE \"owner\" = $1 AND \"status\" = $2 ORDER BY created DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(buf.params, vec![json!("ada"), json!("open")]);
    }

    #[test]
    fn select_with_raw_predicate_keeps_args() {
        let query = q().where_raw("age > $1 AND age < $2", vec![json!(18), json!(65)]);
        let buf = select("people", &query, Dialect::Sqlite);
        assert_eq!(buf.sql, "SELECT * FROM \"people\" WHERE (age > $1 AND age < $2)");
        assert_eq!(buf.params.len(), 2);
    }

    #[test]
    fn null_constraint_uses_is_null() {
        let buf = count("people", q().where_eq("deleted", Value::Null).predicate());
        assert_eq!(buf.sql, "SELECT COUNT(*) AS count FROM \"people\" WHERE \"deleted\" IS NULL");
        assert!(buf.params.is_empty());
    }

    #[test]
    fn offset_without_limit() {
        let buf = select("t", &q().offset(5), Dialect::Postgres);
        assert_eq!(buf.sql, "SELECT * FROM \"t\" OFFSET 5");
        let buf = select("t", &q().offset(5), Dialect::Sqlite);
        assert_eq!(buf.sql, "SELECT * FROM \"t\" LIMIT -1 OFFSET 5");
    }

    #[test]
    fn insert_skips_nulls() {
        let buf = insert("t", &obj(json!({"id": null, "name": "x"})));
        assert_eq!(buf.sql, "INSERT INTO \"t\" (\"name\") VALUES ($1) RETURNING *");
        let buf = insert("t", &obj(json!({"id": null})));
        assert_eq!(buf.sql, "INSERT INTO \"t\" DEFAULT VALUES RETURNING *");
    }

    #[test]
    fn upsert_updates_non_id_columns() {
        let buf = upsert("t", "id", &obj(json!({"id": "a", "name": "x"})));
        assert_eq!(
            buf.sql,
            "INSERT INTO \"t\" (\"id\", \"name\") VALUES ($1, $2) ON CONFLICT (\"id\") DO UPDATE SET \"name\" = excluded.\"name\" RETURNING *"
        );
        let buf = upsert("t", "id", &obj(json!({"name": "x"})));
        assert!(buf.sql.starts_with("INSERT INTO \"t\" (\"name\")"));
    }

    #[test]
    fn upsert_writes_nulls_as_literals() {
        let buf = upsert("t", "id", &obj(json!({"id": "a", "qty": null, "title": "x"})));
        assert_eq!(
            buf.sql,
            "INSERT INTO \"t\" (\"id\", \"qty\", \"title\") VALUES ($1, NULL, $2) ON CONFLICT (\"id\") DO UPDATE SET \"qty\" = excluded.\"qty\", \"title\" = excluded.\"title\" RETURNING *"
        );
        assert_eq!(buf.params, vec![json!("a"), json!("x")]);
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quoted("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quoted_path("tenant_a.users"), "\"tenant_a\".\"users\"");
        assert_eq!(set_local_search_path("acme-co"), "SET LOCAL search_path TO \"acme-co\"");
        assert_eq!(create_schema("acme", true), "CREATE SCHEMA IF NOT EXISTS \"acme\"");
    }
}
