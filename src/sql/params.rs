//! Convert serde_json::Value to sqlx binds and decoded rows back to JSON, per dialect.

use rust_decimal::Decimal;
use serde_json::{Number, Value};
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArguments, PgRow, PgTypeInfo, Postgres};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Column, Database, Row, TypeInfo};

pub type PgQuery<'q> = Query<'q, Postgres, PgArguments>;
pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Decoded row cells in result-set order.
pub type Cells = Vec<(String, Value)>;

/// SQL NULL sent with an unspecified parameter type, so the server infers it
/// from context (a `BIGINT` column accepts it like a `TEXT` one).
#[derive(Clone, Copy, Debug)]
pub struct UntypedNull;

impl<'q> Encode<'q, Postgres> for UntypedNull {
    fn encode_by_ref(
        &self,
        _buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

fn pg_bind<'q>(query: PgQuery<'q>, v: &Value) -> PgQuery<'q> {
    match v {
        Value::Null => query.bind(UntypedNull),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(v.clone())),
    }
}

fn sqlite_bind<'q>(query: SqliteQuery<'q>, v: &Value) -> SqliteQuery<'q> {
    match v {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        Value::Array(_) | Value::Object(_) => query.bind(v.to_string()),
    }
}

/// `sqlx::query(sql)` with every param bound in order.
pub fn bind_pg<'q>(sql: &'q str, params: &[Value]) -> PgQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, p| pg_bind(query, p))
}

pub fn bind_sqlite<'q>(sql: &'q str, params: &[Value]) -> SqliteQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, p| sqlite_bind(query, p))
}

pub fn pg_cells(row: &PgRow) -> Cells {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), pg_cell(row, col.ordinal())))
        .collect()
}

pub fn sqlite_cells(row: &SqliteRow) -> Cells {
    row.columns()
        .iter()
        .map(|col| {
            let declared_bool = col.type_info().name() == "BOOLEAN";
            (col.name().to_string(), sqlite_cell(row, col.ordinal(), declared_bool))
        })
        .collect()
}

fn float(n: f64) -> Option<Value> {
    Number::from_f64(n).map(Value::Number)
}

fn pg_cell(row: &PgRow, idx: usize) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(idx) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(idx) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(idx) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(idx) {
        if let Some(v) = float(n as f64) {
            return v;
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(idx) {
        if let Some(v) = float(n) {
            return v;
        }
    }
    if let Ok(Some(d)) = row.try_get::<Option<Decimal>, _>(idx) {
        return match d.to_string().parse::<Number>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::String(d.to_string()),
        };
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(idx) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(idx) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(idx) {
        return j;
    }
    if let Ok(Some(bytes)) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return Value::String(String::from_utf8_lossy(&bytes).into_owned());
    }
    Value::Null
}

/// SQLite values carry their storage class, so the cascade follows it. A
/// column declared `BOOLEAN` stores integers and decodes back to a bool.
fn sqlite_cell(row: &SqliteRow, idx: usize, declared_bool: bool) -> Value {
    if declared_bool {
        if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(idx) {
            return Value::Bool(b);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(idx) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(idx) {
        if let Some(v) = float(n) {
            return v;
        }
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(idx) {
        return Value::String(s);
    }
    if let Ok(Some(bytes)) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return Value::String(String::from_utf8_lossy(&bytes).into_owned());
    }
    Value::Null
}
