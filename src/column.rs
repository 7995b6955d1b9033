use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::ScopeManager;
use crate::error::{Error, Result};
use crate::etag::{self, collections};
use crate::models::{ColumnKind, ColumnRef, ColumnType, DataColumn, Geography, Namespace, ObjectMeta};
use crate::partition;
use crate::paths;

/// Input for a new column.
#[derive(Debug, Clone)]
pub struct ColumnCreate {
    pub canonical_path: String,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub kind: ColumnKind,
    pub col_type: ColumnType,
    pub aliases: Vec<String>,
}

/// A typed column value after validation against the column's declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

/// Validates a wire value (any JSON scalar) against a column type,
/// promoting `int` to `float` silently for float columns.
pub fn coerce_value(
    col_type: ColumnType,
    value: &serde_json::Value,
) -> std::result::Result<TypedValue, String> {
    match col_type {
        ColumnType::Float => match value {
            serde_json::Value::Number(num) => num
                .as_f64()
                .map(TypedValue::Float)
                .ok_or_else(|| "expected integer or floating-point".to_string()),
            _ => Err("expected integer or floating-point".to_string()),
        },
        ColumnType::Int => match value.as_i64() {
            Some(int) => Ok(TypedValue::Int(int)),
            None => Err("expected integer".to_string()),
        },
        ColumnType::Str => match value.as_str() {
            Some(text) => Ok(TypedValue::Str(text.to_string())),
            None => Err("expected string".to_string()),
        },
        ColumnType::Bool => match value.as_bool() {
            Some(flag) => Ok(TypedValue::Bool(flag)),
            None => Err("expected boolean".to_string()),
        },
        ColumnType::Json => Err("json columns do not support value writes".to_string()),
    }
}

impl TypedValue {
    fn slots(
        &self,
    ) -> (
        Option<f64>,
        Option<i64>,
        Option<&str>,
        Option<bool>,
    ) {
        match self {
            TypedValue::Float(val) => (Some(*val), None, None, None),
            TypedValue::Int(val) => (None, Some(*val), None, None),
            TypedValue::Str(val) => (None, None, Some(val.as_str()), None),
            TypedValue::Bool(val) => (None, None, None, Some(*val)),
        }
    }
}

/// Retrieves a column reference by path.
pub async fn get_ref(
    conn: &mut PgConnection,
    namespace: &Namespace,
    path: &str,
) -> Result<Option<ColumnRef>> {
    let normalized = paths::normalize(path)?;
    let col_ref = sqlx::query_as(
        r#"SELECT * FROM gerrydb.column_ref WHERE namespace_id = $1 AND path = $2"#,
    )
    .bind(namespace.namespace_id)
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(col_ref)
}

pub async fn get_by_id(conn: &mut PgConnection, col_id: i32) -> Result<DataColumn> {
    let col = sqlx::query_as(r#"SELECT * FROM gerrydb."column" WHERE col_id = $1"#)
        .bind(col_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(col)
}

/// Retrieves a column through any of its reference paths.
pub async fn get(
    conn: &mut PgConnection,
    namespace: &Namespace,
    path: &str,
) -> Result<Option<DataColumn>> {
    let Some(col_ref) = get_ref(conn, namespace, path).await? else {
        return Ok(None);
    };
    match col_ref.col_id {
        Some(col_id) => Ok(Some(get_by_id(conn, col_id).await?)),
        None => Ok(None),
    }
}

pub async fn all_in_namespace(
    conn: &mut PgConnection,
    namespace: &Namespace,
) -> Result<Vec<DataColumn>> {
    let cols = sqlx::query_as(
        r#"SELECT * FROM gerrydb."column" WHERE namespace_id = $1 ORDER BY col_id"#,
    )
    .bind(namespace.namespace_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(cols)
}

/// Creates a column with a canonical reference, the per-column value
/// partition, and any aliases.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    obj_in: ColumnCreate,
) -> Result<(DataColumn, Uuid)> {
    scopes.require_write_in_namespace(namespace)?;
    let canonical_path = paths::normalize(&obj_in.canonical_path)?;

    // Arena-style: ref first with a null column pointer, then the column,
    // then the back-fill.
    let (canonical_ref_id,): (i32,) = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.column_ref (path, namespace_id, meta_id)
        VALUES ($1, $2, $3)
        RETURNING ref_id
        "#,
    )
    .bind(&canonical_path)
    .bind(namespace.namespace_id)
    .bind(obj_meta.meta_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|_| {
        Error::CreateValue(format!(
            "failed to create canonical path '{canonical_path}' to new column \
             (the path may already exist)"
        ))
    })?;

    let col: DataColumn = sqlx::query_as(
        r#"
        INSERT INTO gerrydb."column"
            (namespace_id, canonical_ref_id, description, source_url, kind, type, meta_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(namespace.namespace_id)
    .bind(canonical_ref_id)
    .bind(&obj_in.description)
    .bind(&obj_in.source_url)
    .bind(obj_in.kind)
    .bind(obj_in.col_type)
    .bind(obj_meta.meta_id)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query(r#"UPDATE gerrydb.column_ref SET col_id = $1 WHERE ref_id = $2"#)
        .bind(col.col_id)
        .bind(canonical_ref_id)
        .execute(&mut **tx)
        .await?;

    partition::ensure_partitions_for_new_column(&mut **tx, col.col_id, namespace.namespace_id)
        .await?;

    if !obj_in.aliases.is_empty() {
        add_aliases(tx, obj_meta, &col, &obj_in.aliases).await?;
    }
    let etag = etag::bump(&mut **tx, collections::COLUMNS, Some(namespace.namespace_id)).await?;
    Ok((col, etag))
}

/// Adds aliases to a column, skipping ones that already exist.
async fn add_aliases(
    tx: &mut Transaction<'_, Postgres>,
    obj_meta: &ObjectMeta,
    col: &DataColumn,
    alias_paths: &[String],
) -> Result<()> {
    let mut normalized = Vec::with_capacity(alias_paths.len());
    for alias in alias_paths {
        normalized.push(paths::normalize(alias)?);
    }
    let existing_rows: Vec<(String,)> = sqlx::query_as(
        r#"SELECT path FROM gerrydb.column_ref WHERE namespace_id = $1 AND path = ANY($2)"#,
    )
    .bind(col.namespace_id)
    .bind(&normalized)
    .fetch_all(&mut **tx)
    .await?;
    let existing: HashSet<String> = existing_rows.into_iter().map(|(path,)| path).collect();

    for alias in normalized {
        if existing.contains(&alias) {
            warn!("Alias '{}' already exists for column {}; skipping", alias, col.col_id);
            continue;
        }
        sqlx::query(
            r#"
            INSERT INTO gerrydb.column_ref (path, col_id, namespace_id, meta_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (namespace_id, path) DO NOTHING
            "#,
        )
        .bind(&alias)
        .bind(col.col_id)
        .bind(col.namespace_id)
        .bind(obj_meta.meta_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Patches a column by adding aliases. Existing aliases are skipped, making
/// the patch idempotent.
pub async fn patch(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    col: &DataColumn,
    aliases: &[String],
) -> Result<Uuid> {
    scopes.require_write_in_namespace(namespace)?;
    add_aliases(tx, obj_meta, col, aliases).await?;
    etag::bump(&mut **tx, collections::COLUMNS, Some(namespace.namespace_id)).await
}

#[derive(Debug, sqlx::FromRow)]
struct OpenValueRow {
    geo_id: i32,
    valid_from: DateTime<Utc>,
    val_float: Option<f64>,
    val_int: Option<i64>,
    val_str: Option<String>,
    val_bool: Option<bool>,
}

impl OpenValueRow {
    fn value(&self) -> Option<TypedValue> {
        if let Some(val) = self.val_float {
            Some(TypedValue::Float(val))
        } else if let Some(val) = self.val_int {
            Some(TypedValue::Int(val))
        } else if let Some(val) = &self.val_str {
            Some(TypedValue::Str(val.clone()))
        } else {
            self.val_bool.map(TypedValue::Bool)
        }
    }
}

/// Sets column values across geographies. Validates the whole batch before
/// writing anything, writes only new-or-changed values, and closes only the
/// rows it supersedes, so re-setting identical values is a no-op.
pub async fn set_values(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    col: &DataColumn,
    values: &[(Geography, serde_json::Value)],
) -> Result<u64> {
    scopes.require_write_in_namespace(namespace)?;
    let now = Utc::now();

    let mut new_values: HashMap<i32, TypedValue> = HashMap::with_capacity(values.len());
    let mut validation_errors = Vec::new();
    for (geo, value) in values {
        if new_values.contains_key(&geo.geo_id) {
            return Err(Error::CreateValue(format!(
                "duplicate geography '{}' in value batch",
                geo.path
            )));
        }
        match coerce_value(col.col_type, value) {
            Ok(typed) => {
                new_values.insert(geo.geo_id, typed);
            }
            Err(reason) => {
                validation_errors.push(format!("{reason} column value for geography {}", geo.path));
            }
        }
    }
    if !validation_errors.is_empty() {
        return Err(Error::ColumnValueType {
            errors: validation_errors,
        });
    }

    let geo_ids: Vec<i32> = values.iter().map(|(geo, _)| geo.geo_id).collect();
    partition::ensure_column_partition(&mut **tx, col.col_id).await?;
    partition::ensure_geography_partitions(&mut **tx, col.col_id, &geo_ids).await?;

    let open_rows: Vec<OpenValueRow> = sqlx::query_as(
        r#"
        SELECT geo_id, valid_from, val_float, val_int, val_str, val_bool
        FROM gerrydb.column_value
        WHERE col_id = $1 AND geo_id = ANY($2) AND valid_to IS NULL
        "#,
    )
    .bind(col.col_id)
    .bind(&geo_ids)
    .fetch_all(&mut **tx)
    .await?;
    let open_by_geo: HashMap<i32, &OpenValueRow> =
        open_rows.iter().map(|row| (row.geo_id, row)).collect();

    // Most values are set exactly once; skip rows whose value is unchanged
    // and close old rows only where a replacement lands.
    let mut to_insert: Vec<(i32, &TypedValue)> = Vec::new();
    let mut to_close: Vec<(i32, DateTime<Utc>)> = Vec::new();
    for (geo_id, typed) in &new_values {
        match open_by_geo.get(geo_id) {
            Some(open) if open.value().as_ref() == Some(typed) => {}
            Some(open) => {
                to_insert.push((*geo_id, typed));
                to_close.push((open.geo_id, open.valid_from));
            }
            None => to_insert.push((*geo_id, typed)),
        }
    }

    debug!(
        "Setting values for column {}: {} incoming, {} new or changed",
        col.col_id,
        new_values.len(),
        to_insert.len()
    );

    for (geo_id, typed) in &to_insert {
        let (val_float, val_int, val_str, val_bool) = typed.slots();
        sqlx::query(
            r#"
            INSERT INTO gerrydb.column_value
                (col_id, geo_id, meta_id, valid_from, val_float, val_int, val_str, val_bool)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(col.col_id)
        .bind(geo_id)
        .bind(obj_meta.meta_id)
        .bind(now)
        .bind(val_float)
        .bind(val_int)
        .bind(val_str)
        .bind(val_bool)
        .execute(&mut **tx)
        .await?;
    }

    for (geo_id, valid_from) in &to_close {
        sqlx::query(
            r#"
            UPDATE gerrydb.column_value SET valid_to = $1
            WHERE col_id = $2 AND geo_id = $3 AND valid_from = $4
            "#,
        )
        .bind(now)
        .bind(col.col_id)
        .bind(geo_id)
        .bind(valid_from)
        .execute(&mut **tx)
        .await?;
    }

    Ok(to_insert.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn int_promotes_to_float_silently() {
        assert_eq!(
            coerce_value(ColumnType::Float, &json!(3)),
            Ok(TypedValue::Float(3.0))
        );
        assert_eq!(
            coerce_value(ColumnType::Float, &json!(3.5)),
            Ok(TypedValue::Float(3.5))
        );
    }

    #[test]
    fn floats_do_not_demote_to_int() {
        assert!(coerce_value(ColumnType::Int, &json!(3.5)).is_err());
        assert_eq!(
            coerce_value(ColumnType::Int, &json!(3)),
            Ok(TypedValue::Int(3))
        );
    }

    #[test]
    fn scalar_types_check_strictly() {
        assert!(coerce_value(ColumnType::Str, &json!(1)).is_err());
        assert_eq!(
            coerce_value(ColumnType::Str, &json!("x")),
            Ok(TypedValue::Str("x".to_string()))
        );
        assert!(coerce_value(ColumnType::Bool, &json!("true")).is_err());
        assert_eq!(
            coerce_value(ColumnType::Bool, &json!(false)),
            Ok(TypedValue::Bool(false))
        );
    }

    #[test]
    fn json_columns_reject_value_writes() {
        assert!(coerce_value(ColumnType::Json, &json!({"a": 1})).is_err());
    }

    #[test]
    fn typed_values_fill_exactly_one_slot() {
        let (f, i, s, b) = TypedValue::Int(7).slots();
        assert_eq!((f, i, s, b), (None, Some(7), None, None));
        let (f, i, s, b) = TypedValue::Bool(true).slots();
        assert_eq!((f, i, s, b), (None, None, None, Some(true)));
    }
}
