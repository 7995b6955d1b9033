use std::collections::HashMap;

use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::ScopeManager;
use crate::column;
use crate::error::{Error, Result};
use crate::etag::{self, collections};
use crate::models::{ColumnRef, ColumnSet, Namespace, ObjectMeta};
use crate::paths;

/// Input for a new column set: an ordered list of column reference paths.
#[derive(Debug, Clone)]
pub struct ColumnSetCreate {
    pub path: String,
    pub description: Option<String>,
    pub columns: Vec<String>,
}

pub async fn get(
    conn: &mut PgConnection,
    namespace: &Namespace,
    path: &str,
) -> Result<Option<ColumnSet>> {
    let normalized = paths::normalize(path)?;
    let set = sqlx::query_as(
        r#"SELECT * FROM gerrydb.column_set WHERE namespace_id = $1 AND path = $2"#,
    )
    .bind(namespace.namespace_id)
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(set)
}

pub async fn all_in_namespace(
    conn: &mut PgConnection,
    namespace: &Namespace,
) -> Result<Vec<ColumnSet>> {
    let sets = sqlx::query_as(
        r#"SELECT * FROM gerrydb.column_set WHERE namespace_id = $1 ORDER BY path"#,
    )
    .bind(namespace.namespace_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(sets)
}

/// Ordered member refs of a column set.
pub async fn members(conn: &mut PgConnection, set_id: i32) -> Result<Vec<ColumnRef>> {
    let refs = sqlx::query_as(
        r#"
        SELECT r.* FROM gerrydb.column_ref AS r
        JOIN gerrydb.column_set_member AS m ON m.ref_id = r.ref_id
        WHERE m.set_id = $1
        ORDER BY m."order"
        "#,
    )
    .bind(set_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(refs)
}

/// Creates a column set. The member list is ordered and must be distinct
/// as *columns*: two refs aliasing the same column are rejected.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    obj_in: ColumnSetCreate,
) -> Result<(ColumnSet, Uuid)> {
    scopes.require_write_in_namespace(namespace)?;
    let canonical_path = paths::normalize(&obj_in.path)?;

    let set: ColumnSet = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.column_set (path, description, namespace_id, meta_id)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&canonical_path)
    .bind(&obj_in.description)
    .bind(namespace.namespace_id)
    .bind(obj_meta.meta_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|_| {
        Error::CreateValue(format!(
            "failed to create column set '{canonical_path}' \
             (the path may already exist in the namespace)"
        ))
    })?;

    let mut refs = Vec::with_capacity(obj_in.columns.len());
    for column_path in &obj_in.columns {
        let col_ref = column::get_ref(&mut **tx, namespace, column_path)
            .await?
            .ok_or_else(|| {
                Error::CreateValue(format!("failed to resolve column '{column_path}'"))
            })?;
        if col_ref.col_id.is_none() {
            return Err(Error::CreateValue(format!(
                "failed to resolve column '{column_path}'"
            )));
        }
        refs.push(col_ref);
    }

    // Aliases may hide duplicates: dedupe by the resolved column, not the
    // ref path.
    let mut paths_by_col: HashMap<i32, Vec<String>> = HashMap::new();
    for col_ref in &refs {
        paths_by_col
            .entry(col_ref.col_id.unwrap_or_default())
            .or_default()
            .push(col_ref.path.clone());
    }
    let duplicated: Vec<Vec<String>> = paths_by_col
        .into_values()
        .filter(|ref_paths| ref_paths.len() > 1)
        .collect();
    if !duplicated.is_empty() {
        return Err(Error::CreateValue(format!(
            "columns in a column set must be unique; found duplicate column references: \
             {duplicated:?}"
        )));
    }

    for (idx, col_ref) in refs.iter().enumerate() {
        sqlx::query(
            r#"INSERT INTO gerrydb.column_set_member (set_id, ref_id, "order") VALUES ($1, $2, $3)"#,
        )
        .bind(set.set_id)
        .bind(col_ref.ref_id)
        .bind(idx as i32)
        .execute(&mut **tx)
        .await?;
    }

    let etag = etag::bump(&mut **tx, collections::COLUMN_SETS, Some(namespace.namespace_id))
        .await?;
    Ok((set, etag))
}
