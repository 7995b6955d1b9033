use sqlx::PgConnection;
use uuid::Uuid;

use crate::auth::ScopeManager;
use crate::error::{Error, Result};
use crate::models::ObjectMeta;

/// Writes a new ledger entry attributed to the acting user.
pub async fn create(
    conn: &mut PgConnection,
    scopes: &ScopeManager,
    notes: Option<&str>,
) -> Result<ObjectMeta> {
    scopes.require_write_meta()?;
    let meta: ObjectMeta = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.meta (uuid, notes, created_by)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(notes)
    .bind(scopes.user_id())
    .fetch_one(&mut *conn)
    .await?;
    Ok(meta)
}

/// Reads a ledger entry by UUID. Entries written by other users require the
/// `meta:read` scope.
pub async fn get(conn: &mut PgConnection, scopes: &ScopeManager, uuid: Uuid) -> Result<ObjectMeta> {
    let meta: Option<ObjectMeta> =
        sqlx::query_as(r#"SELECT * FROM gerrydb.meta WHERE uuid = $1"#)
            .bind(uuid)
            .fetch_optional(&mut *conn)
            .await?;
    let meta = meta.ok_or_else(|| Error::not_found("object metadata not found"))?;
    if meta.created_by != scopes.user_id() && !scopes.can_read_meta() {
        return Err(Error::forbidden(
            "insufficient permissions to read metadata created by another user",
        ));
    }
    Ok(meta)
}

/// Resolves the metadata handle attached to a mutation. The handle must be
/// owned by the acting user.
pub async fn get_owned(
    conn: &mut PgConnection,
    scopes: &ScopeManager,
    uuid: Uuid,
) -> Result<ObjectMeta> {
    let meta: Option<ObjectMeta> =
        sqlx::query_as(r#"SELECT * FROM gerrydb.meta WHERE uuid = $1"#)
            .bind(uuid)
            .fetch_optional(&mut *conn)
            .await?;
    let meta = meta.ok_or_else(|| Error::CreateValue("unknown object metadata ID".to_string()))?;
    if meta.created_by != scopes.user_id() {
        return Err(Error::forbidden(
            "cannot use a metadata object created by another user",
        ));
    }
    Ok(meta)
}
