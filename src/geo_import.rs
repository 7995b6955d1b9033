use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::ScopeManager;
use crate::error::{Error, Result};
use crate::etag::{self, collections};
use crate::models::{GeoImport, Namespace, ObjectMeta};

/// Opens a new import batch. Every geography mutation is attributed to one.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
) -> Result<(GeoImport, Uuid)> {
    scopes.require_write_in_namespace(namespace)?;
    let geo_import: GeoImport = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.geo_import (uuid, namespace_id, meta_id, created_by)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(namespace.namespace_id)
    .bind(obj_meta.meta_id)
    .bind(obj_meta.created_by)
    .fetch_one(&mut **tx)
    .await?;
    let etag = etag::bump(&mut **tx, collections::GEO_IMPORTS, Some(namespace.namespace_id)).await?;
    Ok((geo_import, etag))
}

pub async fn get(conn: &mut PgConnection, uuid: Uuid) -> Result<Option<GeoImport>> {
    let geo_import = sqlx::query_as(r#"SELECT * FROM gerrydb.geo_import WHERE uuid = $1"#)
        .bind(uuid)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(geo_import)
}

/// Resolves the import handle attached to a geography mutation; it must be
/// owned by the acting user.
pub async fn get_owned(
    conn: &mut PgConnection,
    scopes: &ScopeManager,
    uuid: Uuid,
) -> Result<GeoImport> {
    let geo_import = get(conn, uuid)
        .await?
        .ok_or_else(|| Error::CreateValue("unknown geo-import ID".to_string()))?;
    if geo_import.created_by != scopes.user_id() {
        return Err(Error::forbidden(
            "cannot use a geo-import created by another user",
        ));
    }
    Ok(geo_import)
}
