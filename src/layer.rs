use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::ScopeManager;
use crate::error::{Error, Result};
use crate::etag::{self, collections};
use crate::models::{GeoLayer, GeoSetVersion, Geography, Locality, Namespace, ObjectMeta};
use crate::paths;

pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    path: &str,
    description: Option<&str>,
    source_url: Option<&str>,
) -> Result<(GeoLayer, Uuid)> {
    scopes.require_write_in_namespace(namespace)?;
    let canonical_path = paths::normalize(path)?;
    let layer: GeoLayer = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.geo_layer (path, namespace_id, description, source_url, meta_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(&canonical_path)
    .bind(namespace.namespace_id)
    .bind(description)
    .bind(source_url)
    .bind(obj_meta.meta_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|_| {
        Error::CreateValue(format!(
            "failed to create geographic layer '{canonical_path}' \
             (the path may already exist in the namespace)"
        ))
    })?;
    let etag = etag::bump(&mut **tx, collections::GEO_LAYERS, Some(namespace.namespace_id))
        .await?;
    Ok((layer, etag))
}

pub async fn get(
    conn: &mut PgConnection,
    namespace: &Namespace,
    path: &str,
) -> Result<Option<GeoLayer>> {
    let normalized = paths::normalize(path)?;
    let layer = sqlx::query_as(
        r#"SELECT * FROM gerrydb.geo_layer WHERE namespace_id = $1 AND path = $2"#,
    )
    .bind(namespace.namespace_id)
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(layer)
}

pub async fn all_in_namespace(
    conn: &mut PgConnection,
    namespace: &Namespace,
) -> Result<Vec<GeoLayer>> {
    let layers = sqlx::query_as(
        r#"SELECT * FROM gerrydb.geo_layer WHERE namespace_id = $1 ORDER BY path"#,
    )
    .bind(namespace.namespace_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(layers)
}

/// The open set version for a (layer, locality), if one exists.
pub async fn get_set_by_locality(
    conn: &mut PgConnection,
    layer: &GeoLayer,
    locality: &Locality,
) -> Result<Option<GeoSetVersion>> {
    let set_version = sqlx::query_as(
        r#"
        SELECT * FROM gerrydb.geo_set_version
        WHERE layer_id = $1 AND loc_id = $2 AND valid_to IS NULL
        "#,
    )
    .bind(layer.layer_id)
    .bind(locality.loc_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(set_version)
}

/// The set version covering `at` for a (layer, locality). Validity
/// intervals are half-open: `valid_from <= at < valid_to`.
pub async fn get_set_at(
    conn: &mut PgConnection,
    layer: &GeoLayer,
    locality: &Locality,
    at: DateTime<Utc>,
) -> Result<Option<GeoSetVersion>> {
    let set_version = sqlx::query_as(
        r#"
        SELECT * FROM gerrydb.geo_set_version
        WHERE layer_id = $1 AND loc_id = $2
          AND valid_from <= $3 AND (valid_to IS NULL OR valid_to > $3)
        "#,
    )
    .bind(layer.layer_id)
    .bind(locality.loc_id)
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(set_version)
}

/// Member geography ids of a set version.
pub async fn set_members(conn: &mut PgConnection, set_version_id: i32) -> Result<Vec<i32>> {
    let rows: Vec<(i32,)> = sqlx::query_as(
        r#"SELECT geo_id FROM gerrydb.geo_set_member WHERE set_version_id = $1 ORDER BY geo_id"#,
    )
    .bind(set_version_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|(geo_id,)| geo_id).collect())
}

/// Maps a set of geographies to (layer, locality), opening a new set
/// version. A no-op when the membership is unchanged.
pub async fn map_locality(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    layer: &GeoLayer,
    locality: &Locality,
    geographies: &[Geography],
) -> Result<Option<GeoSetVersion>> {
    scopes.require_write_in_namespace(namespace)?;

    let namespaces: HashSet<i32> = geographies.iter().map(|geo| geo.namespace_id).collect();
    if namespaces.len() > 1 {
        return Err(Error::CreateValue(
            "cannot map geographies in multiple namespaces to a geographic layer".to_string(),
        ));
    }

    let new_geo_ids: HashSet<i32> = geographies.iter().map(|geo| geo.geo_id).collect();
    let now = Utc::now();

    if let Some(current) = get_set_by_locality(&mut **tx, layer, locality).await? {
        let old_geo_ids: HashSet<i32> = set_members(&mut **tx, current.set_version_id)
            .await?
            .into_iter()
            .collect();
        if old_geo_ids == new_geo_ids {
            debug!(
                "Mapping layer {} to locality {} is a no-op (membership unchanged)",
                layer.layer_id, locality.loc_id
            );
            return Ok(None);
        }
        sqlx::query(
            r#"
            UPDATE gerrydb.geo_set_version SET valid_to = $1
            WHERE layer_id = $2 AND loc_id = $3 AND valid_to IS NULL
            "#,
        )
        .bind(now)
        .bind(layer.layer_id)
        .bind(locality.loc_id)
        .execute(&mut **tx)
        .await?;
    }

    let set_version: GeoSetVersion = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.geo_set_version (layer_id, loc_id, valid_from, meta_id)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(layer.layer_id)
    .bind(locality.loc_id)
    .bind(now)
    .bind(obj_meta.meta_id)
    .fetch_one(&mut **tx)
    .await?;

    for geo in geographies {
        sqlx::query(
            r#"INSERT INTO gerrydb.geo_set_member (set_version_id, geo_id) VALUES ($1, $2)"#,
        )
        .bind(set_version.set_version_id)
        .bind(geo.geo_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(Some(set_version))
}
