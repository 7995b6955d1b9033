use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{Acquire, PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::ScopeManager;
use crate::error::{Error, Result};
use crate::etag::{self, collections};
use crate::geos;
use crate::models::{GeoImport, GeoVersion, Geography, Namespace, ObjectMeta};
use crate::partition;
use crate::paths;

/// One geography payload: a path plus optional WKB shape and internal point.
/// Missing shapes normalize to canonical empty geometries.
#[derive(Debug, Clone)]
pub struct GeographyCreate {
    pub path: String,
    pub geography: Option<Vec<u8>>,
    pub internal_point: Option<Vec<u8>>,
}

pub type GeographyPatch = GeographyCreate;

pub async fn get(
    conn: &mut PgConnection,
    namespace: &Namespace,
    path: &str,
) -> Result<Option<Geography>> {
    let normalized = paths::normalize_case_sensitive(path)?;
    let geo = sqlx::query_as(
        r#"SELECT * FROM gerrydb.geography WHERE namespace_id = $1 AND path = $2"#,
    )
    .bind(namespace.namespace_id)
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(geo)
}

/// Fetches geographies by path within one namespace, keyed by path.
pub async fn get_bulk_in_namespace(
    conn: &mut PgConnection,
    namespace_id: i32,
    obj_paths: &[String],
) -> Result<HashMap<String, Geography>> {
    let mut normalized = Vec::with_capacity(obj_paths.len());
    for path in obj_paths {
        normalized.push(paths::normalize_case_sensitive(path)?);
    }
    let geos: Vec<Geography> = sqlx::query_as(
        r#"SELECT * FROM gerrydb.geography WHERE namespace_id = $1 AND path = ANY($2)"#,
    )
    .bind(namespace_id)
    .bind(&normalized)
    .fetch_all(&mut *conn)
    .await?;
    Ok(geos.into_iter().map(|geo| (geo.path.clone(), geo)).collect())
}

/// The open version of each listed geography.
pub async fn open_versions(
    conn: &mut PgConnection,
    geo_ids: &[i32],
) -> Result<HashMap<i32, GeoVersion>> {
    let versions: Vec<GeoVersion> = sqlx::query_as(
        r#"SELECT * FROM gerrydb.geo_version WHERE geo_id = ANY($1) AND valid_to IS NULL"#,
    )
    .bind(geo_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(versions.into_iter().map(|ver| (ver.geo_id, ver)).collect())
}

fn normalized_input_paths(objs_in: &[GeographyCreate]) -> Result<Vec<String>> {
    objs_in
        .iter()
        .map(|obj_in| paths::normalize_case_sensitive(&obj_in.path))
        .collect()
}

fn duplicate_paths(normalized: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut dups = Vec::new();
    for path in normalized {
        if !seen.insert(path.clone()) && !dups.contains(path) {
            dups.push(path.clone());
        }
    }
    dups
}

async fn existing_paths(
    conn: &mut PgConnection,
    namespace_id: i32,
    normalized: &[String],
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"SELECT path FROM gerrydb.geography WHERE namespace_id = $1 AND path = ANY($2)"#,
    )
    .bind(namespace_id)
    .bind(normalized)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|(path,)| path).collect())
}

/// Normalized payloads keyed by hash: each distinct hash stores one shape.
#[derive(Debug)]
struct HashedShapes {
    /// hash -> (shape wkb, internal point wkb)
    by_hash: BTreeMap<Vec<u8>, (Vec<u8>, Vec<u8>)>,
    /// path -> hash
    path_hashes: HashMap<String, Vec<u8>>,
}

fn hash_shapes(objs_in: &[GeographyCreate]) -> Result<HashedShapes> {
    let mut by_hash = BTreeMap::new();
    let mut path_hashes = HashMap::new();
    let mut bad_paths = Vec::new();
    for obj_in in objs_in {
        let path = paths::normalize_case_sensitive(&obj_in.path)?;
        let shape = match geos::normalize_shape(obj_in.geography.as_deref()) {
            Ok(shape) => shape,
            Err(_) => {
                bad_paths.push(path);
                continue;
            }
        };
        let point = match geos::normalize_point(obj_in.internal_point.as_deref()) {
            Ok(point) => point,
            Err(_) => {
                bad_paths.push(path);
                continue;
            }
        };
        let hash = geos::geometry_hash(&shape);
        by_hash.entry(hash.clone()).or_insert((shape, point));
        path_hashes.insert(path, hash);
    }
    if !bad_paths.is_empty() {
        return Err(Error::BulkCreate {
            message: "failed to decode geometries; please ensure geometries are WKB-encoded"
                .to_string(),
            paths: bad_paths,
        });
    }
    Ok(HashedShapes {
        by_hash,
        path_hashes,
    })
}

/// Resolves existing bins by hash and inserts the missing ones. Duplicate
/// hashes upsert to the existing row, so re-imports of identical shapes are
/// idempotent.
async fn resolve_geo_bins(
    conn: &mut PgConnection,
    shapes: &HashedShapes,
) -> Result<HashMap<Vec<u8>, i32>> {
    let hashes: Vec<Vec<u8>> = shapes.by_hash.keys().cloned().collect();
    let existing: Vec<(Vec<u8>, i32)> = sqlx::query_as(
        r#"SELECT geometry_hash, geo_bin_id FROM gerrydb.geo_bin WHERE geometry_hash = ANY($1)"#,
    )
    .bind(&hashes)
    .fetch_all(&mut *conn)
    .await?;
    let mut bins: HashMap<Vec<u8>, i32> = existing.into_iter().collect();

    for (hash, (shape, point)) in &shapes.by_hash {
        if bins.contains_key(hash) {
            continue;
        }
        let (bin_id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO gerrydb.geo_bin (geometry_hash, geography, internal_point)
            VALUES ($1,
                    ST_SetSRID(ST_GeomFromWKB($2), 4269)::geography,
                    ST_SetSRID(ST_GeomFromWKB($3), 4269)::geography)
            ON CONFLICT (geometry_hash) DO UPDATE SET geometry_hash = EXCLUDED.geometry_hash
            RETURNING geo_bin_id
            "#,
        )
        .bind(hash)
        .bind(shape)
        .bind(point)
        .fetch_one(&mut *conn)
        .await?;
        bins.insert(hash.clone(), bin_id);
    }
    Ok(bins)
}

async fn insert_versions(
    conn: &mut PgConnection,
    geo_import: &GeoImport,
    geos_by_path: &HashMap<String, Geography>,
    path_hashes: &HashMap<String, Vec<u8>>,
    bins: &HashMap<Vec<u8>, i32>,
    valid_from: DateTime<Utc>,
) -> Result<HashMap<i32, GeoVersion>> {
    let mut versions = HashMap::with_capacity(geos_by_path.len());
    for (path, geo) in geos_by_path {
        let bin_id = bins[&path_hashes[path]];
        let version: GeoVersion = sqlx::query_as(
            r#"
            INSERT INTO gerrydb.geo_version (import_id, geo_id, geo_bin_id, valid_from)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(geo_import.import_id)
        .bind(geo.geo_id)
        .bind(bin_id)
        .bind(valid_from)
        .fetch_one(&mut *conn)
        .await?;
        versions.insert(geo.geo_id, version);
    }
    Ok(versions)
}

/// Creates new geographies in bulk with deduplicated shape storage.
pub async fn create_bulk(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    geo_import: &GeoImport,
    namespace: &Namespace,
    objs_in: Vec<GeographyCreate>,
) -> Result<(Vec<(Geography, GeoVersion)>, Uuid)> {
    scopes.require_write_in_namespace(namespace)?;

    let normalized = normalized_input_paths(&objs_in)?;
    let dups = duplicate_paths(&normalized);
    if !dups.is_empty() {
        return Err(Error::BulkCreate {
            message: "cannot create geographies with duplicate paths".to_string(),
            paths: dups,
        });
    }
    let taken = existing_paths(&mut **tx, namespace.namespace_id, &normalized).await?;
    if !taken.is_empty() {
        return Err(Error::BulkCreate {
            message: "cannot create geographies that already exist".to_string(),
            paths: taken,
        });
    }

    let shapes = hash_shapes(&objs_in)?;
    let valid_from = Utc::now();

    let mut inner = tx.begin().await?;

    let mut geos_by_path = HashMap::with_capacity(normalized.len());
    for path in &normalized {
        let geo: Geography = sqlx::query_as(
            r#"
            INSERT INTO gerrydb.geography (path, namespace_id, meta_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(path)
        .bind(namespace.namespace_id)
        .bind(obj_meta.meta_id)
        .fetch_one(&mut *inner)
        .await?;
        geos_by_path.insert(path.clone(), geo);
    }

    let bins = resolve_geo_bins(&mut inner, &shapes).await?;
    let versions = insert_versions(
        &mut inner,
        geo_import,
        &geos_by_path,
        &shapes.path_hashes,
        &bins,
        valid_from,
    )
    .await?;

    let geo_ids: Vec<i32> = geos_by_path.values().map(|geo| geo.geo_id).collect();
    partition::ensure_partitions_for_new_geographies(&mut inner, namespace.namespace_id, &geo_ids)
        .await?;

    let etag = etag::bump(&mut inner, collections::GEOGRAPHIES, Some(namespace.namespace_id))
        .await?;
    inner.commit().await?;

    debug!(
        "Created {} geographies over {} distinct shapes in '{}'",
        normalized.len(),
        shapes.by_hash.len(),
        namespace.path
    );

    let mut created: Vec<(Geography, GeoVersion)> = geos_by_path
        .into_values()
        .map(|geo| {
            let version = versions[&geo.geo_id].clone();
            (geo, version)
        })
        .collect();
    created.sort_by_key(|(geo, _)| geo.geo_id);
    Ok((created, etag))
}

/// Patches geography shapes in bulk. Same-shape inputs are no-ops; changed
/// shapes close the open version and open a new one. Replacing a non-empty
/// shape with an empty one requires `allow_empty_polys`.
pub async fn patch_bulk(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    geo_import: &GeoImport,
    namespace: &Namespace,
    objs_in: Vec<GeographyPatch>,
    allow_empty_polys: bool,
) -> Result<(Vec<(Geography, GeoVersion)>, Uuid)> {
    scopes.require_write_in_namespace(namespace)?;

    let normalized = normalized_input_paths(&objs_in)?;
    let dups = duplicate_paths(&normalized);
    if !dups.is_empty() {
        return Err(Error::BulkPatch {
            message: "cannot patch geographies with duplicate paths".to_string(),
            paths: dups,
        });
    }
    let existing = get_bulk_in_namespace(&mut **tx, namespace.namespace_id, &normalized).await?;
    if existing.len() < normalized.len() {
        let missing: Vec<String> = normalized
            .iter()
            .filter(|path| !existing.contains_key(*path))
            .cloned()
            .collect();
        return Err(Error::BulkPatch {
            message: "cannot update geographies that do not exist".to_string(),
            paths: missing,
        });
    }

    let shapes = hash_shapes(&objs_in)?;

    // Diff incoming hashes against the open versions' hashes.
    let old_hash_rows: Vec<(String, Vec<u8>)> = sqlx::query_as(
        r#"
        SELECT g.path, b.geometry_hash
        FROM gerrydb.geography AS g
        JOIN gerrydb.geo_version AS gv ON gv.geo_id = g.geo_id AND gv.valid_to IS NULL
        JOIN gerrydb.geo_bin AS b ON b.geo_bin_id = gv.geo_bin_id
        WHERE g.namespace_id = $1 AND g.path = ANY($2)
        "#,
    )
    .bind(namespace.namespace_id)
    .bind(&normalized)
    .fetch_all(&mut **tx)
    .await?;
    let old_hashes: HashMap<String, Vec<u8>> = old_hash_rows.into_iter().collect();

    let changed: HashMap<String, Vec<u8>> = shapes
        .path_hashes
        .iter()
        .filter(|(path, hash)| old_hashes.get(*path) != Some(*hash))
        .map(|(path, hash)| (path.clone(), hash.clone()))
        .collect();

    let empty_hash = geos::empty_polygon_hash();
    if !allow_empty_polys && changed.values().any(|hash| *hash == empty_hash) {
        return Err(Error::BulkPatch {
            message: "some new geographies are empty polygons where the previous version \
                      was not; set `allow_empty_polys` to allow this"
                .to_string(),
            paths: changed
                .iter()
                .filter(|(_, hash)| **hash == empty_hash)
                .map(|(path, _)| path.clone())
                .collect(),
        });
    }

    let geo_ids: Vec<i32> = existing.values().map(|geo| geo.geo_id).collect();
    let mut versions = open_versions(&mut **tx, &geo_ids).await?;

    let mut inner = tx.begin().await?;
    if !changed.is_empty() {
        let changed_geos: HashMap<String, Geography> = existing
            .iter()
            .filter(|(path, _)| changed.contains_key(*path))
            .map(|(path, geo)| (path.clone(), geo.clone()))
            .collect();
        let changed_ids: Vec<i32> = changed_geos.values().map(|geo| geo.geo_id).collect();
        let valid_time = Utc::now();

        sqlx::query(
            r#"UPDATE gerrydb.geo_version SET valid_to = $1
               WHERE geo_id = ANY($2) AND valid_to IS NULL"#,
        )
        .bind(valid_time)
        .bind(&changed_ids)
        .execute(&mut *inner)
        .await?;

        let changed_objs: Vec<GeographyPatch> = objs_in
            .iter()
            .filter(|obj_in| {
                paths::normalize_case_sensitive(&obj_in.path)
                    .map(|path| changed.contains_key(&path))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        let changed_shapes = hash_shapes(&changed_objs)?;
        let bins = resolve_geo_bins(&mut inner, &changed_shapes).await?;
        let new_versions = insert_versions(
            &mut inner,
            geo_import,
            &changed_geos,
            &changed_shapes.path_hashes,
            &bins,
            valid_time,
        )
        .await?;
        versions.extend(new_versions);
    }
    let etag = etag::bump(&mut inner, collections::GEOGRAPHIES, Some(namespace.namespace_id))
        .await?;
    inner.commit().await?;

    let mut patched: Vec<(Geography, GeoVersion)> = existing
        .into_values()
        .map(|geo| {
            let version = versions[&geo.geo_id].clone();
            (geo, version)
        })
        .collect();
    patched.sort_by_key(|(geo, _)| geo.geo_id);
    Ok((patched, etag))
}

/// Forks geographies between namespaces: new geography rows in the target
/// whose versions reference existing bins by hash, sharing shapes without
/// copying bytes. Hashes arrive hex-encoded.
pub async fn fork_bulk(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    geo_import: &GeoImport,
    source_namespace: &Namespace,
    target_namespace: &Namespace,
    path_hashes: Vec<(String, String)>,
) -> Result<(Vec<(Geography, GeoVersion)>, Uuid)> {
    scopes.require_read_in_namespace(source_namespace)?;
    scopes.require_write_derived_in_namespace(target_namespace)?;

    let mut normalized = Vec::with_capacity(path_hashes.len());
    let mut path_hash_map: HashMap<String, Vec<u8>> = HashMap::new();
    for (path, hash_hex) in &path_hashes {
        let path = paths::normalize_case_sensitive(path)?;
        let hash = hex::decode(hash_hex).map_err(|_| Error::BulkCreate {
            message: format!("invalid geometry hash '{hash_hex}'"),
            paths: vec![path.clone()],
        })?;
        normalized.push(path.clone());
        path_hash_map.insert(path, hash);
    }

    let dups = duplicate_paths(&normalized);
    if !dups.is_empty() {
        return Err(Error::BulkCreate {
            message: "cannot fork geographies with duplicate paths".to_string(),
            paths: dups,
        });
    }
    let taken = existing_paths(&mut **tx, target_namespace.namespace_id, &normalized).await?;
    if !taken.is_empty() {
        return Err(Error::BulkCreate {
            message: "cannot fork geographies that already exist in the target namespace"
                .to_string(),
            paths: taken,
        });
    }

    debug!(
        "Forking {} geographies from '{}' to '{}'",
        normalized.len(),
        source_namespace.path,
        target_namespace.path
    );

    let hashes: Vec<Vec<u8>> = path_hash_map.values().cloned().collect();
    let bin_rows: Vec<(Vec<u8>, i32)> = sqlx::query_as(
        r#"SELECT geometry_hash, geo_bin_id FROM gerrydb.geo_bin WHERE geometry_hash = ANY($1)"#,
    )
    .bind(&hashes)
    .fetch_all(&mut **tx)
    .await?;
    let bins: HashMap<Vec<u8>, i32> = bin_rows.into_iter().collect();

    let unknown: Vec<String> = path_hash_map
        .iter()
        .filter(|(_, hash)| !bins.contains_key(*hash))
        .map(|(path, _)| path.clone())
        .collect();
    if !unknown.is_empty() {
        return Err(Error::BulkCreate {
            message: "cannot fork geographies whose shapes are not already stored".to_string(),
            paths: unknown,
        });
    }

    let valid_from = Utc::now();
    let mut inner = tx.begin().await?;

    let mut geos_by_path = HashMap::with_capacity(normalized.len());
    for path in &normalized {
        let geo: Geography = sqlx::query_as(
            r#"
            INSERT INTO gerrydb.geography (path, namespace_id, meta_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(path)
        .bind(target_namespace.namespace_id)
        .bind(obj_meta.meta_id)
        .fetch_one(&mut *inner)
        .await?;
        geos_by_path.insert(path.clone(), geo);
    }

    let versions = insert_versions(
        &mut inner,
        geo_import,
        &geos_by_path,
        &path_hash_map,
        &bins,
        valid_from,
    )
    .await?;

    let geo_ids: Vec<i32> = geos_by_path.values().map(|geo| geo.geo_id).collect();
    partition::ensure_partitions_for_new_geographies(
        &mut inner,
        target_namespace.namespace_id,
        &geo_ids,
    )
    .await?;

    let etag = etag::bump(
        &mut inner,
        collections::GEOGRAPHIES,
        Some(target_namespace.namespace_id),
    )
    .await?;
    inner.commit().await?;

    let mut forked: Vec<(Geography, GeoVersion)> = geos_by_path
        .into_values()
        .map(|geo| {
            let version = versions[&geo.geo_id].clone();
            (geo, version)
        })
        .collect();
    forked.sort_by_key(|(geo, _)| geo.geo_id);
    Ok((forked, etag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geos::tests::unit_box_wkb;

    #[test]
    fn duplicate_path_detection() {
        let paths = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(duplicate_paths(&paths), vec!["a".to_string()]);
        assert!(duplicate_paths(&["a".to_string(), "b".to_string()]).is_empty());
    }

    #[test]
    fn identical_shapes_share_one_hash() {
        let objs = vec![
            GeographyCreate {
                path: "a".to_string(),
                geography: Some(unit_box_wkb()),
                internal_point: None,
            },
            GeographyCreate {
                path: "b".to_string(),
                geography: Some(unit_box_wkb()),
                internal_point: None,
            },
        ];
        let shapes = hash_shapes(&objs).unwrap();
        assert_eq!(shapes.by_hash.len(), 1);
        assert_eq!(shapes.path_hashes.len(), 2);
        assert_eq!(shapes.path_hashes["a"], shapes.path_hashes["b"]);
    }

    #[test]
    fn missing_and_empty_shapes_collapse() {
        let objs = vec![
            GeographyCreate {
                path: "missing".to_string(),
                geography: None,
                internal_point: None,
            },
            GeographyCreate {
                path: "explicit".to_string(),
                geography: Some(geos::EMPTY_POLYGON_WKB.to_vec()),
                internal_point: None,
            },
        ];
        let shapes = hash_shapes(&objs).unwrap();
        assert_eq!(shapes.by_hash.len(), 1);
        assert_eq!(
            shapes.path_hashes["missing"],
            geos::empty_polygon_hash()
        );
    }

    #[test]
    fn undecodable_shapes_report_their_paths() {
        let objs = vec![GeographyCreate {
            path: "bad".to_string(),
            geography: Some(vec![0xff, 0x00]),
            internal_point: None,
        }];
        match hash_shapes(&objs) {
            Err(Error::BulkCreate { paths, .. }) => assert_eq!(paths, vec!["bad".to_string()]),
            other => panic!("expected BulkCreate error, got {other:?}"),
        }
    }
}
