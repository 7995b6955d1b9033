use std::collections::{HashMap, HashSet};

use log::warn;
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::ScopeManager;
use crate::error::{Error, Result};
use crate::etag::{self, collections};
use crate::models::{Locality, LocalityRef, ObjectMeta};
use crate::paths;

/// Input for one new locality.
#[derive(Debug, Clone)]
pub struct LocalityCreate {
    pub canonical_path: String,
    pub parent_path: Option<String>,
    pub name: String,
    pub default_proj: Option<String>,
    pub aliases: Vec<String>,
}

/// Resolves a locality through any of its reference paths (canonical or
/// alias).
pub async fn get(
    conn: &mut PgConnection,
    scopes: &ScopeManager,
    path: &str,
) -> Result<Option<Locality>> {
    scopes.require_read_localities()?;
    let normalized = paths::normalize(path)?;
    let loc = sqlx::query_as(
        r#"
        SELECT l.* FROM gerrydb.locality AS l
        JOIN gerrydb.locality_ref AS r ON r.loc_id = l.loc_id
        WHERE r.path = $1
        "#,
    )
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(loc)
}

/// The canonical reference path of a locality.
pub async fn canonical_path(conn: &mut PgConnection, loc: &Locality) -> Result<String> {
    let (path,): (String,) =
        sqlx::query_as(r#"SELECT path FROM gerrydb.locality_ref WHERE ref_id = $1"#)
            .bind(loc.canonical_ref_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(path)
}

/// Every reference path (canonical plus aliases) pointing at a locality.
pub async fn refs(conn: &mut PgConnection, loc_id: i32) -> Result<Vec<LocalityRef>> {
    let refs = sqlx::query_as(
        r#"SELECT * FROM gerrydb.locality_ref WHERE loc_id = $1 ORDER BY ref_id"#,
    )
    .bind(loc_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(refs)
}

pub async fn list(conn: &mut PgConnection, scopes: &ScopeManager) -> Result<Vec<Locality>> {
    scopes.require_read_localities()?;
    let locs = sqlx::query_as(r#"SELECT * FROM gerrydb.locality ORDER BY loc_id"#)
        .fetch_all(&mut *conn)
        .await?;
    Ok(locs)
}

pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    obj_in: LocalityCreate,
) -> Result<(Locality, Uuid)> {
    let (mut locs, etag) = create_bulk(tx, scopes, obj_meta, vec![obj_in]).await?;
    Ok((locs.remove(0), etag))
}

/// Creates localities in bulk: parents resolved in one lookup, canonical
/// refs first, then locality rows, then the ref back-fill, then aliases.
pub async fn create_bulk(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    objs_in: Vec<LocalityCreate>,
) -> Result<(Vec<Locality>, Uuid)> {
    scopes.require_write_localities()?;

    let mut parent_paths = HashSet::new();
    for obj_in in &objs_in {
        if let Some(parent) = &obj_in.parent_path {
            parent_paths.insert(paths::normalize(parent)?);
        }
    }
    let parent_list: Vec<String> = parent_paths.iter().cloned().collect();
    let parent_rows: Vec<(String, Option<i32>)> = sqlx::query_as(
        r#"SELECT path, loc_id FROM gerrydb.locality_ref WHERE path = ANY($1)"#,
    )
    .bind(&parent_list)
    .fetch_all(&mut **tx)
    .await?;
    let parent_loc_ids: HashMap<String, Option<i32>> = parent_rows.into_iter().collect();

    if parent_loc_ids.len() < parent_paths.len() {
        let missing: Vec<String> = parent_paths
            .iter()
            .filter(|path| !parent_loc_ids.contains_key(*path))
            .cloned()
            .collect();
        return Err(Error::CreateValue(format!(
            "reference to unknown parent locations: {}",
            missing.join(", ")
        )));
    }
    if parent_loc_ids.values().any(Option::is_none) {
        return Err(Error::CreateValue(
            "dangling locality reference found".to_string(),
        ));
    }

    // Canonical refs first; the locality rows point back at them.
    let mut canonical_ref_ids: HashMap<String, i32> = HashMap::new();
    for obj_in in &objs_in {
        let canonical = paths::normalize(&obj_in.canonical_path)?;
        let inserted: std::result::Result<(i32,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO gerrydb.locality_ref (path, meta_id)
            VALUES ($1, $2)
            RETURNING ref_id
            "#,
        )
        .bind(&canonical)
        .bind(obj_meta.meta_id)
        .fetch_one(&mut **tx)
        .await;
        let (ref_id,) = inserted.map_err(|_| {
            Error::CreateValue(format!(
                "failed to create canonical path '{canonical}' to new location \
                 (the path may already exist)"
            ))
        })?;
        canonical_ref_ids.insert(canonical, ref_id);
    }

    let mut locs = Vec::with_capacity(objs_in.len());
    for obj_in in &objs_in {
        let canonical = paths::normalize(&obj_in.canonical_path)?;
        let parent_id = match &obj_in.parent_path {
            Some(parent) => parent_loc_ids[&paths::normalize(parent)?],
            None => None,
        };
        let loc: Locality = sqlx::query_as(
            r#"
            INSERT INTO gerrydb.locality
                (canonical_ref_id, parent_id, meta_id, name, default_proj)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(canonical_ref_ids[&canonical])
        .bind(parent_id)
        .bind(obj_meta.meta_id)
        .bind(&obj_in.name)
        .bind(&obj_in.default_proj)
        .fetch_one(&mut **tx)
        .await?;

        // Back-fill the canonical ref now that the locality row exists.
        sqlx::query(r#"UPDATE gerrydb.locality_ref SET loc_id = $1 WHERE ref_id = $2"#)
            .bind(loc.loc_id)
            .bind(loc.canonical_ref_id)
            .execute(&mut **tx)
            .await?;

        for alias in &obj_in.aliases {
            let alias_path = paths::normalize(alias)?;
            sqlx::query(
                r#"INSERT INTO gerrydb.locality_ref (path, meta_id, loc_id) VALUES ($1, $2, $3)"#,
            )
            .bind(&alias_path)
            .bind(obj_meta.meta_id)
            .bind(loc.loc_id)
            .execute(&mut **tx)
            .await
            .map_err(|_| {
                Error::CreateValue(format!(
                    "failed to create alias '{alias_path}' for new location \
                     (the alias may already exist)"
                ))
            })?;
        }

        locs.push(loc);
    }

    let etag = etag::bump(&mut **tx, collections::LOCALITIES, None).await?;
    Ok((locs, etag))
}

/// Adds aliases to a locality. Aliases are never removed.
pub async fn patch(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    loc: &Locality,
    aliases: &[String],
) -> Result<Uuid> {
    scopes.require_write_localities()?;

    let existing: HashSet<String> = refs(&mut **tx, loc.loc_id)
        .await?
        .into_iter()
        .map(|r| r.path)
        .collect();
    let mut new_aliases = HashSet::new();
    for alias in aliases {
        let normalized = paths::normalize(alias)?;
        if !existing.contains(&normalized) {
            new_aliases.insert(normalized);
        }
    }

    for alias in &new_aliases {
        let inserted = sqlx::query(
            r#"INSERT INTO gerrydb.locality_ref (path, meta_id, loc_id) VALUES ($1, $2, $3)"#,
        )
        .bind(alias)
        .bind(obj_meta.meta_id)
        .bind(loc.loc_id)
        .execute(&mut **tx)
        .await;
        if inserted.is_err() {
            warn!("Alias '{}' already exists; cannot attach to locality {}", alias, loc.loc_id);
            return Err(Error::CreateValue(format!(
                "failed to create alias '{alias}' (the alias may already point elsewhere)"
            )));
        }
    }

    etag::bump(&mut **tx, collections::LOCALITIES, None).await
}
