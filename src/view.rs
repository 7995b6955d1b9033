use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::ScopeManager;
use crate::error::{Error, Result};
use crate::etag::{self, collections};
use crate::layer;
use crate::models::{
    ColumnRef, ColumnSet, ColumnType, GeoLayer, Graph, Locality, Namespace, ObjectMeta, View,
    ViewTemplate, ViewTemplateVersion,
};
use crate::paths;

/// A resolved view-template member: a column reference or a column set,
/// paired with the namespace it lives in for the cross-namespace check.
#[derive(Debug, Clone)]
pub enum TemplateMember {
    Column {
        col_ref: ColumnRef,
        namespace: Namespace,
    },
    Set {
        set: ColumnSet,
        namespace: Namespace,
    },
}

impl TemplateMember {
    fn namespace(&self) -> &Namespace {
        match self {
            TemplateMember::Column { namespace, .. } => namespace,
            TemplateMember::Set { namespace, .. } => namespace,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewTemplateCreate {
    pub path: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ViewCreate {
    pub path: String,
    pub proj: Option<String>,
    pub valid_at: Option<DateTime<Utc>>,
}

/// One expanded template column with its render alias.
#[derive(Debug, Clone)]
pub struct ViewColumn {
    pub col_id: i32,
    pub path: String,
    pub namespace: String,
    pub alias: String,
    pub col_type: ColumnType,
    pub description: Option<String>,
}

pub async fn get_template(
    conn: &mut PgConnection,
    namespace: &Namespace,
    path: &str,
) -> Result<Option<ViewTemplate>> {
    let normalized = paths::normalize(path)?;
    let template = sqlx::query_as(
        r#"SELECT * FROM gerrydb.view_template WHERE namespace_id = $1 AND path = $2"#,
    )
    .bind(namespace.namespace_id)
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(template)
}

/// The current (open) version of a template.
pub async fn current_template_version(
    conn: &mut PgConnection,
    template_id: i32,
) -> Result<Option<ViewTemplateVersion>> {
    let version = sqlx::query_as(
        r#"
        SELECT * FROM gerrydb.view_template_version
        WHERE template_id = $1 AND valid_to IS NULL
        "#,
    )
    .bind(template_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(version)
}

/// The template version whose validity interval covers `at`.
pub async fn template_version_at(
    conn: &mut PgConnection,
    template_id: i32,
    at: DateTime<Utc>,
) -> Result<Option<ViewTemplateVersion>> {
    let version = sqlx::query_as(
        r#"
        SELECT * FROM gerrydb.view_template_version
        WHERE template_id = $1
          AND valid_from <= $2 AND (valid_to IS NULL OR valid_to > $2)
        "#,
    )
    .bind(template_id)
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(version)
}

async fn insert_template_members(
    tx: &mut Transaction<'_, Postgres>,
    namespace: &Namespace,
    template_version_id: i32,
    members: &[TemplateMember],
) -> Result<()> {
    for (idx, member) in members.iter().enumerate() {
        let member_ns = member.namespace();
        if member_ns.namespace_id != namespace.namespace_id && !member_ns.public {
            return Err(Error::CreateValue(
                "cannot create a cross-namespace reference to an object in a private namespace"
                    .to_string(),
            ));
        }
        match member {
            TemplateMember::Column { col_ref, .. } => {
                sqlx::query(
                    r#"
                    INSERT INTO gerrydb.view_template_column_member
                        (template_version_id, ref_id, "order")
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(template_version_id)
                .bind(col_ref.ref_id)
                .bind(idx as i32)
                .execute(&mut **tx)
                .await?;
            }
            TemplateMember::Set { set, .. } => {
                sqlx::query(
                    r#"
                    INSERT INTO gerrydb.view_template_column_set_member
                        (template_version_id, set_id, "order")
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(template_version_id)
                .bind(set.set_id)
                .bind(idx as i32)
                .execute(&mut **tx)
                .await?;
            }
        }
    }
    Ok(())
}

/// Creates a view template with its first version.
pub async fn create_template(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    obj_in: ViewTemplateCreate,
    members: &[TemplateMember],
) -> Result<(ViewTemplateVersion, Uuid)> {
    scopes.require_write_in_namespace(namespace)?;
    let canonical_path = paths::normalize(&obj_in.path)?;

    let template: ViewTemplate = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.view_template (namespace_id, path, description, meta_id)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(namespace.namespace_id)
    .bind(&canonical_path)
    .bind(&obj_in.description)
    .bind(obj_meta.meta_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|_| {
        Error::CreateValue(format!(
            "failed to create view template '{canonical_path}' \
             (the path may already exist in the namespace)"
        ))
    })?;

    let version: ViewTemplateVersion = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.view_template_version (template_id, valid_from, meta_id)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(template.template_id)
    .bind(Utc::now())
    .bind(obj_meta.meta_id)
    .fetch_one(&mut **tx)
    .await?;

    insert_template_members(tx, namespace, version.template_version_id, members).await?;
    let etag = etag::bump(
        &mut **tx,
        collections::VIEW_TEMPLATES,
        Some(namespace.namespace_id),
    )
    .await?;
    Ok((version, etag))
}

/// Supersedes a template's current version with a new member list. The old
/// version stays resolvable for views pinned before the change.
pub async fn update_template(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    template: &ViewTemplate,
    members: &[TemplateMember],
) -> Result<(ViewTemplateVersion, Uuid)> {
    scopes.require_write_in_namespace(namespace)?;
    let now = Utc::now();
    sqlx::query(
        r#"
        UPDATE gerrydb.view_template_version SET valid_to = $1
        WHERE template_id = $2 AND valid_to IS NULL
        "#,
    )
    .bind(now)
    .bind(template.template_id)
    .execute(&mut **tx)
    .await?;

    let version: ViewTemplateVersion = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.view_template_version (template_id, valid_from, meta_id)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(template.template_id)
    .bind(now)
    .bind(obj_meta.meta_id)
    .fetch_one(&mut **tx)
    .await?;

    insert_template_members(tx, namespace, version.template_version_id, members).await?;
    let etag = etag::bump(
        &mut **tx,
        collections::VIEW_TEMPLATES,
        Some(namespace.namespace_id),
    )
    .await?;
    Ok((version, etag))
}

/// Assigns a human-readable output alias to each column: the bare path when
/// unique across namespaces, `namespace__path` otherwise.
pub fn disambiguate_aliases(columns: &[(String, String, i32)]) -> HashMap<i32, String> {
    let mut namespaces_by_path: HashMap<&str, HashSet<&str>> = HashMap::new();
    for (path, namespace, _) in columns {
        namespaces_by_path
            .entry(path.as_str())
            .or_default()
            .insert(namespace.as_str());
    }
    columns
        .iter()
        .map(|(path, namespace, col_id)| {
            let alias = if namespaces_by_path[path.as_str()].len() > 1 {
                format!("{namespace}__{path}")
            } else {
                path.clone()
            };
            (*col_id, alias)
        })
        .collect()
}

/// Expands a template version into its unique columns, in member order,
/// with render aliases attached.
pub async fn expand_columns(
    conn: &mut PgConnection,
    template_version_id: i32,
) -> Result<Vec<ViewColumn>> {
    let direct: Vec<(i32, Option<i32>, String, String)> = sqlx::query_as(
        r#"
        SELECT m."order", r.col_id, r.path, n.path AS namespace
        FROM gerrydb.view_template_column_member AS m
        JOIN gerrydb.column_ref AS r ON r.ref_id = m.ref_id
        JOIN gerrydb.namespace AS n ON n.namespace_id = r.namespace_id
        WHERE m.template_version_id = $1
        "#,
    )
    .bind(template_version_id)
    .fetch_all(&mut *conn)
    .await?;

    let via_sets: Vec<(i32, i32, Option<i32>, String, String)> = sqlx::query_as(
        r#"
        SELECT sm."order", cm."order" AS inner_order, r.col_id, r.path, n.path AS namespace
        FROM gerrydb.view_template_column_set_member AS sm
        JOIN gerrydb.column_set_member AS cm ON cm.set_id = sm.set_id
        JOIN gerrydb.column_ref AS r ON r.ref_id = cm.ref_id
        JOIN gerrydb.namespace AS n ON n.namespace_id = r.namespace_id
        WHERE sm.template_version_id = $1
        "#,
    )
    .bind(template_version_id)
    .fetch_all(&mut *conn)
    .await?;

    // Merge the two member kinds in template order, then inner set order.
    let mut ordered: Vec<(i32, i32, i32, String, String)> = Vec::new();
    for (order, col_id, path, namespace) in direct {
        if let Some(col_id) = col_id {
            ordered.push((order, 0, col_id, path, namespace));
        }
    }
    for (order, inner_order, col_id, path, namespace) in via_sets {
        if let Some(col_id) = col_id {
            ordered.push((order, inner_order, col_id, path, namespace));
        }
    }
    ordered.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    // Dedupe by column identity, keeping the first occurrence.
    let mut seen = HashSet::new();
    let unique: Vec<(String, String, i32)> = ordered
        .into_iter()
        .filter(|(_, _, col_id, _, _)| seen.insert(*col_id))
        .map(|(_, _, col_id, path, namespace)| (path, namespace, col_id))
        .collect();
    let aliases = disambiguate_aliases(&unique);

    let col_ids: Vec<i32> = unique.iter().map(|(_, _, col_id)| *col_id).collect();
    let details: Vec<(i32, ColumnType, Option<String>)> = sqlx::query_as(
        r#"SELECT col_id, type, description FROM gerrydb."column" WHERE col_id = ANY($1)"#,
    )
    .bind(&col_ids)
    .fetch_all(&mut *conn)
    .await?;
    let details: HashMap<i32, (ColumnType, Option<String>)> = details
        .into_iter()
        .map(|(col_id, col_type, description)| (col_id, (col_type, description)))
        .collect();

    Ok(unique
        .into_iter()
        .map(|(path, namespace, col_id)| {
            let (col_type, description) = details[&col_id].clone();
            ViewColumn {
                col_id,
                alias: aliases[&col_id].clone(),
                path,
                namespace,
                col_type,
                description,
            }
        })
        .collect())
}

/// (path -> geometry hash) for every member of a set version, using the geo
/// versions open at `at`.
async fn set_path_hashes(
    conn: &mut PgConnection,
    set_version_id: i32,
    at: DateTime<Utc>,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let rows: Vec<(String, Vec<u8>)> = sqlx::query_as(
        r#"
        SELECT g.path, b.geometry_hash
        FROM gerrydb.geo_set_member AS m
        JOIN gerrydb.geo_version AS gv ON gv.geo_id = m.geo_id
          AND gv.valid_from <= $2 AND (gv.valid_to IS NULL OR gv.valid_to > $2)
        JOIN gerrydb.geography AS g ON g.geo_id = m.geo_id
        JOIN gerrydb.geo_bin AS b ON b.geo_bin_id = gv.geo_bin_id
        WHERE m.set_version_id = $1
        "#,
    )
    .bind(set_version_id)
    .bind(at)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Candidate set versions for (locality, layer-path) at `at` holding values
/// for at least one expanded column, with the columns each one covers.
async fn candidate_set_versions(
    conn: &mut PgConnection,
    layer_ids: &[i32],
    loc_id: i32,
    col_ids: &[i32],
    at: DateTime<Utc>,
) -> Result<HashMap<i32, HashSet<String>>> {
    let rows: Vec<(i32, String)> = sqlx::query_as(
        r#"
        SELECT DISTINCT sv.set_version_id, r.path
        FROM gerrydb.geo_set_version AS sv
        JOIN gerrydb.geo_set_member AS m ON m.set_version_id = sv.set_version_id
        JOIN gerrydb.column_value AS cv ON cv.geo_id = m.geo_id
          AND cv.valid_from <= $4 AND (cv.valid_to IS NULL OR cv.valid_to > $4)
        JOIN gerrydb."column" AS c ON c.col_id = cv.col_id
        JOIN gerrydb.column_ref AS r ON r.ref_id = c.canonical_ref_id
        WHERE sv.layer_id = ANY($1) AND sv.loc_id = $2
          AND sv.valid_from <= $4 AND (sv.valid_to IS NULL OR sv.valid_to > $4)
          AND cv.col_id = ANY($3)
        "#,
    )
    .bind(layer_ids)
    .bind(loc_id)
    .bind(col_ids)
    .bind(at)
    .fetch_all(&mut *conn)
    .await?;
    let mut by_set: HashMap<i32, HashSet<String>> = HashMap::new();
    for (set_version_id, path) in rows {
        by_set.entry(set_version_id).or_default().insert(path);
    }
    Ok(by_set)
}

/// The set version at `at` for (locality, layer-path) whose members live in
/// the given namespace.
async fn own_namespace_set_version(
    conn: &mut PgConnection,
    layer_ids: &[i32],
    loc_id: i32,
    namespace_id: i32,
    at: DateTime<Utc>,
) -> Result<Option<i32>> {
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT sv.set_version_id
        FROM gerrydb.geo_set_version AS sv
        JOIN gerrydb.geo_set_member AS m ON m.set_version_id = sv.set_version_id
        JOIN gerrydb.geography AS g ON g.geo_id = m.geo_id
        WHERE sv.layer_id = ANY($1) AND sv.loc_id = $2
          AND sv.valid_from <= $4 AND (sv.valid_to IS NULL OR sv.valid_to > $4)
          AND g.namespace_id = $3
        "#,
    )
    .bind(layer_ids)
    .bind(loc_id)
    .bind(namespace_id)
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(set_version_id,)| set_version_id))
}

/// Validates cross-namespace geometry compatibility: every candidate set
/// must expose exactly the (path -> hash) map of the view-namespace set.
/// Returns the accepted set version ids plus the own-namespace id.
async fn validate_geo_set_compatibility(
    conn: &mut PgConnection,
    namespace: &Namespace,
    locality: &Locality,
    geo_layer: &GeoLayer,
    col_ids: &[i32],
    at: DateTime<Utc>,
) -> Result<(Vec<i32>, i32)> {
    let layer_rows: Vec<(i32,)> =
        sqlx::query_as(r#"SELECT layer_id FROM gerrydb.geo_layer WHERE path = $1"#)
            .bind(&geo_layer.path)
            .fetch_all(&mut *conn)
            .await?;
    let layer_ids: Vec<i32> = layer_rows.into_iter().map(|(layer_id,)| layer_id).collect();

    let own_set_version =
        own_namespace_set_version(conn, &layer_ids, locality.loc_id, namespace.namespace_id, at)
            .await?
            .ok_or_else(|| {
                Error::not_found(
                    "no set of geographies exists in the current namespace satisfying \
                     locality and layer constraints",
                )
            })?;

    let mut by_set =
        candidate_set_versions(conn, &layer_ids, locality.loc_id, col_ids, at).await?;
    if by_set.is_empty() {
        return Err(Error::CreateValue(
            "cannot instantiate view: no set of geographies exists satisfying locality, \
             layer, and time constraints for the columns in the view template"
                .to_string(),
        ));
    }

    let own_hashes = set_path_hashes(conn, own_set_version, at).await?;
    let mut accepted = vec![own_set_version];
    by_set.remove(&own_set_version);
    for (set_version_id, cols) in by_set {
        let hashes = set_path_hashes(conn, set_version_id, at).await?;
        if hashes != own_hashes {
            let mut conflicting: Vec<String> = cols.into_iter().collect();
            conflicting.sort();
            return Err(Error::ViewConflict {
                message: "cannot create view: some columns are defined on a layer whose \
                          geometries differ from the layer in the view's namespace"
                    .to_string(),
                columns: conflicting,
            });
        }
        accepted.push(set_version_id);
    }
    accepted.sort_unstable();
    Ok((accepted, own_set_version))
}

pub async fn get(
    conn: &mut PgConnection,
    namespace: &Namespace,
    path: &str,
) -> Result<Option<View>> {
    let normalized = paths::normalize(path)?;
    let view = sqlx::query_as(
        r#"SELECT * FROM gerrydb.view WHERE namespace_id = $1 AND path = $2"#,
    )
    .bind(namespace.namespace_id)
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(view)
}

pub async fn all_in_namespace(conn: &mut PgConnection, namespace: &Namespace) -> Result<Vec<View>> {
    let views = sqlx::query_as(
        r#"SELECT * FROM gerrydb.view WHERE namespace_id = $1 ORDER BY path"#,
    )
    .bind(namespace.namespace_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(views)
}

/// The accepted set version ids of a view. The association table is the
/// source of truth; `view.set_version_id` is the own-namespace shortcut.
pub async fn set_version_ids(conn: &mut PgConnection, view_id: i32) -> Result<Vec<i32>> {
    let rows: Vec<(i32,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT set_version_id FROM gerrydb.view_geo_set_versions
        WHERE view_id = $1 ORDER BY set_version_id
        "#,
    )
    .bind(view_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|(set_version_id,)| set_version_id).collect())
}

/// Creates a view: a consistent snapshot of the template's columns over a
/// (locality, layer) pinned at `valid_at`.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    obj_in: ViewCreate,
    template: &ViewTemplate,
    locality: &Locality,
    geo_layer: &GeoLayer,
    graph: Option<&Graph>,
) -> Result<(View, Uuid)> {
    scopes.require_write_derived_in_namespace(namespace)?;

    let now = Utc::now();
    let valid_at = obj_in.valid_at.unwrap_or(now);
    if valid_at > now {
        return Err(Error::CreateValue(
            "cannot instantiate a view in the future".to_string(),
        ));
    }

    let template_version = template_version_at(&mut **tx, template.template_id, valid_at)
        .await?
        .ok_or_else(|| {
            Error::not_found("no template version found satisfying time constraints")
        })?;

    let columns = expand_columns(&mut **tx, template_version.template_version_id).await?;
    let col_ids: Vec<i32> = columns.iter().map(|col| col.col_id).collect();

    let (accepted_set_versions, own_set_version) = validate_geo_set_compatibility(
        &mut **tx,
        namespace,
        locality,
        geo_layer,
        &col_ids,
        valid_at,
    )
    .await?;

    if let Some(graph) = graph {
        if graph.set_version_id != own_set_version {
            return Err(Error::CreateValue(format!(
                "cannot instantiate view: graph '{}' does not match the locality and \
                 geographic layer",
                graph.path
            )));
        }
        if graph.created_at > valid_at {
            return Err(Error::CreateValue(format!(
                "cannot instantiate view: graph '{}' exists in the future relative to the \
                 view timestamp ({valid_at})",
                graph.path
            )));
        }
    }

    let num_geos = layer::set_members(&mut **tx, own_set_version).await?.len() as i64;

    // Every expanded column must cover every geography at `valid_at`.
    let value_counts: Vec<(i32, i64)> = sqlx::query_as(
        r#"
        SELECT cv.col_id, count(*)
        FROM gerrydb.column_value AS cv
        WHERE cv.col_id = ANY($1)
          AND cv.valid_from <= $2 AND (cv.valid_to IS NULL OR cv.valid_to > $2)
          AND cv.geo_id IN (
              SELECT DISTINCT geo_id FROM gerrydb.geo_set_member
              WHERE set_version_id = ANY($3)
          )
        GROUP BY cv.col_id
        "#,
    )
    .bind(&col_ids)
    .bind(valid_at)
    .bind(&accepted_set_versions)
    .fetch_all(&mut **tx)
    .await?;
    let counts: HashMap<i32, i64> = value_counts.into_iter().collect();
    let bad_cols: Vec<String> = columns
        .iter()
        .filter_map(|col| {
            let count = counts.get(&col.col_id).copied().unwrap_or(0);
            (count != num_geos).then(|| {
                format!(
                    "/{}/{} ({count} values found, {num_geos} values expected)",
                    col.namespace, col.path
                )
            })
        })
        .collect();
    if !bad_cols.is_empty() {
        return Err(Error::CreateValue(format!(
            "cannot instantiate view: column values satisfying all constraints are not \
             available for all geographies; bad columns: {}",
            bad_cols.join(", ")
        )));
    }

    let canonical_path = paths::normalize(&obj_in.path)?;
    let view: View = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.view
            (namespace_id, path, template_id, template_version_id, loc_id, layer_id,
             set_version_id, at, proj, meta_id, graph_id, num_geos)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(namespace.namespace_id)
    .bind(&canonical_path)
    .bind(template.template_id)
    .bind(template_version.template_version_id)
    .bind(locality.loc_id)
    .bind(geo_layer.layer_id)
    .bind(own_set_version)
    .bind(valid_at)
    .bind(&obj_in.proj)
    .bind(obj_meta.meta_id)
    .bind(graph.map(|graph| graph.graph_id))
    .bind(num_geos as i32)
    .fetch_one(&mut **tx)
    .await
    .map_err(|_| {
        Error::CreateValue(format!(
            "failed to create view '{canonical_path}' \
             (the path may already exist in the namespace)"
        ))
    })?;

    for set_version_id in &accepted_set_versions {
        sqlx::query(
            r#"INSERT INTO gerrydb.view_geo_set_versions (view_id, set_version_id) VALUES ($1, $2)"#,
        )
        .bind(view.view_id)
        .bind(set_version_id)
        .execute(&mut **tx)
        .await?;
    }

    let etag = etag::bump(&mut **tx, collections::VIEWS, Some(namespace.namespace_id)).await?;
    debug!(
        "Created view '{}' over {} set versions with {} columns",
        view.path,
        accepted_set_versions.len(),
        columns.len()
    );
    Ok((view, etag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_paths_keep_bare_aliases() {
        let columns = vec![
            ("pop".to_string(), "census".to_string(), 1),
            ("vap".to_string(), "census".to_string(), 2),
        ];
        let aliases = disambiguate_aliases(&columns);
        assert_eq!(aliases[&1], "pop");
        assert_eq!(aliases[&2], "vap");
    }

    #[test]
    fn colliding_paths_get_namespace_prefixes() {
        let columns = vec![
            ("pop".to_string(), "census".to_string(), 1),
            ("pop".to_string(), "acs".to_string(), 2),
            ("vap".to_string(), "census".to_string(), 3),
        ];
        let aliases = disambiguate_aliases(&columns);
        assert_eq!(aliases[&1], "census__pop");
        assert_eq!(aliases[&2], "acs__pop");
        assert_eq!(aliases[&3], "vap");
    }
}
