use std::collections::{BTreeSet, HashMap, HashSet};

use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::ScopeManager;
use crate::error::{Error, Result};
use crate::etag::{self, collections};
use crate::layer;
use crate::models::{GeoSetVersion, Geography, Graph, Namespace, ObjectMeta};
use crate::paths;

/// Input for a new graph: edges reference geographies by path and may carry
/// arbitrary JSON weights.
#[derive(Debug, Clone)]
pub struct GraphCreate {
    pub path: String,
    pub description: String,
    pub proj: Option<String>,
    pub edges: Vec<(String, String, Option<serde_json::Value>)>,
}

pub async fn get(
    conn: &mut PgConnection,
    namespace: &Namespace,
    path: &str,
) -> Result<Option<Graph>> {
    let normalized = paths::normalize(path)?;
    let graph = sqlx::query_as(
        r#"SELECT * FROM gerrydb.graph WHERE namespace_id = $1 AND path = $2"#,
    )
    .bind(namespace.namespace_id)
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(graph)
}

pub async fn all_in_namespace(
    conn: &mut PgConnection,
    namespace: &Namespace,
) -> Result<Vec<Graph>> {
    let graphs = sqlx::query_as(
        r#"SELECT * FROM gerrydb.graph WHERE namespace_id = $1 ORDER BY path"#,
    )
    .bind(namespace.namespace_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(graphs)
}

/// Edges of a graph as (path_1, path_2, weights) rows.
pub async fn edges_by_path(
    conn: &mut PgConnection,
    graph_id: i32,
) -> Result<Vec<(String, String, Option<serde_json::Value>)>> {
    let rows = sqlx::query_as(
        r#"
        SELECT g1.path AS path_1, g2.path AS path_2, e.weights
        FROM gerrydb.graph_edge AS e
        JOIN gerrydb.geography AS g1 ON g1.geo_id = e.geo_id_1
        JOIN gerrydb.geography AS g2 ON g2.geo_id = e.geo_id_2
        WHERE e.graph_id = $1
        ORDER BY g1.path, g2.path
        "#,
    )
    .bind(graph_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Creates a graph over a geo set version. Every edge endpoint must resolve
/// through `edge_geos` to a member of the set; edges are deduplicated
/// without regard to endpoint order.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    obj_in: GraphCreate,
    geo_set_version: &GeoSetVersion,
    edge_geos: &HashMap<String, Geography>,
) -> Result<(Graph, Uuid)> {
    scopes.require_write_derived_in_namespace(namespace)?;
    let canonical_path = paths::normalize(&obj_in.path)?;

    let set_geo_ids: HashSet<i32> = layer::set_members(&mut **tx, geo_set_version.set_version_id)
        .await?
        .into_iter()
        .collect();
    let not_in_set: Vec<String> = edge_geos
        .values()
        .filter(|geo| !set_geo_ids.contains(&geo.geo_id))
        .map(|geo| geo.path.clone())
        .collect();
    if !not_in_set.is_empty() {
        return Err(Error::CreateValue(format!(
            "geographies not associated with the locality and layer: {}",
            not_in_set.join(", ")
        )));
    }

    let mut missing: BTreeSet<String> = BTreeSet::new();
    for (path_1, path_2, _) in &obj_in.edges {
        if !edge_geos.contains_key(path_1) {
            missing.insert(path_1.clone());
        }
        if !edge_geos.contains_key(path_2) {
            missing.insert(path_2.clone());
        }
    }
    if !missing.is_empty() {
        return Err(Error::CreateValue(format!(
            "edge geographies do not match the geographies associated with the graph; \
             missing edge geographies: [{}]",
            missing.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }

    let graph: Graph = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.graph (set_version_id, namespace_id, path, description, meta_id, proj)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(geo_set_version.set_version_id)
    .bind(namespace.namespace_id)
    .bind(&canonical_path)
    .bind(&obj_in.description)
    .bind(obj_meta.meta_id)
    .bind(&obj_in.proj)
    .fetch_one(&mut **tx)
    .await
    .map_err(|_| {
        Error::CreateValue(format!(
            "failed to create graph '{canonical_path}' (the path may already exist)"
        ))
    })?;

    // Endpoints are ordered by geo id so (a, b) and (b, a) collide.
    let mut seen: HashSet<(i32, i32)> = HashSet::new();
    for (path_1, path_2, weights) in &obj_in.edges {
        let id_1 = edge_geos[path_1].geo_id;
        let id_2 = edge_geos[path_2].geo_id;
        let (lo, hi) = if id_1 <= id_2 { (id_1, id_2) } else { (id_2, id_1) };
        if !seen.insert((lo, hi)) {
            continue;
        }
        sqlx::query(
            r#"
            INSERT INTO gerrydb.graph_edge (graph_id, geo_id_1, geo_id_2, weights)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(graph.graph_id)
        .bind(lo)
        .bind(hi)
        .bind(weights)
        .execute(&mut **tx)
        .await?;
    }

    let etag = etag::bump(&mut **tx, collections::GRAPHS, Some(namespace.namespace_id)).await?;
    Ok((graph, etag))
}
