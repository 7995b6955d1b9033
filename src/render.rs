use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error};
use serde::Serialize;
use sqlx::PgConnection;
use tempfile::TempDir;
use tokio::process::Command;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::graph;
use crate::models::{ColumnType, ObjectMeta, Plan, View, ViewRender, ViewRenderStatus};
use crate::paths::{quote_ident, quote_literal};
use crate::plan;
use crate::view::{self, ViewColumn, disambiguate_aliases};

// Bulk exports wrap the command-line utility `ogr2ogr` to write a GeoPackage
// with geographies and tabular data straight from the database; the kernel
// only generates the queries it runs. The export file is then treated as a
// plain SQLite database and the GerryDB sidecar tables are injected.
//
// `ogr2ogr` should be pointed at read-only database credentials where
// possible; the queries it receives are fully rendered (no parameters).

/// Extension name registered for every sidecar table.
pub const GPKG_EXTENSION_NAME: &str = "mggg_gerrydb";

/// One output row of the plan-assignment sidecar: a geography path plus one
/// label slot per visible plan.
#[derive(Debug, Clone)]
pub struct PlanAssignmentRow {
    pub path: String,
    pub assignments: Vec<Option<String>>,
}

/// Identifying metadata serialized into the `gerrydb_view_meta` sidecar.
#[derive(Debug, Clone, Serialize)]
pub struct ViewMetaDoc {
    pub path: String,
    pub namespace: String,
    pub template: String,
    pub locality: String,
    pub layer: String,
    pub valid_at: DateTime<Utc>,
    pub proj: Option<String>,
    pub graph: Option<String>,
    pub num_geos: i32,
    pub meta: ObjectMeta,
}

/// Everything the render coordinator needs: the two extractor queries plus
/// the sidecar data injected after the export.
#[derive(Debug, Clone)]
pub struct ViewRenderContext {
    pub view: View,
    pub columns: Vec<ViewColumn>,
    pub view_meta: ViewMetaDoc,
    pub target_proj: Option<String>,
    pub plan_labels: Vec<String>,
    pub plan_assignments: Vec<PlanAssignmentRow>,
    pub graph_edges: Option<Vec<(String, String, Option<serde_json::Value>)>>,
    pub graph_node_areas: Option<Vec<(String, f64)>>,
    pub geo_meta: BTreeMap<i32, ObjectMeta>,
    pub geo_meta_ids: BTreeMap<String, i32>,
    pub geo_valid_from: BTreeMap<String, DateTime<Utc>>,
    pub geo_query: String,
    pub internal_point_query: String,
}

fn timestamp_literal(at: DateTime<Utc>) -> String {
    format!(
        "{}::timestamptz",
        quote_literal(&at.to_rfc3339_opts(SecondsFormat::Micros, true))
    )
}

fn id_list(ids: &[i32]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn value_slot(col_type: ColumnType) -> Option<&'static str> {
    col_type.value_column()
}

/// The geography query handed to the bulk extractor: every member of the
/// view's accepted set versions with its shape open at the view timestamp,
/// left-joined to a pivot of the view's columns.
pub fn geography_query(at: DateTime<Utc>, set_version_ids: &[i32], columns: &[ViewColumn]) -> String {
    let at_lit = timestamp_literal(at);
    let sets = id_list(set_version_ids);

    let mut select_cols = String::from("geo.path, bin.geography");
    for col in columns {
        select_cols.push_str(&format!(", vals.{}", quote_ident(&col.alias)));
    }

    let mut query = format!(
        "SELECT {select_cols}\n\
         FROM gerrydb.geo_version AS gv\n\
         JOIN (SELECT DISTINCT geo_id FROM gerrydb.geo_set_member \
               WHERE set_version_id IN ({sets})) AS members\n\
           ON members.geo_id = gv.geo_id\n\
         JOIN gerrydb.geography AS geo ON geo.geo_id = gv.geo_id\n\
         JOIN gerrydb.geo_bin AS bin ON bin.geo_bin_id = gv.geo_bin_id\n"
    );

    if !columns.is_empty() {
        let col_ids: Vec<i32> = columns.iter().map(|col| col.col_id).collect();
        let mut aggregates = Vec::with_capacity(columns.len());
        for col in columns {
            let aggregate = match value_slot(col.col_type) {
                Some(slot) => format!(
                    "max(cv.{slot}) FILTER (WHERE cv.col_id = {}) AS {}",
                    col.col_id,
                    quote_ident(&col.alias)
                ),
                None => format!("NULL AS {}", quote_ident(&col.alias)),
            };
            aggregates.push(aggregate);
        }
        query.push_str(&format!(
            "LEFT JOIN (\n\
                 SELECT cv.geo_id, {aggregates}\n\
                 FROM gerrydb.column_value AS cv\n\
                 WHERE cv.col_id IN ({cols})\n\
                   AND cv.valid_from <= {at_lit}\n\
                   AND (cv.valid_to IS NULL OR cv.valid_to > {at_lit})\n\
                 GROUP BY cv.geo_id\n\
             ) AS vals ON vals.geo_id = gv.geo_id\n",
            aggregates = aggregates.join(", "),
            cols = id_list(&col_ids),
        ));
    }

    query.push_str(&format!(
        "WHERE gv.valid_from <= {at_lit} AND (gv.valid_to IS NULL OR gv.valid_to > {at_lit})"
    ));
    query
}

/// The internal-point query: the same rows projecting the point column.
pub fn internal_point_query(at: DateTime<Utc>, set_version_ids: &[i32]) -> String {
    let at_lit = timestamp_literal(at);
    let sets = id_list(set_version_ids);
    format!(
        "SELECT geo.path, bin.internal_point\n\
         FROM gerrydb.geo_version AS gv\n\
         JOIN (SELECT DISTINCT geo_id FROM gerrydb.geo_set_member \
               WHERE set_version_id IN ({sets})) AS members\n\
           ON members.geo_id = gv.geo_id\n\
         JOIN gerrydb.geography AS geo ON geo.geo_id = gv.geo_id\n\
         JOIN gerrydb.geo_bin AS bin ON bin.geo_bin_id = gv.geo_bin_id\n\
         WHERE gv.valid_from <= {at_lit} AND (gv.valid_to IS NULL OR gv.valid_to > {at_lit})"
    )
}

/// Plans visible to a view: over an accepted set version, created at or
/// before the view timestamp, and in the view's namespace or a public one.
async fn visible_plans(
    conn: &mut PgConnection,
    view: &View,
    set_version_ids: &[i32],
) -> Result<Vec<(Plan, String)>> {
    let plans: Vec<Plan> = sqlx::query_as(
        r#"
        SELECT p.* FROM gerrydb.plan AS p
        JOIN gerrydb.namespace AS n ON n.namespace_id = p.namespace_id
        WHERE p.set_version_id = ANY($1)
          AND p.created_at <= $2
          AND (n.public OR p.namespace_id = $3)
        ORDER BY p.plan_id
        "#,
    )
    .bind(set_version_ids)
    .bind(view.at)
    .bind(view.namespace_id)
    .fetch_all(&mut *conn)
    .await?;

    let ns_ids: Vec<i32> = plans.iter().map(|plan| plan.namespace_id).collect();
    let ns_paths: Vec<(i32, String)> = sqlx::query_as(
        r#"SELECT namespace_id, path FROM gerrydb.namespace WHERE namespace_id = ANY($1)"#,
    )
    .bind(&ns_ids)
    .fetch_all(&mut *conn)
    .await?;
    let ns_paths: HashMap<i32, String> = ns_paths.into_iter().collect();

    Ok(plans
        .into_iter()
        .map(|plan| {
            let ns_path = ns_paths[&plan.namespace_id].clone();
            (plan, ns_path)
        })
        .collect())
}

/// Distinct member geographies of the accepted set versions: (geo_id, path).
async fn member_geographies(
    conn: &mut PgConnection,
    set_version_ids: &[i32],
) -> Result<Vec<(i32, String)>> {
    let rows = sqlx::query_as(
        r#"
        SELECT DISTINCT g.geo_id, g.path
        FROM gerrydb.geo_set_member AS m
        JOIN gerrydb.geography AS g ON g.geo_id = m.geo_id
        WHERE m.set_version_id = ANY($1)
        ORDER BY g.path
        "#,
    )
    .bind(set_version_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Builds the full render context for a view.
pub async fn build_context(conn: &mut PgConnection, view: View) -> Result<ViewRenderContext> {
    let columns = view::expand_columns(conn, view.template_version_id).await?;
    let set_version_ids = view::set_version_ids(conn, view.view_id).await?;

    let geo_query = geography_query(view.at, &set_version_ids, &columns);
    let ip_query = internal_point_query(view.at, &set_version_ids);
    debug!("Render geography query: {geo_query}");

    // Plans and their output labels.
    let plans = visible_plans(conn, &view, &set_version_ids).await?;
    let label_inputs: Vec<(String, String, i32)> = plans
        .iter()
        .map(|(plan, ns_path)| (plan.path.clone(), ns_path.clone(), plan.plan_id))
        .collect();
    let label_map = disambiguate_aliases(&label_inputs);
    let plan_labels: Vec<String> = plans
        .iter()
        .map(|(plan, _)| label_map[&plan.plan_id].clone())
        .collect();

    let members = member_geographies(conn, &set_version_ids).await?;
    let mut plan_assignment_cols: Vec<HashMap<i32, String>> = Vec::with_capacity(plans.len());
    for (plan_row, _) in &plans {
        let assignments: HashMap<i32, String> = plan::assignments(conn, plan_row.plan_id)
            .await?
            .into_iter()
            .collect();
        plan_assignment_cols.push(assignments);
    }
    let plan_assignments: Vec<PlanAssignmentRow> = members
        .iter()
        .map(|(geo_id, path)| PlanAssignmentRow {
            path: path.clone(),
            assignments: plan_assignment_cols
                .iter()
                .map(|assignments| assignments.get(geo_id).cloned())
                .collect(),
        })
        .collect();

    // Graph sidecars, if a graph is pinned to the view.
    let (graph_edges, graph_node_areas, graph_path) = match view.graph_id {
        Some(graph_id) => {
            let edges = graph::edges_by_path(conn, graph_id).await?;
            let areas: Vec<(String, f64)> = sqlx::query_as(
                r#"
                SELECT g.path, ST_Area(b.geography)::float8
                FROM gerrydb.geo_set_member AS m
                JOIN gerrydb.geo_version AS gv ON gv.geo_id = m.geo_id
                  AND gv.valid_from <= $2 AND (gv.valid_to IS NULL OR gv.valid_to > $2)
                JOIN gerrydb.geography AS g ON g.geo_id = m.geo_id
                JOIN gerrydb.geo_bin AS b ON b.geo_bin_id = gv.geo_bin_id
                WHERE m.set_version_id = $1
                ORDER BY g.path
                "#,
            )
            .bind(view.set_version_id)
            .bind(view.at)
            .fetch_all(&mut *conn)
            .await?;
            let (path,): (String,) =
                sqlx::query_as(r#"SELECT path FROM gerrydb.graph WHERE graph_id = $1"#)
                    .bind(graph_id)
                    .fetch_one(&mut *conn)
                    .await?;
            (Some(edges), Some(areas), Some(path))
        }
        None => (None, None, None),
    };

    // Per-geography metadata and version timestamps.
    let meta_rows: Vec<(String, i32)> = sqlx::query_as(
        r#"
        SELECT DISTINCT g.path, g.meta_id
        FROM gerrydb.geo_set_member AS m
        JOIN gerrydb.geography AS g ON g.geo_id = m.geo_id
        WHERE m.set_version_id = ANY($1)
        "#,
    )
    .bind(&set_version_ids)
    .fetch_all(&mut *conn)
    .await?;
    let geo_meta_ids: BTreeMap<String, i32> = meta_rows.into_iter().collect();
    let distinct_meta_ids: Vec<i32> = {
        let mut ids: Vec<i32> = geo_meta_ids.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let metas: Vec<ObjectMeta> =
        sqlx::query_as(r#"SELECT * FROM gerrydb.meta WHERE meta_id = ANY($1)"#)
            .bind(&distinct_meta_ids)
            .fetch_all(&mut *conn)
            .await?;
    let geo_meta: BTreeMap<i32, ObjectMeta> =
        metas.into_iter().map(|meta| (meta.meta_id, meta)).collect();

    let valid_from_rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT DISTINCT g.path, gv.valid_from
        FROM gerrydb.geo_set_member AS m
        JOIN gerrydb.geography AS g ON g.geo_id = m.geo_id
        JOIN gerrydb.geo_version AS gv ON gv.geo_id = m.geo_id
          AND gv.valid_from <= $2 AND (gv.valid_to IS NULL OR gv.valid_to > $2)
        WHERE m.set_version_id = ANY($1)
        "#,
    )
    .bind(&set_version_ids)
    .bind(view.at)
    .fetch_all(&mut *conn)
    .await?;
    let geo_valid_from: BTreeMap<String, DateTime<Utc>> = valid_from_rows.into_iter().collect();

    // Identifying strings for the view-meta sidecar, plus the target CRS:
    // the view's projection, else the locality default, else none.
    let (namespace_path,): (String,) =
        sqlx::query_as(r#"SELECT path FROM gerrydb.namespace WHERE namespace_id = $1"#)
            .bind(view.namespace_id)
            .fetch_one(&mut *conn)
            .await?;
    let (template_path,): (String,) =
        sqlx::query_as(r#"SELECT path FROM gerrydb.view_template WHERE template_id = $1"#)
            .bind(view.template_id)
            .fetch_one(&mut *conn)
            .await?;
    let (layer_path,): (String,) =
        sqlx::query_as(r#"SELECT path FROM gerrydb.geo_layer WHERE layer_id = $1"#)
            .bind(view.layer_id)
            .fetch_one(&mut *conn)
            .await?;
    let (locality_path, default_proj): (String, Option<String>) = sqlx::query_as(
        r#"
        SELECT r.path, l.default_proj
        FROM gerrydb.locality AS l
        JOIN gerrydb.locality_ref AS r ON r.ref_id = l.canonical_ref_id
        WHERE l.loc_id = $1
        "#,
    )
    .bind(view.loc_id)
    .fetch_one(&mut *conn)
    .await?;
    let view_obj_meta: ObjectMeta =
        sqlx::query_as(r#"SELECT * FROM gerrydb.meta WHERE meta_id = $1"#)
            .bind(view.meta_id)
            .fetch_one(&mut *conn)
            .await?;

    let target_proj = view.proj.clone().or(default_proj);
    let view_meta = ViewMetaDoc {
        path: view.path.clone(),
        namespace: namespace_path,
        template: template_path,
        locality: locality_path,
        layer: layer_path,
        valid_at: view.at,
        proj: view.proj.clone(),
        graph: graph_path,
        num_geos: view.num_geos,
        meta: view_obj_meta,
    };

    Ok(ViewRenderContext {
        view,
        columns,
        view_meta,
        target_proj,
        plan_labels,
        plan_assignments,
        graph_edges,
        graph_node_areas,
        geo_meta,
        geo_meta_ids,
        geo_valid_from,
        geo_query,
        internal_point_query: ip_query,
    })
}

fn sq(err: rusqlite::Error) -> Error {
    Error::Render(format!("GeoPackage error: {err}"))
}

fn register_extensions(
    conn: &rusqlite::Connection,
    entries: &[(&str, &str)],
) -> std::result::Result<(), rusqlite::Error> {
    for (table, definition) in entries {
        conn.execute(
            "INSERT INTO gpkg_extensions \
             (table_name, column_name, extension_name, definition, scope) \
             VALUES (?1, NULL, ?2, ?3, 'read-write')",
            rusqlite::params![table, GPKG_EXTENSION_NAME, definition],
        )?;
    }
    Ok(())
}

fn inject_sidecars_inner(
    conn: &rusqlite::Connection,
    ctx: &ViewRenderContext,
) -> std::result::Result<(), rusqlite::Error> {
    let layer_name = quote_ident(&ctx.view.path);

    // The export may or may not carry a gpkg_extensions table already.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS gpkg_extensions (
            table_name     TEXT,
            column_name    TEXT,
            extension_name TEXT NOT NULL,
            definition     TEXT NOT NULL,
            scope          TEXT NOT NULL,
            CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS gpkg_data_columns (
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            name TEXT,
            title TEXT,
            description TEXT,
            mime_type TEXT,
            constraint_name TEXT,
            CONSTRAINT pk_gdc PRIMARY KEY (table_name, column_name),
            CONSTRAINT gdc_tn UNIQUE (table_name, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE gerrydb_view_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE gerrydb_geo_meta (meta_id INTEGER PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    conn.execute(
        &format!(
            "CREATE TABLE gerrydb_geo_meta_xref (
                path    TEXT PRIMARY KEY REFERENCES {layer_name}(path),
                meta_id INTEGER NOT NULL REFERENCES gerrydb_geo_meta(meta_id)
            )"
        ),
        [],
    )?;
    register_extensions(
        conn,
        &[
            (
                "gerrydb_view_meta",
                "JSON-formatted metadata for the view's tabular, geographic, and graph data.",
            ),
            (
                "gerrydb_geo_meta",
                "JSON-formatted metadata for the view's geographies.",
            ),
            (
                "gerrydb_geo_meta_xref",
                "Mapping between geographies and metadata objects.",
            ),
        ],
    )?;

    // View metadata as a JSON key-value table.
    let meta_doc = serde_json::to_value(&ctx.view_meta).unwrap_or_default();
    if let serde_json::Value::Object(fields) = meta_doc {
        for (key, value) in fields {
            conn.execute(
                "INSERT INTO gerrydb_view_meta (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value.to_string()],
            )?;
        }
    }
    for col in &ctx.columns {
        conn.execute(
            "INSERT INTO gpkg_data_columns (table_name, column_name, description) \
             VALUES (?1, ?2, ?3)",
            rusqlite::params![ctx.view.path, col.alias, col.description],
        )?;
    }

    // Geography metadata, normalized 1:N through the xref table.
    let mut gpkg_meta_ids: HashMap<i32, i64> = HashMap::new();
    for (db_meta_id, meta) in &ctx.geo_meta {
        let value = serde_json::to_string(meta).unwrap_or_default();
        conn.execute(
            "INSERT INTO gerrydb_geo_meta (value) VALUES (?1)",
            rusqlite::params![value],
        )?;
        gpkg_meta_ids.insert(*db_meta_id, conn.last_insert_rowid());
    }
    for (path, db_meta_id) in &ctx.geo_meta_ids {
        conn.execute(
            "INSERT INTO gerrydb_geo_meta_xref (path, meta_id) VALUES (?1, ?2)",
            rusqlite::params![path, gpkg_meta_ids[db_meta_id]],
        )?;
    }

    if let Some(edges) = &ctx.graph_edges {
        conn.execute(
            &format!(
                "CREATE TABLE gerrydb_graph_edge (
                    path_1  TEXT NOT NULL REFERENCES {layer_name}(path),
                    path_2  TEXT NOT NULL REFERENCES {layer_name}(path),
                    weights TEXT,
                    CONSTRAINT unique_edges UNIQUE (path_1, path_2)
                )"
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE TABLE gerrydb_graph_node_area (
                    path TEXT PRIMARY KEY REFERENCES {layer_name}(path),
                    area REAL NOT NULL
                )"
            ),
            [],
        )?;
        register_extensions(
            conn,
            &[
                (
                    "gerrydb_graph_edge",
                    "Edges of a dual graph (adjacency graph) of the view's geographies.",
                ),
                (
                    "gerrydb_graph_node_area",
                    "Node areas of a dual graph (adjacency graph) of the view's geographies.",
                ),
            ],
        )?;
        for (path_1, path_2, weights) in edges {
            let weights = weights.as_ref().map(|value| value.to_string());
            conn.execute(
                "INSERT INTO gerrydb_graph_edge (path_1, path_2, weights) VALUES (?1, ?2, ?3)",
                rusqlite::params![path_1, path_2, weights],
            )?;
        }
        if let Some(areas) = &ctx.graph_node_areas {
            for (path, area) in areas {
                conn.execute(
                    "INSERT INTO gerrydb_graph_node_area (path, area) VALUES (?1, ?2)",
                    rusqlite::params![path, area],
                )?;
            }
        }
    }

    if !ctx.plan_labels.is_empty() {
        let label_columns = ctx
            .plan_labels
            .iter()
            .map(|label| format!("{} TEXT", quote_ident(label)))
            .collect::<Vec<_>>()
            .join(",\n");
        conn.execute(
            &format!(
                "CREATE TABLE gerrydb_plan_assignment (
                    path TEXT PRIMARY KEY REFERENCES {layer_name}(path),
                    {label_columns}
                )"
            ),
            [],
        )?;
        register_extensions(
            conn,
            &[(
                "gerrydb_plan_assignment",
                "District assignments by geography for districting plans associated with the view.",
            )],
        )?;

        let placeholders = (1..=ctx.plan_labels.len() + 1)
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        let columns = std::iter::once("path".to_string())
            .chain(ctx.plan_labels.iter().map(|label| quote_ident(label)))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql =
            format!("INSERT INTO gerrydb_plan_assignment ({columns}) VALUES ({placeholders})");
        let mut stmt = conn.prepare(&insert_sql)?;
        for row in &ctx.plan_assignments {
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&row.path];
            for assignment in &row.assignments {
                params.push(assignment);
            }
            stmt.execute(params.as_slice())?;
        }
    }

    Ok(())
}

/// Injects the GerryDB sidecar tables into a rendered GeoPackage and
/// registers them in `gpkg_extensions`.
pub fn inject_sidecars(gpkg_path: &Path, ctx: &ViewRenderContext) -> Result<()> {
    let conn = rusqlite::Connection::open(gpkg_path).map_err(sq)?;
    inject_sidecars_inner(&conn, ctx).map_err(sq)
}

fn layer_row_count(
    conn: &rusqlite::Connection,
    layer_name: &str,
) -> std::result::Result<i64, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(layer_name)),
        [],
        |row| row.get(0),
    )
}

async fn run_extractor(args: &[String], query_for_log: &str) -> Result<()> {
    let output = Command::new("ogr2ogr")
        .args(args)
        .output()
        .await
        .map_err(|err| Error::Render(format!("failed to invoke ogr2ogr: {err}")))?;
    if !output.status.success() {
        // Watch out for leaking credentials via logging here.
        error!("ogr2ogr export failed. Query: {query_for_log}");
        return Err(Error::Render(
            "bulk geography export failed".to_string(),
        ));
    }
    Ok(())
}

/// A completed render: the GeoPackage path plus the directory guard keeping
/// it alive.
#[derive(Debug)]
pub struct RenderedView {
    pub render_id: Uuid,
    pub path: PathBuf,
    pub dir: TempDir,
}

/// Renders a view to a GeoPackage: drives `ogr2ogr` for the geography and
/// internal-point layers, validates row counts against the view's checksum,
/// then injects the sidecar tables.
pub async fn render_view(ctx: &ViewRenderContext, db_url: &str) -> Result<RenderedView> {
    let render_id = Uuid::new_v4();
    let dir = TempDir::new()
        .map_err(|err| Error::Render(format!("failed to stage render output: {err}")))?;
    let gpkg_path = dir.path().join(format!("{}.gpkg", render_id.simple()));

    let geo_layer_name = ctx.view.path.clone();
    let internal_point_layer_name = format!("{geo_layer_name}__internal_points");

    let mut base_args: Vec<String> = vec![
        "-f".to_string(),
        "GPKG".to_string(),
        gpkg_path.display().to_string(),
        format!("PG:{db_url}"),
    ];
    if let Some(proj) = &ctx.target_proj {
        base_args.push("-t_srs".to_string());
        base_args.push(proj.clone());
    }

    let mut geo_args = base_args.clone();
    geo_args.extend([
        "-sql".to_string(),
        ctx.geo_query.clone(),
        "-nln".to_string(),
        geo_layer_name.clone(),
    ]);
    run_extractor(&geo_args, &ctx.geo_query).await?;

    let mut point_args = base_args;
    point_args.extend([
        "-update".to_string(),
        "-sql".to_string(),
        ctx.internal_point_query.clone(),
        "-nln".to_string(),
        internal_point_layer_name.clone(),
        "-nlt".to_string(),
        "POINT".to_string(),
    ]);
    run_extractor(&point_args, &ctx.internal_point_query).await?;

    {
        let conn = rusqlite::Connection::open(&gpkg_path).map_err(sq)?;
        let geo_rows = layer_row_count(&conn, &geo_layer_name).map_err(|_| {
            Error::Render("geographic layer not found in GeoPackage".to_string())
        })?;
        if geo_rows != ctx.view.num_geos as i64 {
            return Err(Error::Render(format!(
                "expected {} geographies in layer, got {geo_rows}",
                ctx.view.num_geos
            )));
        }
        let point_rows = layer_row_count(&conn, &internal_point_layer_name).map_err(|_| {
            Error::Render("internal point layer not found in GeoPackage".to_string())
        })?;
        if point_rows != ctx.view.num_geos as i64 {
            return Err(Error::Render(format!(
                "expected {} points in layer, got {point_rows}",
                ctx.view.num_geos
            )));
        }
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX idx_geo_path ON {}(path)",
                quote_ident(&geo_layer_name)
            ),
            [],
        )
        .map_err(sq)?;
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX idx_internal_point_path ON {}(path)",
                quote_ident(&internal_point_layer_name)
            ),
            [],
        )
        .map_err(sq)?;
        inject_sidecars_inner(&conn, ctx).map_err(sq)?;
    }

    Ok(RenderedView {
        render_id,
        path: gpkg_path,
        dir,
    })
}

/// Records render metadata.
pub async fn create_render(
    conn: &mut PgConnection,
    view: &View,
    created_by: i32,
    render_id: Uuid,
    path: &str,
    status: ViewRenderStatus,
) -> Result<ViewRender> {
    let render = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.view_render (render_id, view_id, created_by, path, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(render_id)
    .bind(view.view_id)
    .bind(created_by)
    .bind(path)
    .bind(status)
    .fetch_one(&mut *conn)
    .await?;
    Ok(render)
}

/// Saves metadata for a successful render so later requests can reuse it.
pub async fn cache_render(
    conn: &mut PgConnection,
    view: &View,
    created_by: i32,
    render_id: Uuid,
    path: &str,
) -> Result<ViewRender> {
    create_render(conn, view, created_by, render_id, path, ViewRenderStatus::Succeeded).await
}

/// The most recent successful render of a view, if any.
pub async fn get_cached_render(
    conn: &mut PgConnection,
    view: &View,
) -> Result<Option<ViewRender>> {
    let render = sqlx::query_as(
        r#"
        SELECT * FROM gerrydb.view_render
        WHERE view_id = $1 AND status = 'succeeded'
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(view.view_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(render)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnType;

    fn column(col_id: i32, alias: &str, col_type: ColumnType) -> ViewColumn {
        ViewColumn {
            col_id,
            path: alias.to_string(),
            namespace: "census".to_string(),
            alias: alias.to_string(),
            col_type,
            description: None,
        }
    }

    #[test]
    fn geography_query_pivots_each_column_by_type() {
        let at = Utc::now();
        let query = geography_query(
            at,
            &[3, 9],
            &[
                column(1, "pop", ColumnType::Int),
                column(2, "density", ColumnType::Float),
            ],
        );
        assert!(query.contains("set_version_id IN (3, 9)"));
        assert!(query.contains("max(cv.val_int) FILTER (WHERE cv.col_id = 1) AS \"pop\""));
        assert!(query.contains("max(cv.val_float) FILTER (WHERE cv.col_id = 2) AS \"density\""));
        assert!(query.contains("cv.col_id IN (1, 2)"));
        assert!(query.contains("gerrydb.geo_bin"));
        assert!(query.contains("valid_to IS NULL OR gv.valid_to >"));
    }

    #[test]
    fn geography_query_without_columns_skips_pivot() {
        let query = geography_query(Utc::now(), &[1], &[]);
        assert!(!query.contains("LEFT JOIN"));
        assert!(query.contains("bin.geography"));
    }

    #[test]
    fn internal_point_query_projects_point_column() {
        let query = internal_point_query(Utc::now(), &[4]);
        assert!(query.contains("bin.internal_point"));
        assert!(query.contains("set_version_id IN (4)"));
    }

    #[test]
    fn timestamp_literal_is_quoted_and_cast() {
        let at = Utc::now();
        let literal = timestamp_literal(at);
        assert!(literal.starts_with('\''));
        assert!(literal.ends_with("::timestamptz"));
    }
}
