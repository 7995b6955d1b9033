//! Sidecar injection against a synthetic GeoPackage: the extension tables
//! must land next to the rendered layer and register themselves in
//! `gpkg_extensions`.

use std::collections::BTreeMap;

use chrono::Utc;
use gerrydb_meta::models::{ColumnType, ObjectMeta, View};
use gerrydb_meta::render::{
    GPKG_EXTENSION_NAME, PlanAssignmentRow, ViewMetaDoc, ViewRenderContext, inject_sidecars,
};
use gerrydb_meta::view::ViewColumn;
use uuid::Uuid;

fn object_meta(meta_id: i32) -> ObjectMeta {
    ObjectMeta {
        meta_id,
        uuid: Uuid::new_v4(),
        notes: Some("test fixture".to_string()),
        created_at: Utc::now(),
        created_by: 1,
    }
}

fn fixture_context() -> ViewRenderContext {
    let now = Utc::now();
    let view = View {
        view_id: 1,
        namespace_id: 1,
        path: "atlantis_blocks".to_string(),
        template_id: 1,
        template_version_id: 1,
        loc_id: 1,
        layer_id: 1,
        set_version_id: 1,
        at: now,
        proj: None,
        meta_id: 10,
        graph_id: Some(1),
        num_geos: 2,
    };
    let view_meta = ViewMetaDoc {
        path: view.path.clone(),
        namespace: "atlantis".to_string(),
        template: "pops".to_string(),
        locality: "atlantis".to_string(),
        layer: "blocks".to_string(),
        valid_at: now,
        proj: None,
        graph: Some("dual".to_string()),
        num_geos: 2,
        meta: object_meta(10),
    };

    let mut geo_meta = BTreeMap::new();
    geo_meta.insert(20, object_meta(20));
    let mut geo_meta_ids = BTreeMap::new();
    geo_meta_ids.insert("block/a".to_string(), 20);
    geo_meta_ids.insert("block/b".to_string(), 20);
    let mut geo_valid_from = BTreeMap::new();
    geo_valid_from.insert("block/a".to_string(), now);
    geo_valid_from.insert("block/b".to_string(), now);

    ViewRenderContext {
        view,
        columns: vec![ViewColumn {
            col_id: 1,
            path: "pop".to_string(),
            namespace: "atlantis".to_string(),
            alias: "pop".to_string(),
            col_type: ColumnType::Int,
            description: Some("Total population".to_string()),
        }],
        view_meta,
        target_proj: None,
        plan_labels: vec!["plan_a".to_string()],
        plan_assignments: vec![
            PlanAssignmentRow {
                path: "block/a".to_string(),
                assignments: vec![Some("1".to_string())],
            },
            PlanAssignmentRow {
                path: "block/b".to_string(),
                assignments: vec![None],
            },
        ],
        graph_edges: Some(vec![(
            "block/a".to_string(),
            "block/b".to_string(),
            Some(serde_json::json!({"shared_perim": 1.5})),
        )]),
        graph_node_areas: Some(vec![
            ("block/a".to_string(), 10.0),
            ("block/b".to_string(), 12.5),
        ]),
        geo_meta,
        geo_meta_ids,
        geo_valid_from,
        geo_query: String::new(),
        internal_point_query: String::new(),
    }
}

fn synthetic_gpkg(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("render.gpkg");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        "CREATE TABLE \"atlantis_blocks\" (path TEXT PRIMARY KEY, geom BLOB)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO \"atlantis_blocks\" (path) VALUES ('block/a'), ('block/b')",
        [],
    )
    .unwrap();
    path
}

#[test]
fn sidecars_are_created_and_registered() {
    let dir = tempfile::TempDir::new().unwrap();
    let gpkg = synthetic_gpkg(&dir);
    let ctx = fixture_context();

    inject_sidecars(&gpkg, &ctx).unwrap();

    let conn = rusqlite::Connection::open(&gpkg).unwrap();

    let registered: Vec<(String, String)> = conn
        .prepare("SELECT table_name, scope FROM gpkg_extensions WHERE extension_name = ?1")
        .unwrap()
        .query_map([GPKG_EXTENSION_NAME], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let tables: Vec<&str> = registered.iter().map(|(table, _)| table.as_str()).collect();
    for expected in [
        "gerrydb_view_meta",
        "gerrydb_geo_meta",
        "gerrydb_geo_meta_xref",
        "gerrydb_graph_edge",
        "gerrydb_graph_node_area",
        "gerrydb_plan_assignment",
    ] {
        assert!(tables.contains(&expected), "missing extension row for {expected}");
    }
    assert!(registered.iter().all(|(_, scope)| scope == "read-write"));

    let meta_keys: i64 = conn
        .query_row("SELECT COUNT(*) FROM gerrydb_view_meta", [], |row| row.get(0))
        .unwrap();
    assert!(meta_keys > 0);

    let xrefs: i64 = conn
        .query_row("SELECT COUNT(*) FROM gerrydb_geo_meta_xref", [], |row| row.get(0))
        .unwrap();
    assert_eq!(xrefs, 2);

    let (path_1, path_2, weights): (String, String, Option<String>) = conn
        .query_row(
            "SELECT path_1, path_2, weights FROM gerrydb_graph_edge",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!((path_1.as_str(), path_2.as_str()), ("block/a", "block/b"));
    assert!(weights.unwrap().contains("shared_perim"));

    let areas: i64 = conn
        .query_row("SELECT COUNT(*) FROM gerrydb_graph_node_area", [], |row| row.get(0))
        .unwrap();
    assert_eq!(areas, 2);

    let assignment: Option<String> = conn
        .query_row(
            "SELECT \"plan_a\" FROM gerrydb_plan_assignment WHERE path = 'block/a'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(assignment.as_deref(), Some("1"));
    let unassigned: Option<String> = conn
        .query_row(
            "SELECT \"plan_a\" FROM gerrydb_plan_assignment WHERE path = 'block/b'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(unassigned, None);

    let description: String = conn
        .query_row(
            "SELECT description FROM gpkg_data_columns WHERE table_name = 'atlantis_blocks' \
             AND column_name = 'pop'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(description, "Total population");
}

#[test]
fn injection_without_graph_or_plans_creates_base_tables_only() {
    let dir = tempfile::TempDir::new().unwrap();
    let gpkg = synthetic_gpkg(&dir);
    let mut ctx = fixture_context();
    ctx.graph_edges = None;
    ctx.graph_node_areas = None;
    ctx.plan_labels.clear();
    ctx.plan_assignments.clear();

    inject_sidecars(&gpkg, &ctx).unwrap();

    let conn = rusqlite::Connection::open(&gpkg).unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM gpkg_extensions WHERE extension_name = ?1",
            [GPKG_EXTENSION_NAME],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 3);

    let edge_table: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'gerrydb_graph_edge'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(edge_table, 0);
}
