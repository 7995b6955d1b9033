use std::collections::HashSet;

use log::debug;
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::ScopeManager;
use crate::error::{Error, Result};
use crate::etag::{self, collections};
use crate::layer;
use crate::models::{GeoSetVersion, Geography, Namespace, ObjectMeta, Plan};
use crate::paths;

/// Default number of plans per (namespace, layer, locality).
pub const DEFAULT_PLAN_QUOTA: i32 = 50;

#[derive(Debug, Clone)]
pub struct PlanCreate {
    pub path: String,
    pub description: String,
    pub source_url: Option<String>,
    pub districtr_id: Option<String>,
    pub daves_id: Option<String>,
}

pub async fn get(
    conn: &mut PgConnection,
    namespace: &Namespace,
    path: &str,
) -> Result<Option<Plan>> {
    let normalized = paths::normalize(path)?;
    let plan = sqlx::query_as(
        r#"SELECT * FROM gerrydb.plan WHERE namespace_id = $1 AND path = $2"#,
    )
    .bind(namespace.namespace_id)
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(plan)
}

pub async fn all_in_namespace(conn: &mut PgConnection, namespace: &Namespace) -> Result<Vec<Plan>> {
    let plans = sqlx::query_as(
        r#"SELECT * FROM gerrydb.plan WHERE namespace_id = $1 ORDER BY path"#,
    )
    .bind(namespace.namespace_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(plans)
}

/// Assignments of a plan as (geo_id, district label) pairs.
pub async fn assignments(conn: &mut PgConnection, plan_id: i32) -> Result<Vec<(i32, String)>> {
    let rows = sqlx::query_as(
        r#"SELECT geo_id, assignment FROM gerrydb.plan_assignment WHERE plan_id = $1"#,
    )
    .bind(plan_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Derives the district count and completeness of an assignment over a set.
pub fn summarize_assignments(
    assignments: &[(Geography, String)],
    set_size: usize,
) -> (i32, bool) {
    let distinct: HashSet<&str> = assignments
        .iter()
        .map(|(_, label)| label.as_str())
        .collect();
    (distinct.len() as i32, assignments.len() == set_size)
}

/// Creates a districting plan over a geo set version.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    namespace: &Namespace,
    obj_in: PlanCreate,
    geo_set_version: &GeoSetVersion,
    plan_assignments: &[(Geography, String)],
) -> Result<(Plan, Uuid)> {
    scopes.require_write_derived_in_namespace(namespace)?;
    let canonical_path = paths::normalize(&obj_in.path)?;

    // Per-(namespace, layer, locality) quota; the row is created lazily.
    let limit: Option<(i32,)> = sqlx::query_as(
        r#"
        SELECT max_plans FROM gerrydb.plan_limit
        WHERE namespace_id = $1 AND layer_id = $2 AND loc_id = $3
        "#,
    )
    .bind(namespace.namespace_id)
    .bind(geo_set_version.layer_id)
    .bind(geo_set_version.loc_id)
    .fetch_optional(&mut **tx)
    .await?;
    let max_plans = match limit {
        Some((max_plans,)) => max_plans,
        None => {
            sqlx::query(
                r#"
                INSERT INTO gerrydb.plan_limit (namespace_id, layer_id, loc_id, max_plans)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(namespace.namespace_id)
            .bind(geo_set_version.layer_id)
            .bind(geo_set_version.loc_id)
            .bind(DEFAULT_PLAN_QUOTA)
            .execute(&mut **tx)
            .await?;
            DEFAULT_PLAN_QUOTA
        }
    };

    let (current_count,): (i64,) = sqlx::query_as(
        r#"
        SELECT count(*) FROM gerrydb.plan AS p
        JOIN gerrydb.geo_set_version AS sv ON sv.set_version_id = p.set_version_id
        WHERE p.namespace_id = $1 AND sv.layer_id = $2 AND sv.loc_id = $3
        "#,
    )
    .bind(namespace.namespace_id)
    .bind(geo_set_version.layer_id)
    .bind(geo_set_version.loc_id)
    .fetch_one(&mut **tx)
    .await?;
    debug!(
        "Found {} plans in namespace {} for set version {}",
        current_count, namespace.path, geo_set_version.set_version_id
    );
    if current_count >= max_plans as i64 {
        return Err(Error::CreateValue(format!(
            "the maximum number of plans ({max_plans}) has already been reached for this \
             locality and layer"
        )));
    }

    let set_geo_ids: HashSet<i32> = layer::set_members(&mut **tx, geo_set_version.set_version_id)
        .await?
        .into_iter()
        .collect();
    let not_in_set: Vec<String> = plan_assignments
        .iter()
        .filter(|(geo, _)| !set_geo_ids.contains(&geo.geo_id))
        .map(|(geo, _)| geo.path.clone())
        .collect();
    if !not_in_set.is_empty() {
        return Err(Error::CreateValue(format!(
            "some geographies in the assignment are not in the set defined by the \
             locality and geographic layer: {}",
            not_in_set.join(", ")
        )));
    }

    let (num_districts, complete) = summarize_assignments(plan_assignments, set_geo_ids.len());

    let plan: Plan = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.plan
            (namespace_id, path, set_version_id, num_districts, complete,
             description, source_url, districtr_id, daves_id, meta_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(namespace.namespace_id)
    .bind(&canonical_path)
    .bind(geo_set_version.set_version_id)
    .bind(num_districts)
    .bind(complete)
    .bind(&obj_in.description)
    .bind(&obj_in.source_url)
    .bind(&obj_in.districtr_id)
    .bind(&obj_in.daves_id)
    .bind(obj_meta.meta_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|_| {
        Error::CreateValue(format!(
            "failed to create districting plan '{canonical_path}' (the path may already exist)"
        ))
    })?;

    for (geo, label) in plan_assignments {
        sqlx::query(
            r#"INSERT INTO gerrydb.plan_assignment (plan_id, geo_id, assignment) VALUES ($1, $2, $3)"#,
        )
        .bind(plan.plan_id)
        .bind(geo.geo_id)
        .bind(label)
        .execute(&mut **tx)
        .await?;
    }

    let etag = etag::bump(&mut **tx, collections::PLANS, Some(namespace.namespace_id)).await?;
    Ok((plan, etag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo(id: i32, path: &str) -> Geography {
        Geography {
            geo_id: id,
            path: path.to_string(),
            namespace_id: 1,
            meta_id: 1,
        }
    }

    #[test]
    fn complete_plan_counts_distinct_districts() {
        let assignments = vec![
            (geo(1, "c"), "1".to_string()),
            (geo(2, "w"), "2".to_string()),
        ];
        assert_eq!(summarize_assignments(&assignments, 2), (2, true));
    }

    #[test]
    fn partial_assignment_is_incomplete() {
        let assignments = vec![(geo(1, "c"), "1".to_string())];
        assert_eq!(summarize_assignments(&assignments, 2), (1, false));
    }

    #[test]
    fn repeated_labels_collapse() {
        let assignments = vec![
            (geo(1, "a"), "1".to_string()),
            (geo(2, "b"), "1".to_string()),
            (geo(3, "c"), "2".to_string()),
        ];
        assert_eq!(summarize_assignments(&assignments, 3), (2, true));
    }
}
