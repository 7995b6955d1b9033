use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::Result;

/// Collection names used as ETag keys. These match the backing table names.
pub mod collections {
    pub const NAMESPACES: &str = "namespace";
    pub const LOCALITIES: &str = "locality";
    pub const GEOGRAPHIES: &str = "geography";
    pub const GEO_IMPORTS: &str = "geo_import";
    pub const GEO_LAYERS: &str = "geo_layer";
    pub const COLUMNS: &str = "column";
    pub const COLUMN_SETS: &str = "column_set";
    pub const PLANS: &str = "plan";
    pub const GRAPHS: &str = "graph";
    pub const VIEW_TEMPLATES: &str = "view_template";
    pub const VIEWS: &str = "view";
}

/// Rewrites the (collection, namespace) ETag with a fresh UUID. Called from
/// every write path; serialization happens at the row level.
pub async fn bump(
    conn: &mut PgConnection,
    collection: &str,
    namespace_id: Option<i32>,
) -> Result<Uuid> {
    let new_etag = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO gerrydb.etag (table_name, namespace_id, etag)
        VALUES ($1, $2, $3)
        ON CONFLICT (table_name, namespace_id) DO UPDATE SET etag = EXCLUDED.etag
        "#,
    )
    .bind(collection)
    .bind(namespace_id)
    .bind(new_etag)
    .execute(&mut *conn)
    .await?;
    Ok(new_etag)
}

/// Latest ETag for a collection, if any mutation has ever touched it.
pub async fn get(pool: &PgPool, collection: &str, namespace_id: Option<i32>) -> Result<Option<Uuid>> {
    let etag: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT etag FROM gerrydb.etag
        WHERE table_name = $1 AND namespace_id IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(collection)
    .bind(namespace_id)
    .fetch_optional(pool)
    .await?;
    Ok(etag.map(|(etag,)| etag))
}
