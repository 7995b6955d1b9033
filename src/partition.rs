use log::debug;
use sqlx::PgConnection;

use crate::error::Result;

// column_value is list-partitioned twice: by col_id at the top level and by
// geo_id inside each per-column partition. Both levels use idempotent DDL so
// the kernel can re-assert partitions on every write path. Pruning the
// resulting tables is an operational concern, not the kernel's.

/// DDL for the per-column partition (itself partitioned by geo id).
pub fn column_partition_ddl(col_id: i32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS gerrydb.gerrydb_column_value_col_{col_id} \
         PARTITION OF gerrydb.column_value FOR VALUES IN ({col_id}) \
         PARTITION BY LIST (geo_id)"
    )
}

/// DDL for the nested per-geography partition under one column partition.
pub fn geography_partition_ddl(col_id: i32, geo_id: i32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS gerrydb.gerrydb_column_value_col_{col_id}_geo_{geo_id} \
         PARTITION OF gerrydb.gerrydb_column_value_col_{col_id} FOR VALUES IN ({geo_id})"
    )
}

/// Ensures the per-column partition exists.
pub async fn ensure_column_partition(conn: &mut PgConnection, col_id: i32) -> Result<()> {
    sqlx::query(&column_partition_ddl(col_id))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Ensures nested (column, geography) leaf partitions exist for every listed
/// geography under one column partition.
pub async fn ensure_geography_partitions(
    conn: &mut PgConnection,
    col_id: i32,
    geo_ids: &[i32],
) -> Result<()> {
    for &geo_id in geo_ids {
        sqlx::query(&geography_partition_ddl(col_id, geo_id))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Asserts the full partition tree for a freshly created column: the
/// per-column partition plus nested leaves for every geography already in
/// the column's namespace.
pub async fn ensure_partitions_for_new_column(
    conn: &mut PgConnection,
    col_id: i32,
    namespace_id: i32,
) -> Result<()> {
    ensure_column_partition(conn, col_id).await?;
    let geo_ids: Vec<(i32,)> =
        sqlx::query_as(r#"SELECT geo_id FROM gerrydb.geography WHERE namespace_id = $1"#)
            .bind(namespace_id)
            .fetch_all(&mut *conn)
            .await?;
    let geo_ids: Vec<i32> = geo_ids.into_iter().map(|(geo_id,)| geo_id).collect();
    ensure_geography_partitions(conn, col_id, &geo_ids).await
}

/// Asserts nested partitions for new geographies under every existing column
/// partition. Called after bulk geography creation.
pub async fn ensure_partitions_for_new_geographies(
    conn: &mut PgConnection,
    namespace_id: i32,
    geo_ids: &[i32],
) -> Result<()> {
    let col_ids: Vec<(i32,)> =
        sqlx::query_as(r#"SELECT col_id FROM gerrydb."column" WHERE namespace_id = $1"#)
            .bind(namespace_id)
            .fetch_all(&mut *conn)
            .await?;
    debug!(
        "ensuring column_value partitions for {} geographies under {} columns",
        geo_ids.len(),
        col_ids.len()
    );
    for (col_id,) in col_ids {
        ensure_geography_partitions(conn, col_id, geo_ids).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_partition_ddl_is_idempotent_and_named_by_col() {
        let ddl = column_partition_ddl(7);
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS"));
        assert!(ddl.contains("gerrydb.gerrydb_column_value_col_7"));
        assert!(ddl.contains("FOR VALUES IN (7)"));
        assert!(ddl.contains("PARTITION BY LIST (geo_id)"));
    }

    #[test]
    fn geography_partition_ddl_nests_under_column_partition() {
        let ddl = geography_partition_ddl(7, 42);
        assert!(ddl.contains("gerrydb.gerrydb_column_value_col_7_geo_42"));
        assert!(ddl.contains("PARTITION OF gerrydb.gerrydb_column_value_col_7"));
        assert!(ddl.contains("FOR VALUES IN (42)"));
    }
}
