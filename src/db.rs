use log::info;
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::error::{Error, Result};

/// Create a connection pool. The search path is pinned to the `gerrydb`
/// schema on every connection so the custom enum types resolve.
pub async fn create_pool(
    db_url: &str,
    max_connections: u32,
    min_connections: u32,
) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET search_path = gerrydb, public")
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(db_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| Error::CreateValue(format!("migration failed: {err}")))?;
    info!("Migrations complete");
    Ok(())
}
