use clap::Parser;
use log::info;

use gerrydb_meta::auth::{self, Role, grant_scopes};
use gerrydb_meta::db;

/// Initialize a GerryDB database: apply the schema and optionally bootstrap
/// the first admin user with an API key.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Email for the bootstrap admin user (skipped if omitted)
    #[arg(long, requires = "name")]
    email: Option<String>,

    /// Display name for the bootstrap admin user
    #[arg(long, requires = "email")]
    name: Option<String>,

    /// Maximum number of database connections in the pool
    #[arg(long, default_value_t = 4)]
    max_connections: u32,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::create_pool(&db_url, args.max_connections, 1)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&pool).await.expect("Failed to run migrations");

    let (Some(email), Some(name)) = (args.email, args.name) else {
        info!("Schema initialized; no bootstrap user requested");
        return;
    };

    let mut tx = pool.begin().await.expect("Failed to open transaction");
    if auth::get_user_by_email(&mut *tx, &email)
        .await
        .expect("Failed to look up user")
        .is_some()
    {
        eprintln!("User {email} already exists; refusing to bootstrap");
        std::process::exit(1);
    }

    let user = auth::create_user(&mut *tx, &email, &name)
        .await
        .expect("Failed to create user");

    // The bootstrap user administers everything; the grants need a ledger
    // entry of their own.
    let meta: gerrydb_meta::models::ObjectMeta = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.meta (uuid, notes, created_by)
        VALUES ($1, 'Used for authorization configuration only.', $2)
        RETURNING *
        "#,
    )
    .bind(uuid::Uuid::new_v4())
    .bind(user.user_id)
    .fetch_one(&mut *tx)
    .await
    .expect("Failed to create bootstrap metadata");

    grant_scopes(&mut *tx, user.user_id, &Role::Admin.grants(), meta.meta_id)
        .await
        .expect("Failed to grant admin scopes");

    let raw_key = auth::create_api_key(&mut *tx, &user)
        .await
        .expect("Failed to create API key");

    tx.commit().await.expect("Failed to commit bootstrap");
    info!("Bootstrapped admin user {}", email);
    println!("New API key for {email}: {raw_key}");
}
