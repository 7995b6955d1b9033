use log::info;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::{ScopeGrant, ScopeManager, grant_scopes};
use crate::error::{Error, Result};
use crate::etag::{self, collections};
use crate::models::{Namespace, ObjectMeta, ScopeType};
use crate::paths;

/// Default number of namespaces one non-admin user may create.
pub const DEFAULT_NAMESPACE_QUOTA: i32 = 10;

pub async fn get(conn: &mut PgConnection, path: &str) -> Result<Option<Namespace>> {
    let normalized = paths::normalize(path)?;
    let namespace = sqlx::query_as(r#"SELECT * FROM gerrydb.namespace WHERE path = $1"#)
        .bind(&normalized)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(namespace)
}

/// Resolves a namespace for reading. Missing and unreadable namespaces are
/// indistinguishable.
pub async fn get_for_read(
    conn: &mut PgConnection,
    scopes: &ScopeManager,
    path: &str,
) -> Result<Namespace> {
    match get(conn, path).await? {
        Some(namespace) => {
            scopes.require_read_in_namespace(&namespace)?;
            Ok(namespace)
        }
        None => Err(Error::not_found(
            "namespace not found, or you do not have sufficient permissions \
             to read in this namespace",
        )),
    }
}

/// Resolves a namespace for writing; same leak-proof failure mode as reads.
pub async fn get_for_write(
    conn: &mut PgConnection,
    scopes: &ScopeManager,
    path: &str,
) -> Result<Namespace> {
    match get(conn, path).await? {
        Some(namespace) => {
            scopes.require_write_in_namespace(&namespace)?;
            Ok(namespace)
        }
        None => Err(Error::not_found(
            "namespace not found, or you do not have sufficient permissions \
             to write in this namespace",
        )),
    }
}

pub async fn get_for_write_derived(
    conn: &mut PgConnection,
    scopes: &ScopeManager,
    path: &str,
) -> Result<Namespace> {
    match get(conn, path).await? {
        Some(namespace) => {
            scopes.require_write_derived_in_namespace(&namespace)?;
            Ok(namespace)
        }
        None => Err(Error::not_found(
            "namespace not found, or you do not have sufficient permissions \
             to write derived objects in this namespace",
        )),
    }
}

/// All namespaces the user may read.
pub async fn list(pool: &PgPool, scopes: &ScopeManager) -> Result<Vec<Namespace>> {
    let all: Vec<Namespace> = sqlx::query_as(r#"SELECT * FROM gerrydb.namespace ORDER BY path"#)
        .fetch_all(pool)
        .await?;
    Ok(all
        .into_iter()
        .filter(|namespace| scopes.can_read_in_namespace(namespace))
        .collect())
}

/// Creates a namespace, enforcing the per-user creation quota. The creator
/// is auto-granted namespace-level scopes unless broader grants already
/// cover the new namespace.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    scopes: &ScopeManager,
    obj_meta: &ObjectMeta,
    path: &str,
    description: &str,
    public: bool,
) -> Result<(Namespace, Uuid)> {
    scopes.require_create_namespace()?;
    let canonical_path = paths::normalize(path)?;

    // The quota row is created lazily; admins have no ceiling.
    let limit: Option<(Option<i32>, i32)> = sqlx::query_as(
        r#"
        SELECT max_ns_creation, curr_creation_count
        FROM gerrydb.namespace_limit WHERE user_id = $1
        "#,
    )
    .bind(scopes.user_id())
    .fetch_optional(&mut **tx)
    .await?;
    let (max_creation, current_count) = match limit {
        Some(row) => row,
        None => {
            let max = if scopes.is_admin() {
                None
            } else {
                Some(DEFAULT_NAMESPACE_QUOTA)
            };
            sqlx::query(
                r#"
                INSERT INTO gerrydb.namespace_limit (user_id, max_ns_creation)
                VALUES ($1, $2)
                "#,
            )
            .bind(scopes.user_id())
            .bind(max)
            .execute(&mut **tx)
            .await?;
            (max, 0)
        }
    };
    if let Some(max) = max_creation {
        if current_count + 1 > max {
            return Err(Error::CreateValue(format!(
                "user has reached the maximum number of namespaces ({max}) they can create"
            )));
        }
    }

    let namespace: Namespace = sqlx::query_as(
        r#"
        INSERT INTO gerrydb.namespace (path, description, public, meta_id)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&canonical_path)
    .bind(description)
    .bind(public)
    .bind(obj_meta.meta_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|_| {
        Error::CreateValue(format!(
            "failed to create namespace '{canonical_path}' (the namespace may already exist)"
        ))
    })?;

    sqlx::query(
        r#"
        UPDATE gerrydb.namespace_limit
        SET curr_creation_count = curr_creation_count + 1
        WHERE user_id = $1
        "#,
    )
    .bind(scopes.user_id())
    .execute(&mut **tx)
    .await?;

    let etag = etag::bump(&mut **tx, collections::NAMESPACES, None).await?;

    if !scopes.can_read_in_namespace(&namespace) {
        info!(
            "Granting creator scopes on new namespace '{}' to user {}",
            namespace.path,
            scopes.user_id()
        );
        grant_scopes(
            &mut **tx,
            scopes.user_id(),
            &[
                ScopeGrant::in_namespace(ScopeType::NamespaceRead, namespace.namespace_id),
                ScopeGrant::in_namespace(ScopeType::NamespaceWrite, namespace.namespace_id),
                ScopeGrant::in_namespace(ScopeType::NamespaceWriteDerived, namespace.namespace_id),
            ],
            obj_meta.meta_id,
        )
        .await?;
    }

    Ok((namespace, etag))
}
