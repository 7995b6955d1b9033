use std::collections::HashSet;

use log::info;
use sha2::{Digest, Sha512};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ApiKey, Namespace, NamespaceGroup, ScopeType, User};

/// Raw API keys are 64 lowercase alphanumeric characters.
pub const API_KEY_LEN: usize = 64;

/// SHA-512 digest of a raw API key; the only form the database stores.
pub fn api_key_hash(raw_key: &str) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(raw_key.as_bytes());
    hasher.finalize().to_vec()
}

pub fn api_key_format_valid(raw_key: &str) -> bool {
    raw_key.len() == API_KEY_LEN
        && raw_key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Generates a fresh raw key from OS randomness (two v4 UUIDs rendered as
/// lowercase hex), plus its stored digest.
pub fn generate_api_key() -> (String, Vec<u8>) {
    let raw = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let hash = api_key_hash(&raw);
    (raw, hash)
}

/// Resolves an active user from a raw API key. Unknown and inactive keys are
/// indistinguishable to the caller.
pub async fn authenticate(conn: &mut PgConnection, raw_key: &str) -> Result<User> {
    if !api_key_format_valid(raw_key) {
        return Err(Error::BadRequest("invalid API key format".to_string()));
    }
    let key: Option<ApiKey> =
        sqlx::query_as(r#"SELECT * FROM gerrydb.api_key WHERE key_hash = $1"#)
            .bind(api_key_hash(raw_key))
            .fetch_optional(&mut *conn)
            .await?;
    let key = key.filter(|key| key.active);
    let Some(key) = key else {
        return Err(Error::forbidden("unknown or inactive API key"));
    };
    let user: User = sqlx::query_as(r#"SELECT * FROM gerrydb."user" WHERE user_id = $1"#)
        .bind(key.user_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(user)
}

pub async fn get_user_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as(r#"SELECT * FROM gerrydb."user" WHERE email = $1"#)
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(user)
}

/// Creates a user. Users are never deleted; emails are unique.
pub async fn create_user(conn: &mut PgConnection, email: &str, name: &str) -> Result<User> {
    let user: User = sqlx::query_as(
        r#"INSERT INTO gerrydb."user" (email, name) VALUES ($1, $2) RETURNING *"#,
    )
    .bind(email)
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(|_| Error::CreateValue(format!("failed to create user '{email}' (email may already exist)")))?;
    info!("Created user {} ({})", user.email, user.user_id);
    Ok(user)
}

/// Stores a fresh API key for `user` and returns the raw key.
pub async fn create_api_key(conn: &mut PgConnection, user: &User) -> Result<String> {
    let (raw, hash) = generate_api_key();
    sqlx::query(r#"INSERT INTO gerrydb.api_key (key_hash, user_id) VALUES ($1, $2)"#)
        .bind(hash)
        .bind(user.user_id)
        .execute(&mut *conn)
        .await?;
    info!("Generated API key for user {}", user.user_id);
    Ok(raw)
}

/// Deactivates every API key a user holds.
pub async fn deactivate_api_keys(conn: &mut PgConnection, user: &User) -> Result<u64> {
    let result = sqlx::query(r#"UPDATE gerrydb.api_key SET active = false WHERE user_id = $1"#)
        .bind(user.user_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// One scope grant: a verb plus its target (global, a namespace id, or a
/// namespace group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::FromRow)]
pub struct ScopeGrant {
    pub scope: ScopeType,
    pub namespace_group: Option<NamespaceGroup>,
    pub namespace_id: Option<i32>,
}

impl ScopeGrant {
    pub fn global(scope: ScopeType) -> Self {
        Self {
            scope,
            namespace_group: None,
            namespace_id: None,
        }
    }

    pub fn in_namespace(scope: ScopeType, namespace_id: i32) -> Self {
        Self {
            scope,
            namespace_group: None,
            namespace_id: Some(namespace_id),
        }
    }

    pub fn in_group(scope: ScopeType, group: NamespaceGroup) -> Self {
        Self {
            scope,
            namespace_group: Some(group),
            namespace_id: None,
        }
    }
}

/// Grants scopes to a user. Each grant gets its own ledger entry attributed
/// to the granting author.
pub async fn grant_scopes(
    conn: &mut PgConnection,
    user_id: i32,
    grants: &[ScopeGrant],
    meta_id: i32,
) -> Result<()> {
    for grant in grants {
        sqlx::query(
            r#"
            INSERT INTO gerrydb.user_scope (user_id, scope, namespace_group, namespace_id, meta_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, scope, namespace_group, namespace_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(grant.scope)
        .bind(grant.namespace_group)
        .bind(grant.namespace_id)
        .bind(meta_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Default role bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Read access to localities and public namespaces.
    Public,
    /// May also write localities and metadata and create namespaces.
    Contributor,
    /// Everything, everywhere.
    Admin,
}

impl Role {
    pub fn grants(self) -> Vec<ScopeGrant> {
        match self {
            Role::Public => vec![
                ScopeGrant::global(ScopeType::LocalityRead),
                ScopeGrant::in_group(ScopeType::NamespaceRead, NamespaceGroup::Public),
            ],
            Role::Contributor => {
                let mut grants = Role::Public.grants();
                grants.extend([
                    ScopeGrant::global(ScopeType::LocalityWrite),
                    ScopeGrant::global(ScopeType::MetaWrite),
                    ScopeGrant::global(ScopeType::NamespaceCreate),
                ]);
                grants
            }
            Role::Admin => vec![
                ScopeGrant::global(ScopeType::All),
                ScopeGrant::in_group(ScopeType::All, NamespaceGroup::All),
            ],
        }
    }
}

/// Common scope queries for one user, aggregated over the user's direct
/// grants and every group the user belongs to.
#[derive(Debug, Clone)]
pub struct ScopeManager {
    user_id: i32,
    global_scopes: HashSet<ScopeType>,
    namespace_scopes: HashSet<(ScopeType, i32)>,
    namespace_group_scopes: HashSet<(ScopeType, NamespaceGroup)>,
}

impl ScopeManager {
    /// Loads and aggregates the user's effective grants.
    pub async fn load(conn: &mut PgConnection, user: &User) -> Result<Self> {
        let user_grants: Vec<ScopeGrant> = sqlx::query_as(
            r#"
            SELECT scope, namespace_group, namespace_id
            FROM gerrydb.user_scope WHERE user_id = $1
            "#,
        )
        .bind(user.user_id)
        .fetch_all(&mut *conn)
        .await?;

        let group_grants: Vec<ScopeGrant> = sqlx::query_as(
            r#"
            SELECT gs.scope, gs.namespace_group, gs.namespace_id
            FROM gerrydb.user_group_scope AS gs
            JOIN gerrydb.user_group_member AS gm ON gm.group_id = gs.group_id
            WHERE gm.user_id = $1
            "#,
        )
        .bind(user.user_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut grants = user_grants;
        grants.extend(group_grants);
        Ok(Self::from_grants(user.user_id, &grants))
    }

    /// Builds a manager from a resolved grant list.
    pub fn from_grants(user_id: i32, grants: &[ScopeGrant]) -> Self {
        let mut global_scopes = HashSet::new();
        let mut namespace_scopes = HashSet::new();
        let mut namespace_group_scopes = HashSet::new();
        for grant in grants {
            match (grant.namespace_id, grant.namespace_group) {
                (Some(ns_id), None) => {
                    namespace_scopes.insert((grant.scope, ns_id));
                }
                (None, Some(group)) => {
                    namespace_group_scopes.insert((grant.scope, group));
                    if group == NamespaceGroup::All {
                        global_scopes.insert(grant.scope);
                    }
                }
                (None, None) => {
                    global_scopes.insert(grant.scope);
                }
                // A grant may not target both a namespace and a group.
                (Some(_), Some(_)) => {}
            }
        }
        Self {
            user_id,
            global_scopes,
            namespace_scopes,
            namespace_group_scopes,
        }
    }

    pub fn user_id(&self) -> i32 {
        self.user_id
    }

    fn has_global(&self, scope: ScopeType) -> bool {
        self.global_scopes.contains(&ScopeType::All) || self.global_scopes.contains(&scope)
    }

    fn has_group(&self, scope: ScopeType, group: NamespaceGroup) -> bool {
        [
            (scope, group),
            (ScopeType::All, group),
            (scope, NamespaceGroup::All),
            (ScopeType::All, NamespaceGroup::All),
        ]
        .iter()
        .any(|candidate| self.namespace_group_scopes.contains(candidate))
    }

    fn has_in_namespace(&self, scope: ScopeType, namespace: &Namespace) -> bool {
        let by_id = self
            .namespace_scopes
            .contains(&(scope, namespace.namespace_id))
            || self
                .namespace_scopes
                .contains(&(ScopeType::All, namespace.namespace_id));
        let group = if namespace.public {
            NamespaceGroup::Public
        } else {
            NamespaceGroup::Private
        };
        by_id || self.has_group(scope, group)
    }

    pub fn is_admin(&self) -> bool {
        self.global_scopes.contains(&ScopeType::All)
    }

    pub fn can_read_localities(&self) -> bool {
        self.has_global(ScopeType::LocalityRead)
    }

    pub fn can_write_localities(&self) -> bool {
        self.has_global(ScopeType::LocalityWrite)
    }

    pub fn can_read_meta(&self) -> bool {
        self.has_global(ScopeType::MetaRead)
    }

    pub fn can_write_meta(&self) -> bool {
        self.has_global(ScopeType::MetaWrite)
    }

    pub fn can_create_namespace(&self) -> bool {
        self.has_global(ScopeType::NamespaceCreate)
    }

    pub fn can_read_in_namespace(&self, namespace: &Namespace) -> bool {
        self.has_in_namespace(ScopeType::NamespaceRead, namespace)
    }

    pub fn can_write_in_namespace(&self, namespace: &Namespace) -> bool {
        self.has_in_namespace(ScopeType::NamespaceWrite, namespace)
    }

    pub fn can_write_derived_in_namespace(&self, namespace: &Namespace) -> bool {
        self.has_in_namespace(ScopeType::NamespaceWrite, namespace)
            || self.has_in_namespace(ScopeType::NamespaceWriteDerived, namespace)
    }

    // Denied namespace operations report NotFound so that probing cannot
    // reveal which private namespaces exist.

    pub fn require_read_in_namespace(&self, namespace: &Namespace) -> Result<()> {
        if self.can_read_in_namespace(namespace) {
            Ok(())
        } else {
            Err(Error::not_found(
                "namespace not found, or you do not have sufficient permissions \
                 to read in this namespace",
            ))
        }
    }

    pub fn require_write_in_namespace(&self, namespace: &Namespace) -> Result<()> {
        if self.can_write_in_namespace(namespace) {
            Ok(())
        } else {
            Err(Error::not_found(
                "namespace not found, or you do not have sufficient permissions \
                 to write in this namespace",
            ))
        }
    }

    pub fn require_write_derived_in_namespace(&self, namespace: &Namespace) -> Result<()> {
        if self.can_write_derived_in_namespace(namespace) {
            Ok(())
        } else {
            Err(Error::not_found(
                "namespace not found, or you do not have sufficient permissions \
                 to write derived objects in this namespace",
            ))
        }
    }

    pub fn require_read_localities(&self) -> Result<()> {
        if self.can_read_localities() {
            Ok(())
        } else {
            Err(Error::forbidden("insufficient permissions to read localities"))
        }
    }

    pub fn require_write_localities(&self) -> Result<()> {
        if self.can_write_localities() {
            Ok(())
        } else {
            Err(Error::forbidden("insufficient permissions to write localities"))
        }
    }

    pub fn require_write_meta(&self) -> Result<()> {
        if self.can_write_meta() {
            Ok(())
        } else {
            Err(Error::forbidden("insufficient permissions to write metadata"))
        }
    }

    pub fn require_create_namespace(&self) -> Result<()> {
        if self.can_create_namespace() {
            Ok(())
        } else {
            Err(Error::forbidden("insufficient permissions to create namespaces"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(id: i32, public: bool) -> Namespace {
        Namespace {
            namespace_id: id,
            path: format!("ns-{id}"),
            description: String::new(),
            public,
            meta_id: 1,
        }
    }

    #[test]
    fn global_all_matches_every_verb() {
        let scopes = ScopeManager::from_grants(1, &[ScopeGrant::global(ScopeType::All)]);
        assert!(scopes.can_read_localities());
        assert!(scopes.can_write_meta());
        assert!(scopes.can_create_namespace());
        assert!(scopes.is_admin());
    }

    #[test]
    fn group_all_covers_public_and_private() {
        let scopes = ScopeManager::from_grants(
            1,
            &[ScopeGrant::in_group(
                ScopeType::NamespaceRead,
                NamespaceGroup::All,
            )],
        );
        assert!(scopes.can_read_in_namespace(&namespace(1, true)));
        assert!(scopes.can_read_in_namespace(&namespace(2, false)));
        assert!(!scopes.can_write_in_namespace(&namespace(1, true)));
    }

    #[test]
    fn public_group_scope_excludes_private_namespaces() {
        let scopes = ScopeManager::from_grants(
            1,
            &[ScopeGrant::in_group(
                ScopeType::NamespaceRead,
                NamespaceGroup::Public,
            )],
        );
        assert!(scopes.can_read_in_namespace(&namespace(1, true)));
        assert!(!scopes.can_read_in_namespace(&namespace(2, false)));
        // Denied reads hide the namespace's existence.
        assert!(matches!(
            scopes.require_read_in_namespace(&namespace(2, false)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn namespace_scope_targets_one_namespace() {
        let scopes = ScopeManager::from_grants(
            1,
            &[ScopeGrant::in_namespace(ScopeType::NamespaceWrite, 5)],
        );
        assert!(scopes.can_write_in_namespace(&namespace(5, false)));
        assert!(!scopes.can_write_in_namespace(&namespace(6, false)));
    }

    #[test]
    fn write_satisfies_write_derived() {
        let scopes = ScopeManager::from_grants(
            1,
            &[ScopeGrant::in_namespace(ScopeType::NamespaceWrite, 5)],
        );
        assert!(scopes.can_write_derived_in_namespace(&namespace(5, true)));

        let derived_only = ScopeManager::from_grants(
            1,
            &[ScopeGrant::in_namespace(ScopeType::NamespaceWriteDerived, 5)],
        );
        assert!(derived_only.can_write_derived_in_namespace(&namespace(5, true)));
        assert!(!derived_only.can_write_in_namespace(&namespace(5, true)));
    }

    #[test]
    fn locality_writes_fail_forbidden_not_notfound() {
        let scopes = ScopeManager::from_grants(1, &[]);
        assert!(matches!(
            scopes.require_write_localities(),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn contributor_bundle_includes_public_bundle() {
        let scopes = ScopeManager::from_grants(1, &Role::Contributor.grants());
        assert!(scopes.can_read_localities());
        assert!(scopes.can_write_localities());
        assert!(scopes.can_create_namespace());
        assert!(scopes.can_read_in_namespace(&namespace(1, true)));
        assert!(!scopes.can_read_in_namespace(&namespace(1, false)));
        assert!(!scopes.is_admin());
    }

    #[test]
    fn api_key_format() {
        let (raw, hash) = generate_api_key();
        assert!(api_key_format_valid(&raw));
        assert_eq!(hash.len(), 64);
        assert!(!api_key_format_valid("short"));
        assert!(!api_key_format_valid(&"A".repeat(64)));
    }
}
