use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Data type of a column. `Json` columns exist in the taxonomy but carry no
/// value slot; value writes against them are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize)]
#[sqlx(type_name = "column_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Float,
    Int,
    Bool,
    Str,
    Json,
}

impl ColumnType {
    /// The `column_value` slot holding values of this type, if any.
    pub fn value_column(self) -> Option<&'static str> {
        match self {
            ColumnType::Float => Some("val_float"),
            ColumnType::Int => Some("val_int"),
            ColumnType::Str => Some("val_str"),
            ColumnType::Bool => Some("val_bool"),
            ColumnType::Json => None,
        }
    }
}

/// Meaning of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize)]
#[sqlx(type_name = "column_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Count,
    Percent,
    Categorical,
    Identifier,
    Area,
    Other,
}

/// An abstract scope verb (no target information).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "scope_type")]
pub enum ScopeType {
    #[sqlx(rename = "namespace:read:*")]
    NamespaceRead,
    #[sqlx(rename = "namespace:write:*")]
    NamespaceWrite,
    #[sqlx(rename = "namespace:write_derived:*")]
    NamespaceWriteDerived,
    #[sqlx(rename = "namespace:create")]
    NamespaceCreate,
    #[sqlx(rename = "locality:read")]
    LocalityRead,
    #[sqlx(rename = "locality:write")]
    LocalityWrite,
    #[sqlx(rename = "meta:read")]
    MetaRead,
    #[sqlx(rename = "meta:write")]
    MetaWrite,
    #[sqlx(rename = "all")]
    All,
}

/// Authorization-only grouping of namespaces by visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "namespace_group", rename_all = "lowercase")]
pub enum NamespaceGroup {
    Public,
    Private,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "view_render_status", rename_all = "lowercase")]
pub enum ViewRenderStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub user_id: i32,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    pub key_hash: Vec<u8>,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

/// One row of the metadata ledger. Written once, referenced by every
/// attributable row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ObjectMeta {
    #[serde(skip)]
    pub meta_id: i32,
    pub uuid: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub created_by: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Namespace {
    pub namespace_id: i32,
    pub path: String,
    pub description: String,
    pub public: bool,
    pub meta_id: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Locality {
    pub loc_id: i32,
    pub canonical_ref_id: i32,
    pub parent_id: Option<i32>,
    pub meta_id: i32,
    pub name: String,
    pub default_proj: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LocalityRef {
    pub ref_id: i32,
    pub loc_id: Option<i32>,
    pub path: String,
    pub meta_id: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GeoLayer {
    pub layer_id: i32,
    pub path: String,
    pub namespace_id: i32,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub meta_id: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Geography {
    pub geo_id: i32,
    pub path: String,
    pub namespace_id: i32,
    pub meta_id: i32,
}

/// Deduplicated shape storage. `geometry_hash` is an MD5 digest over the
/// WKB bytes the shape was stored from; duplicate inserts resolve to the
/// existing row. The shape columns themselves are only read by the bulk
/// extractor, never by the kernel.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GeoBin {
    pub geo_bin_id: i32,
    pub geometry_hash: Vec<u8>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GeoVersion {
    pub import_id: i32,
    pub geo_id: i32,
    pub geo_bin_id: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GeoImport {
    pub import_id: i32,
    pub uuid: Uuid,
    pub namespace_id: i32,
    pub meta_id: i32,
    pub created_at: DateTime<Utc>,
    pub created_by: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GeoSetVersion {
    pub set_version_id: i32,
    pub layer_id: i32,
    pub loc_id: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub meta_id: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DataColumn {
    pub col_id: i32,
    pub namespace_id: i32,
    pub canonical_ref_id: i32,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub kind: ColumnKind,
    #[sqlx(rename = "type")]
    pub col_type: ColumnType,
    pub meta_id: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ColumnRef {
    pub ref_id: i32,
    pub namespace_id: i32,
    pub col_id: Option<i32>,
    pub path: String,
    pub meta_id: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ColumnSet {
    pub set_id: i32,
    pub path: String,
    pub namespace_id: i32,
    pub description: Option<String>,
    pub meta_id: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Plan {
    pub plan_id: i32,
    pub namespace_id: i32,
    pub path: String,
    pub set_version_id: i32,
    pub num_districts: i32,
    pub complete: bool,
    pub description: String,
    pub source_url: Option<String>,
    pub districtr_id: Option<String>,
    pub daves_id: Option<String>,
    pub meta_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Graph {
    pub graph_id: i32,
    pub set_version_id: i32,
    pub namespace_id: i32,
    pub path: String,
    pub description: String,
    pub meta_id: i32,
    pub created_at: DateTime<Utc>,
    pub proj: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ViewTemplate {
    pub template_id: i32,
    pub namespace_id: i32,
    pub path: String,
    pub description: String,
    pub meta_id: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ViewTemplateVersion {
    pub template_version_id: i32,
    pub template_id: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub meta_id: i32,
}

/// An immutable snapshot of a template over a (locality, layer) at a time.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct View {
    pub view_id: i32,
    pub namespace_id: i32,
    pub path: String,
    pub template_id: i32,
    pub template_version_id: i32,
    pub loc_id: i32,
    pub layer_id: i32,
    pub set_version_id: i32,
    pub at: DateTime<Utc>,
    pub proj: Option<String>,
    pub meta_id: i32,
    pub graph_id: Option<i32>,
    pub num_geos: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ViewRender {
    pub render_id: Uuid,
    pub view_id: i32,
    pub created_at: DateTime<Utc>,
    pub created_by: i32,
    pub path: String,
    pub status: ViewRenderStatus,
}
