use thiserror::Error;

/// Kernel error taxonomy. Database errors pass through untranslated unless
/// an operation can attribute them to a domain invariant.
#[derive(Debug, Error)]
pub enum Error {
    /// The resource does not exist, or the caller is not allowed to know
    /// whether it exists (private namespaces).
    #[error("{0}")]
    NotFound(String),

    /// The resource exists and its existence is not a secret, but the
    /// caller lacks the required scope.
    #[error("{0}")]
    Forbidden(String),

    /// Malformed identifier: bad API key format, bad UUID, and so on.
    #[error("{0}")]
    BadRequest(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A domain invariant was violated on object creation.
    #[error("{0}")]
    CreateValue(String),

    #[error("{message} (paths: {paths:?})")]
    BulkCreate {
        message: String,
        paths: Vec<String>,
    },

    #[error("{message} (paths: {paths:?})")]
    BulkPatch {
        message: String,
        paths: Vec<String>,
    },

    /// Per-row type mismatches collected across a value batch.
    #[error("column value type errors: {errors:?}")]
    ColumnValueType { errors: Vec<String> },

    /// Cross-namespace geometry hash mismatch detected by the view composer.
    #[error("{message} (columns: {columns:?})")]
    ViewConflict {
        message: String,
        columns: Vec<String>,
    },

    #[error("render failed: {0}")]
    Render(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn forbidden(what: impl Into<String>) -> Self {
        Error::Forbidden(what.into())
    }
}
