use thiserror::Error;

use crate::column::ColumnType;

/// Result alias for staging table operations.
pub type StagingResult<T> = std::result::Result<T, StagingError>;

#[derive(Debug, Error)]
pub enum StagingError {
    /// A column was read or written before it was added.
    #[error("column `{0}` not found")]
    ColumnNotFound(String),

    /// A column exists but holds another value type.
    #[error("column `{column}` has type {found}, expected {expected}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        found: ColumnType,
    },

    /// The same entity id appeared twice while seeding without enforcement.
    #[error("duplicate entity id `{0}`")]
    DuplicateEntity(String),

    /// A full-column assignment did not provide one value per row.
    #[error("column `{column}` expects {expected} values, got {found}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    /// Spatial indexes can only be built on polygon or point columns.
    #[error("column `{0}` is not a geometry column")]
    NotGeometry(String),

    /// The id column is managed by the table itself.
    #[error("column name `{0}` is reserved")]
    Reserved(String),
}
