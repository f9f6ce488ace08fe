//! Translation of sqlx errors into storage-independent repository errors.

use lumen_core::{Error, RepositoryErrorKind};

/// Classify a sqlx error by what it means to callers.
pub fn repository_error_kind(e: &sqlx::Error) -> RepositoryErrorKind {
    match e {
        sqlx::Error::RowNotFound => RepositoryErrorKind::NotFound,
        sqlx::Error::Database(db) => match db.kind() {
            sqlx::error::ErrorKind::UniqueViolation => RepositoryErrorKind::Conflict,
            sqlx::error::ErrorKind::ForeignKeyViolation => RepositoryErrorKind::ForeignKeyViolation,
            _ => match db.code().as_deref() {
                Some("23505") => RepositoryErrorKind::Conflict,
                Some("23503") => RepositoryErrorKind::ForeignKeyViolation,
                _ => RepositoryErrorKind::Other,
            },
        },
        _ => RepositoryErrorKind::Other,
    }
}

/// Convert a sqlx error into a core [`Error::Repository`].
pub fn map_sqlx_error(e: sqlx::Error) -> Error {
    Error::repository(repository_error_kind(&e), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert_eq!(err.repository_kind(), Some(RepositoryErrorKind::NotFound));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_pool_timeout_maps_to_other() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert_eq!(err.repository_kind(), Some(RepositoryErrorKind::Other));
        assert!(err.is_internal());
    }

    #[test]
    fn test_column_decode_maps_to_other() {
        let err = map_sqlx_error(sqlx::Error::ColumnNotFound("status".into()));
        assert_eq!(err.repository_kind(), Some(RepositoryErrorKind::Other));
        assert!(err.to_string().contains("status"));
    }
}
