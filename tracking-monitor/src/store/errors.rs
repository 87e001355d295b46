use thiserror::Error;

/// Failures surfaced by a [`HealthStore`](super::HealthStore).
#[derive(Error, Debug)]
pub enum DbError {
    /// A query that must return a row returned none
    #[error("Row not found")]
    NotFound,

    /// A health log row broke one of the table's CHECKs (`timing >= 0`, `result_status IN (0, 1)`)
    #[error("Health log row rejected by constraint {}", constraint.as_deref().unwrap_or("<unnamed>"))]
    CheckViolation { constraint: Option<String>, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => DbError::CheckViolation {
                constraint: db_err.constraint().map(str::to_string),
                message: db_err.message().to_string(),
            },
            _ => DbError::Other(err.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_row_maps_to_not_found() {
        assert!(matches!(DbError::from(sqlx::Error::RowNotFound), DbError::NotFound));
    }

    #[test]
    fn test_other_sqlx_errors_are_kept_as_source() {
        let err = DbError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DbError::Other(_)));
        assert_eq!(err.to_string(), sqlx::Error::PoolTimedOut.to_string());
    }

    #[test]
    fn test_check_violation_names_constraint() {
        let err = DbError::CheckViolation {
            constraint: Some("crawler_health_log_timing_check".to_string()),
            message: "new row violates check constraint".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Health log row rejected by constraint crawler_health_log_timing_check"
        );
    }
}
