use thiserror::Error;
use uuid::Uuid;

use crate::models::StudentClassKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("point record {0} not found")]
    NotFound(Uuid),
    #[error("concurrent write conflict")]
    Conflict,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // serialization_failure and deadlock_detected are lost races, not outages.
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|c| c.into_owned());
        match code.as_deref() {
            Some("40001") | Some("40P01") => StoreError::Conflict,
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PointsError {
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("summary {key} still contended after {attempts} attempts")]
    Contention { key: StudentClassKey, attempts: u32 },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{operation}: storage unavailable")]
    StorageUnavailable {
        operation: String,
        #[source]
        source: StoreError,
    },
}

impl PointsError {
    pub fn storage(operation: impl Into<String>, source: StoreError) -> Self {
        PointsError::StorageUnavailable {
            operation: operation.into(),
            source,
        }
    }

    /// Attaches operation context to a storage failure.
    ///
    /// `Conflict` only reaches here once the retry budget is spent, so it is
    /// reported as contention on `key`.
    pub fn from_store(
        operation: impl Into<String>,
        key: &StudentClassKey,
        attempts: u32,
        err: StoreError,
    ) -> Self {
        match err {
            StoreError::NotFound(id) => PointsError::NotFound {
                what: format!("point record {id}"),
            },
            StoreError::Conflict => PointsError::Contention {
                key: key.clone(),
                attempts,
            },
            other => PointsError::storage(operation, other),
        }
    }
}

pub type Result<T, E = PointsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_becomes_contention_with_key() {
        let key = StudentClassKey::new("s1", "c1");
        let err = PointsError::from_store("award", &key, 8, StoreError::Conflict);
        assert!(matches!(err, PointsError::Contention { attempts: 8, .. }));
        assert_eq!(err.to_string(), "summary s1_c1 still contended after 8 attempts");
    }

    #[test]
    fn unavailable_keeps_operation_context() {
        let key = StudentClassKey::new("s1", "c1");
        let err = PointsError::from_store(
            "award to s1 in c1",
            &key,
            1,
            StoreError::Unavailable("connection refused".into()),
        );
        assert_eq!(err.to_string(), "award to s1 in c1: storage unavailable");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("storage unavailable: connection refused"));
    }
}
