use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DatabaseError {
    /// Optimistic version check failed: someone else committed first.
    #[error("{entity} {id} was modified concurrently")]
    Conflict { entity: &'static str, id: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("database connection error: {message}")]
    Connection { message: String },

    #[error("database query error: {message}")]
    Query { message: String },

    #[error("invalid stored value: {message}")]
    Decode { message: String },
}

impl DatabaseError {
    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection {
                    message: err.to_string(),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => DatabaseError::Decode {
                message: err.to_string(),
            },
            other => DatabaseError::Query {
                message: other.to_string(),
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::Conflict { .. } | DatabaseError::Connection { .. }
        )
    }
}
