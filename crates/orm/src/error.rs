//! Error types for the persistence context
//!
//! Every failure surfaced by the context is a `ModelError`. Store-level
//! failures (connectivity, constraint violations) are carried through as
//! `Database`/`Connection` without being reinterpreted.

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for context operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    /// Missing or invalid configuration, fatal at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The entity type is not part of the context's model
    #[error("Type '{type_name}' is not registered in this context's model module")]
    TypeNotRegistered { type_name: String },

    /// A single-result query matched more than one row
    #[error("Sequence contains more than one matching row in '{table}'")]
    MultipleResults { table: String },

    /// The operation is not available on the current backend
    #[error("{operation} is not supported by the {backend} backend")]
    UnsupportedBackend { operation: String, backend: String },

    /// Operation intentionally left unimplemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Load by key found nothing
    #[error("Record not found in table '{0}'")]
    NotFound(String),

    /// Database query error passed through from the driver
    #[error("Database error: {0}")]
    Database(String),

    /// Connection pool error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Query building error
    #[error("Query error: {0}")]
    Query(String),

    /// Validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Column missing from a result row
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// The operation was cancelled before the store answered
    #[error("Operation cancelled")]
    Cancelled,
}

impl ModelError {
    pub(crate) fn not_registered<T: ?Sized>() -> Self {
        ModelError::TypeNotRegistered {
            type_name: short_type_name::<T>().to_string(),
        }
    }

    /// Whether the error came from the store rather than from the context
    pub fn is_store_error(&self) -> bool {
        matches!(self, ModelError::Database(_) | ModelError::Connection(_))
    }
}

/// Last path segment of a type name, e.g. `Order` for `shop::model::Order`
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// Convert from sqlx errors
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ModelError::Connection(err.to_string())
            }
            other => ModelError::Database(other.to_string()),
        }
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Order;

    #[test]
    fn test_type_not_registered_names_the_type() {
        let err = ModelError::not_registered::<Order>();
        assert!(err.to_string().contains("'Order'"));
        match err {
            ModelError::TypeNotRegistered { type_name } => assert_eq!(type_name, "Order"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_short_type_name_strips_generics() {
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
        assert_eq!(short_type_name::<i64>(), "i64");
    }

    #[test]
    fn test_store_error_classification() {
        assert!(ModelError::Database("constraint".into()).is_store_error());
        assert!(!ModelError::MultipleResults { table: "t".into() }.is_store_error());
    }
}
