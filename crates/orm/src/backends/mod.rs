//! Database Backend Abstractions
//!
//! Backend-neutral traits plus the sqlx-backed PostgreSQL and SQLite pools.

pub mod core;
pub mod postgres;
pub mod sqlite;

pub use core::*;
pub use postgres::PostgresPool;
pub use sqlite::SqlitePool;

use crate::error::{OrmError, OrmResult};

/// Backends with native bulk-copy semantics; `bulk_insert` refuses the rest
pub const BULK_COPY_BACKENDS: &[DatabaseBackendType] =
    &[DatabaseBackendType::PostgreSQL, DatabaseBackendType::MySQL];

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseBackendType {
    pub fn dialect(&self) -> SqlDialect {
        match self {
            DatabaseBackendType::PostgreSQL => SqlDialect::PostgreSQL,
            DatabaseBackendType::MySQL => SqlDialect::MySQL,
            DatabaseBackendType::SQLite => SqlDialect::SQLite,
        }
    }

    pub fn supports_bulk_copy(&self) -> bool {
        BULK_COPY_BACKENDS.contains(self)
    }

    /// Detect database backend type from a connection URL
    pub fn detect(url: &str) -> OrmResult<Self> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("mysql://") {
            Ok(DatabaseBackendType::MySQL)
        } else if url.starts_with("sqlite:") || url.starts_with("file:") {
            Ok(DatabaseBackendType::SQLite)
        } else {
            Err(OrmError::Configuration(format!(
                "Unable to detect database backend from connection string '{}'",
                url
            )))
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" => Ok(DatabaseBackendType::MySQL),
            "sqlite" => Ok(DatabaseBackendType::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}
