//! Error types for the catalog gateway.

use thiserror::Error;

/// Errors surfaced by catalog operations.
///
/// Operations never retry internally; callers decide whether a failure is
/// fatal for the job, the run, or the process.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Credentials file could not be read
    #[error("failed to read credentials file '{path}': {source}")]
    AuthFileRead {
        path: String,
        source: std::io::Error,
    },

    /// Credentials file does not hold `<user> <password> <dbname>`
    #[error("malformed credentials file '{path}': expected '<user> <password> <dbname>'")]
    AuthFileMalformed { path: String },

    /// Connecting to the database failed
    #[error("failed to connect to catalog database: {0}")]
    Connect(#[source] sqlx::Error),

    /// A query failed; `op` names the catalog operation
    #[error("catalog operation '{op}' failed: {source}")]
    Query {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// No Storage row is joined to the pool, so no drive path can be resolved
    #[error(
        "no tape drive is mapped to pool {0}; load the tape and/or update the catalog"
    )]
    StorageNotProvisioned(i64),

    /// A Job row carried a state string outside the fixed domain
    #[error("unknown job state '{0}' in catalog")]
    UnknownState(String),
}

impl CatalogError {
    pub(crate) fn query(op: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Query { op, source }
    }
}
