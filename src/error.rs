//! Failure taxonomy shared by every execution context.
//!
//! Only `StoreUnavailable` and `MigrationIncomplete` ever reach a caller as an
//! `Err`. The other variants are produced internally, logged, and degraded to
//! an empty or unchanged result at the boundary that owns them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The shared container or the database file inside it cannot be opened.
    #[error("store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),

    /// The one-time repair pass did not finish; it is retried on next launch.
    #[error("migration for build {build} incomplete: {source:#}")]
    MigrationIncomplete {
        build: String,
        #[source]
        source: anyhow::Error,
    },

    /// A snapshot read failed to fetch or decode.
    #[error("snapshot read failed: {0:#}")]
    ReadFailure(anyhow::Error),

    /// The live display surface declined a request or update.
    #[error("live session rejected: {0}")]
    SessionRejected(String),

    /// The companion transport could not take a summary.
    #[error("companion relay unreachable: {0}")]
    RelayUnreachable(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
