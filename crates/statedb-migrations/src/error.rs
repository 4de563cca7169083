use statedb_core::StoreError;

use crate::payload::PayloadError;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("please provide unique migration name, duplicate: {0}")]
    NonUniqueName(String),
    #[error("migration commit function was not called: {0}")]
    CommitNotCalled(String),
    #[error("migration {0} already signalled completion")]
    HandshakeClosed(String),
    #[error("migration {name} failed: {source}")]
    Unit {
        name: String,
        #[source]
        source: Box<MigrationError>,
    },
    #[error("checkpoint of migration {name} is not a transform cursor: {token}")]
    InvalidCheckpoint { name: String, token: String },
    #[error("unexpected key {key} in bucket {bucket}")]
    UnexpectedKey { bucket: String, key: String },
    #[error("writing database schema version: {source}")]
    StampVersion {
        #[source]
        source: StoreError,
    },
    #[error("committing database version update: {source}")]
    Commit {
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl MigrationError {
    /// The error a migration body produced, with any [`MigrationError::Unit`] wrapping removed.
    #[must_use]
    pub fn innermost(&self) -> &Self {
        match self {
            Self::Unit { source, .. } => source.innermost(),
            other => other,
        }
    }

    /// Name of the migration the error was raised for, when known.
    #[must_use]
    pub fn migration_name(&self) -> Option<&str> {
        match self {
            Self::NonUniqueName(name)
            | Self::CommitNotCalled(name)
            | Self::HandshakeClosed(name)
            | Self::Unit { name, .. }
            | Self::InvalidCheckpoint { name, .. } => Some(name),
            _ => None,
        }
    }
}
