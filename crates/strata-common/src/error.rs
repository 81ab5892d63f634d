use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Direction, Version};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("ledger error: {0}")]
    Ledger(String),

    /// A migration step failed. Steps committed before it stay applied.
    #[error(
        "migration {version} failed to {direction} ({completed} step(s) committed before it): {cause}"
    )]
    Application {
        version: Version,
        direction: Direction,
        completed: usize,
        cause: String,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("internal consistency fault: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Reasons a migration source cannot be turned into a catalog. None of these
/// leave a partial catalog behind.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("cannot read migration source {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("version {version} is declared by both {first} and {second}")]
    DuplicateVersion {
        version: Version,
        first: String,
        second: String,
    },

    #[error("cannot parse a version from {name}: {reason}")]
    UnparseableName { name: String, reason: String },

    #[error("invalid migration script {name}: {reason}")]
    InvalidScript { name: String, reason: String },
}
