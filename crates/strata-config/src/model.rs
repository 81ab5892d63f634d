use std::path::PathBuf;

use serde::Deserialize;
use strata_common::{Error, Result};

pub const DEFAULT_LEDGER_TABLE: &str = "migration_records";

/// One environment entry of `dbconf.yml` / `dbconf.toml`, as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EnvironmentConfig {
    pub driver: String,
    pub open: String,
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Sqlite,
}

impl DriverKind {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sqlite3" | "sqlite" => Ok(DriverKind::Sqlite),
            "" => Err(Error::Config("no driver configured".into())),
            other => Err(Error::Config(format!(
                "unsupported driver '{other}' (available: sqlite3)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbDriver {
    pub name: String,
    pub kind: DriverKind,
    /// Driver-specific open string. For sqlite this is a file path or `:memory:`.
    pub open: String,
}

/// Fully resolved configuration for one environment. Built once at startup and
/// handed to the engine by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConf {
    pub migrations_dir: PathBuf,
    pub env: String,
    pub driver: DbDriver,
    pub table: String,
}

impl DbConf {
    /// Configuration for an in-memory sqlite database, mostly useful in tests.
    pub fn in_memory(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            env: "memory".into(),
            driver: DbDriver {
                name: "sqlite3".into(),
                kind: DriverKind::Sqlite,
                open: ":memory:".into(),
            },
            table: DEFAULT_LEDGER_TABLE.into(),
        }
    }
}

/// Ledger table names are interpolated into SQL, so only bare identifiers pass.
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Config(format!(
            "invalid ledger table name '{name}'"
        )));
    }
    Ok(())
}
