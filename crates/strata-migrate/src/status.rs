use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use strata_common::{Result, Version};

use crate::catalog::Catalog;
use crate::ledger::Ledger;

/// ANSI C `asctime` layout, e.g. `Mon Jan  2 15:04:05 2006`.
const APPLIED_AT_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub version: Version,
    pub origin: String,
    /// When the migration was last applied; `None` means pending.
    pub applied_at: Option<DateTime<Utc>>,
}

impl StatusEntry {
    pub fn is_pending(&self) -> bool {
        self.applied_at.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn pending(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(|e| e.is_pending())
    }
}

/// Join the catalog against the ledger. Read-only; versions without ledger
/// rows are reported as pending.
pub fn report(catalog: &Catalog, ledger: &Ledger, conn: &Connection) -> Result<StatusReport> {
    let mut entries = Vec::with_capacity(catalog.len());
    for migration in catalog {
        let applied_at = ledger
            .latest(conn, migration.version())?
            .filter(|record| record.is_applied)
            .map(|record| record.timestamp);
        entries.push(StatusEntry {
            version: migration.version(),
            origin: migration.origin().to_string(),
            applied_at,
        });
    }
    Ok(StatusReport { entries })
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    Applied At                  Migration")?;
        writeln!(f, "    =======================================")?;
        for entry in &self.entries {
            let applied_at = match entry.applied_at {
                Some(ts) => ts.format(APPLIED_AT_FORMAT).to_string(),
                None => "Pending".to_string(),
            };
            writeln!(f, "    {applied_at:<24} -- {}", entry.origin)?;
        }
        Ok(())
    }
}
