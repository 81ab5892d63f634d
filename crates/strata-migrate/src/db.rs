use std::time::Duration;

use rusqlite::Connection;
use strata_common::{Error, Result};
use strata_config::{DbConf, DriverKind};
use tracing::info;

/// How long a connection waits on another writer's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the database described by `conf`.
pub fn open_database(conf: &DbConf) -> Result<Connection> {
    match conf.driver.kind {
        DriverKind::Sqlite => open_sqlite(&conf.driver.open),
    }
}

fn open_sqlite(open: &str) -> Result<Connection> {
    let conn = if open == ":memory:" {
        Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?
    } else {
        info!("opening database at {open}");
        Connection::open(open)
            .map_err(|e| Error::Database(format!("failed to open database {open}: {e}")))?
    };

    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

    Ok(conn)
}
