use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use strata_common::{Error, Result, Version};
use strata_config::{DEFAULT_LEDGER_TABLE, DbConf, validate_table_name};
use tracing::{debug, info};

/// One append-only row of the version ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub version: Version,
    pub is_applied: bool,
    pub timestamp: DateTime<Utc>,
}

/// The persisted applied/reverted history of every migration version.
///
/// Rows are only ever appended. The current state of a version is the
/// `is_applied` value of its most recent row (by `t_stamp`, then `id`).
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { table })
    }

    pub fn from_conf(conf: &DbConf) -> Result<Self> {
        Self::new(conf.table.clone())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it does not exist yet.
    ///
    /// Tolerates another process creating the table at the same moment: if
    /// creation fails but the table is present afterwards, this succeeds.
    pub fn ensure_initialized(&self, conn: &Connection) -> Result<()> {
        if self.table_exists(conn)? {
            debug!("ledger table {} already present", self.table);
            return Ok(());
        }

        self.create_table(conn)
    }

    /// Run the ledger DDL. A failure is forgiven when the table exists
    /// afterwards, which is what losing a creation race to another
    /// connection looks like.
    fn create_table(&self, conn: &Connection) -> Result<()> {
        let table = &self.table;
        let ddl = format!(
            "CREATE TABLE {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version_id INTEGER NOT NULL,
                is_applied INTEGER NOT NULL,
                t_stamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_version_id
                ON {table}(version_id, t_stamp);"
        );

        if let Err(e) = conn.execute_batch(&ddl) {
            if self.table_exists(conn)? {
                debug!("ledger table {table} appeared during initialization ({e})");
                return Ok(());
            }
            return Err(Error::Ledger(format!(
                "failed to create ledger table {table}: {e}"
            )));
        }

        info!("created ledger table {table}");
        Ok(())
    }

    fn table_exists(&self, conn: &Connection) -> Result<bool> {
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            params![self.table],
            |row| row.get(0),
        )
        .map_err(|e| Error::Ledger(format!("failed to check ledger table: {e}")))
    }

    /// Highest version whose most recent record is applied, or zero.
    pub fn current_version(&self, conn: &Connection) -> Result<Version> {
        let table = &self.table;
        let sql = format!(
            "SELECT COALESCE(MAX(r.version_id), 0)
             FROM {table} r
             WHERE r.is_applied = 1
               AND r.id = (
                   SELECT l.id FROM {table} l
                   WHERE l.version_id = r.version_id
                   ORDER BY l.t_stamp DESC, l.id DESC
                   LIMIT 1
               )"
        );
        let version: i64 = conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| Error::Ledger(format!("failed to read current version: {e}")))?;
        Ok(Version::new(version))
    }

    /// Append a record. Refuses writes that would break the history invariants:
    /// the first record of a version must be an apply, consecutive records must
    /// alternate, and timestamps must not go backwards.
    pub fn record_outcome(
        &self,
        conn: &Connection,
        version: Version,
        applied: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        match self.latest(conn, version)? {
            None if !applied => {
                return Err(Error::Ledger(format!(
                    "cannot record revert of version {version}: it was never applied"
                )));
            }
            Some(last) if last.is_applied == applied => {
                let state = if applied { "applied" } else { "reverted" };
                return Err(Error::Ledger(format!(
                    "version {version} is already {state}"
                )));
            }
            Some(last) if timestamp < last.timestamp => {
                return Err(Error::Ledger(format!(
                    "timestamp {} for version {version} precedes its last record at {}",
                    format_timestamp(&timestamp),
                    format_timestamp(&last.timestamp)
                )));
            }
            _ => {}
        }

        let sql = format!(
            "INSERT INTO {} (version_id, is_applied, t_stamp) VALUES (?1, ?2, ?3)",
            self.table
        );
        conn.execute(
            &sql,
            params![version.get(), applied, format_timestamp(&timestamp)],
        )
        .map_err(|e| Error::Ledger(format!("failed to record version {version}: {e}")))?;

        debug!("ledger: version {version} is_applied={applied}");
        Ok(())
    }

    /// Most recent record for `version`, if any.
    pub fn latest(&self, conn: &Connection, version: Version) -> Result<Option<LedgerRecord>> {
        let sql = format!(
            "SELECT version_id, is_applied, t_stamp FROM {}
             WHERE version_id = ?1
             ORDER BY t_stamp DESC, id DESC
             LIMIT 1",
            self.table
        );
        let raw = conn
            .query_row(&sql, params![version.get()], read_row)
            .optional()
            .map_err(|e| Error::Ledger(format!("failed to read ledger for {version}: {e}")))?;
        raw.map(into_record).transpose()
    }

    /// Every record for `version`, most recent first.
    pub fn history(&self, conn: &Connection, version: Version) -> Result<Vec<LedgerRecord>> {
        let sql = format!(
            "SELECT version_id, is_applied, t_stamp FROM {}
             WHERE version_id = ?1
             ORDER BY t_stamp DESC, id DESC",
            self.table
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Ledger(format!("failed to prepare history query: {e}")))?;
        let rows = stmt
            .query_map(params![version.get()], read_row)
            .map_err(|e| Error::Ledger(format!("failed to query history: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let raw =
                row.map_err(|e| Error::Ledger(format!("failed to read ledger row: {e}")))?;
            records.push(into_record(raw)?);
        }
        Ok(records)
    }
}

type RawRecord = (i64, bool, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_record((version, is_applied, t_stamp): RawRecord) -> Result<LedgerRecord> {
    Ok(LedgerRecord {
        version: Version::new(version),
        is_applied,
        timestamp: parse_timestamp(&t_stamp)?,
    })
}

/// Fixed-width UTC form, so text ordering in SQL matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite datetime('now') produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
        })
        .map_err(|e| Error::Ledger(format!("invalid ledger timestamp '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ledger() -> (Ledger, Connection) {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::default();
        ledger.ensure_initialized(&conn).unwrap();
        (ledger, conn)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn initialization_is_idempotent() {
        let (ledger, conn) = ledger();
        ledger.ensure_initialized(&conn).unwrap();
        ledger.ensure_initialized(&conn).unwrap();
        assert_eq!(ledger.current_version(&conn).unwrap(), Version::ZERO);
    }

    #[test]
    fn create_tolerates_table_made_by_another_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let first = Connection::open(&path).unwrap();
        let second = Connection::open(&path).unwrap();
        let ledger = Ledger::default();

        // `second` already decided to create; `first` gets there before it.
        assert!(!ledger.table_exists(&second).unwrap());
        ledger.ensure_initialized(&first).unwrap();
        ledger.create_table(&second).unwrap();
        assert!(ledger.table_exists(&second).unwrap());
    }

    #[test]
    fn create_reports_failure_when_table_never_appears() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE VIEW migration_records AS SELECT 1;")
            .unwrap();
        let err = Ledger::default().create_table(&conn).unwrap_err();
        assert!(err.to_string().contains("failed to create ledger table"));
    }

    #[test]
    fn concurrent_initializers_both_succeed() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let mut conf = DbConf::in_memory(dir.path());
        conf.driver.open = dir.path().join("ledger.db").to_string_lossy().into_owned();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let conf = conf.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let conn = crate::db::open_database(&conf).unwrap();
                    barrier.wait();
                    Ledger::default().ensure_initialized(&conn)
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let conn = crate::db::open_database(&conf).unwrap();
        assert_eq!(
            Ledger::default().current_version(&conn).unwrap(),
            Version::ZERO
        );
    }

    #[test]
    fn uninitialized_ledger_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let err = Ledger::default().current_version(&conn).unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
    }

    #[test]
    fn custom_table_names_are_validated() {
        assert_eq!(Ledger::new("schema_ledger").unwrap().table(), "schema_ledger");
        assert!(Ledger::new("drop table;").is_err());
    }

    #[test]
    fn current_version_tracks_latest_record_per_version() {
        let (ledger, conn) = ledger();
        ledger.record_outcome(&conn, Version::new(1), true, at(0)).unwrap();
        ledger.record_outcome(&conn, Version::new(2), true, at(1)).unwrap();
        ledger.record_outcome(&conn, Version::new(3), true, at(2)).unwrap();
        assert_eq!(ledger.current_version(&conn).unwrap(), Version::new(3));

        ledger.record_outcome(&conn, Version::new(3), false, at(3)).unwrap();
        assert_eq!(ledger.current_version(&conn).unwrap(), Version::new(2));

        ledger.record_outcome(&conn, Version::new(3), true, at(4)).unwrap();
        assert_eq!(ledger.current_version(&conn).unwrap(), Version::new(3));
    }

    #[test]
    fn equal_timestamps_fall_back_to_insertion_order() {
        let (ledger, conn) = ledger();
        ledger.record_outcome(&conn, Version::new(5), true, at(0)).unwrap();
        ledger.record_outcome(&conn, Version::new(5), false, at(0)).unwrap();

        assert_eq!(ledger.current_version(&conn).unwrap(), Version::ZERO);
        let latest = ledger.latest(&conn, Version::new(5)).unwrap().unwrap();
        assert!(!latest.is_applied);
    }

    #[test]
    fn rejects_double_apply_and_orphan_revert() {
        let (ledger, conn) = ledger();
        let err = ledger
            .record_outcome(&conn, Version::new(1), false, at(0))
            .unwrap_err();
        assert!(err.to_string().contains("never applied"));

        ledger.record_outcome(&conn, Version::new(1), true, at(1)).unwrap();
        let err = ledger
            .record_outcome(&conn, Version::new(1), true, at(2))
            .unwrap_err();
        assert!(err.to_string().contains("already applied"));
    }

    #[test]
    fn rejects_timestamps_that_go_backwards() {
        let (ledger, conn) = ledger();
        ledger.record_outcome(&conn, Version::new(1), true, at(10)).unwrap();
        let err = ledger
            .record_outcome(&conn, Version::new(1), false, at(5))
            .unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
    }

    #[test]
    fn history_is_most_recent_first() {
        let (ledger, conn) = ledger();
        let v = Version::new(20240101);
        ledger.record_outcome(&conn, v, true, at(0)).unwrap();
        ledger.record_outcome(&conn, v, false, at(60)).unwrap();
        ledger.record_outcome(&conn, v, true, at(120)).unwrap();

        let history = ledger.history(&conn, v).unwrap();
        let states: Vec<bool> = history.iter().map(|r| r.is_applied).collect();
        assert_eq!(states, vec![true, false, true]);
        assert_eq!(history[0].timestamp, at(120));
        assert_eq!(history[2].timestamp, at(0));
        assert_eq!(history[1].timestamp - history[2].timestamp, Duration::seconds(60));
    }

    #[test]
    fn missing_version_has_no_records() {
        let (ledger, conn) = ledger();
        assert!(ledger.latest(&conn, Version::new(9)).unwrap().is_none());
        assert!(ledger.history(&conn, Version::new(9)).unwrap().is_empty());
    }

    #[test]
    fn timestamps_survive_storage_with_microsecond_precision() {
        let (ledger, conn) = ledger();
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        ledger.record_outcome(&conn, Version::new(1), true, ts).unwrap();
        let latest = ledger.latest(&conn, Version::new(1)).unwrap().unwrap();
        assert_eq!(latest.timestamp, ts);
    }

    #[test]
    fn parses_sqlite_datetime_format() {
        let ts = parse_timestamp("2024-01-02 03:04:05").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
