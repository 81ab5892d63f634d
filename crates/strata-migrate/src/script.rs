use std::path::Path;

use rusqlite::Connection;
use strata_common::{CatalogError, Direction};

const UP_MARKER: &str = "-- +strata Up";
const DOWN_MARKER: &str = "-- +strata Down";

/// The forward and reverse operations of one migration unit.
///
/// Both run on the connection of an already-open transaction; the caller owns
/// commit and rollback.
pub trait Script: Send + Sync {
    fn up(&self, conn: &Connection) -> rusqlite::Result<()>;
    fn down(&self, conn: &Connection) -> rusqlite::Result<()>;

    fn run(&self, conn: &Connection, direction: Direction) -> rusqlite::Result<()> {
        match direction {
            Direction::Apply => self.up(conn),
            Direction::Revert => self.down(conn),
        }
    }
}

/// A `.sql` migration split into its `Up` and `Down` sections.
///
/// ```text
/// -- +strata Up
/// CREATE TABLE users (id INTEGER PRIMARY KEY);
///
/// -- +strata Down
/// DROP TABLE users;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlScript {
    up: String,
    down: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

impl SqlScript {
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| CatalogError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(&name, &contents)
    }

    /// Split `contents` on the section markers. `name` is only used in errors.
    pub fn parse(name: &str, contents: &str) -> Result<Self, CatalogError> {
        let mut up: Option<String> = None;
        let mut down: Option<String> = None;
        let mut section = Section::Preamble;

        for line in contents.lines() {
            let trimmed = line.trim();
            let next = if trimmed == UP_MARKER {
                Some(Section::Up)
            } else if trimmed == DOWN_MARKER {
                Some(Section::Down)
            } else {
                None
            };

            if let Some(next) = next {
                let slot = match next {
                    Section::Up => &mut up,
                    _ => &mut down,
                };
                if slot.is_some() {
                    return Err(CatalogError::InvalidScript {
                        name: name.to_string(),
                        reason: format!("duplicate '{trimmed}' section"),
                    });
                }
                *slot = Some(String::new());
                section = next;
                continue;
            }

            let target = match section {
                Section::Preamble => continue,
                Section::Up => up.as_mut(),
                Section::Down => down.as_mut(),
            };
            if let Some(buf) = target {
                buf.push_str(line);
                buf.push('\n');
            }
        }

        let up = up.ok_or_else(|| CatalogError::InvalidScript {
            name: name.to_string(),
            reason: format!("missing '{UP_MARKER}' section"),
        })?;

        Ok(Self {
            up,
            down: down.unwrap_or_default(),
        })
    }

    pub fn up_sql(&self) -> &str {
        &self.up
    }

    pub fn down_sql(&self) -> &str {
        &self.down
    }
}

impl Script for SqlScript {
    fn up(&self, conn: &Connection) -> rusqlite::Result<()> {
        run_batch(conn, &self.up)
    }

    fn down(&self, conn: &Connection) -> rusqlite::Result<()> {
        run_batch(conn, &self.down)
    }
}

fn run_batch(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    if sql.trim().is_empty() {
        return Ok(());
    }
    conn.execute_batch(sql)
}
