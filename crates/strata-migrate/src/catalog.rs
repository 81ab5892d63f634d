use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use strata_common::{CatalogError, Direction, Result, Version};
use tracing::{debug, info};

use crate::script::{Script, SqlScript};

const MIGRATION_EXTENSION: &str = "sql";

/// One migration unit known to the catalog.
pub struct MigrationDescriptor {
    version: Version,
    origin: String,
    script: Box<dyn Script>,
}

impl MigrationDescriptor {
    pub fn new(version: Version, origin: impl Into<String>, script: impl Script + 'static) -> Self {
        Self {
            version,
            origin: origin.into(),
            script: Box::new(script),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Display name, normally the migration file name.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn run(&self, conn: &Connection, direction: Direction) -> rusqlite::Result<()> {
        self.script.run(conn, direction)
    }
}

impl fmt::Debug for MigrationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDescriptor")
            .field("version", &self.version)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Migration units ordered by strictly ascending version.
#[derive(Debug, Default)]
pub struct Catalog {
    migrations: Vec<MigrationDescriptor>,
}

impl Catalog {
    /// Scan `dir` for `*.sql` migrations whose version lies in `[min, max]`.
    ///
    /// Entries without the `.sql` extension are skipped. The whole directory is
    /// checked for duplicate versions, not only the requested range.
    pub fn collect(dir: &Path, min: Version, max: Version) -> Result<Self> {
        let mut found: Vec<(Version, String, PathBuf)> = Vec::new();

        let entries = std::fs::read_dir(dir).map_err(|source| CatalogError::Unreadable {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| CatalogError::Unreadable {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(MIGRATION_EXTENSION)
            {
                continue;
            }

            let name = entry.file_name().into_string().map_err(|raw| {
                CatalogError::UnparseableName {
                    name: raw.to_string_lossy().into_owned(),
                    reason: "file name is not valid UTF-8".into(),
                }
            })?;
            let version = parse_version(&name)?;
            found.push((version, name, path));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        if let Some(pair) = found.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(CatalogError::DuplicateVersion {
                version: pair[0].0,
                first: pair[0].1.clone(),
                second: pair[1].1.clone(),
            }
            .into());
        }

        let mut migrations = Vec::new();
        for (version, name, path) in found {
            if version < min || version > max {
                continue;
            }
            let script = SqlScript::from_file(&path)?;
            migrations.push(MigrationDescriptor::new(version, name, script));
        }

        info!(
            "collected {} migration(s) from {}",
            migrations.len(),
            dir.display()
        );
        Ok(Self { migrations })
    }

    /// Build a catalog from already-constructed descriptors, applying the same
    /// range filter and duplicate check as [`Catalog::collect`].
    pub fn from_descriptors(
        mut descriptors: Vec<MigrationDescriptor>,
        min: Version,
        max: Version,
    ) -> Result<Self> {
        descriptors.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.origin.cmp(&b.origin))
        });
        if let Some(pair) = descriptors
            .windows(2)
            .find(|w| w[0].version == w[1].version)
        {
            return Err(CatalogError::DuplicateVersion {
                version: pair[0].version,
                first: pair[0].origin.clone(),
                second: pair[1].origin.clone(),
            }
            .into());
        }

        descriptors.retain(|m| m.version >= min && m.version <= max);
        debug!("catalog built from {} descriptor(s)", descriptors.len());
        Ok(Self {
            migrations: descriptors,
        })
    }

    pub fn migrations(&self) -> &[MigrationDescriptor] {
        &self.migrations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MigrationDescriptor> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn get(&self, version: Version) -> Option<&MigrationDescriptor> {
        self.migrations
            .binary_search_by(|m| m.version.cmp(&version))
            .ok()
            .map(|idx| &self.migrations[idx])
    }

    /// Highest version in the catalog, or [`Version::ZERO`] when empty.
    pub fn latest_version(&self) -> Version {
        self.migrations
            .last()
            .map(|m| m.version)
            .unwrap_or(Version::ZERO)
    }

    /// Greatest catalog version strictly below `current`, or [`Version::ZERO`].
    pub fn previous_version(&self, current: Version) -> Version {
        self.migrations
            .iter()
            .rev()
            .map(|m| m.version)
            .find(|v| *v < current)
            .unwrap_or(Version::ZERO)
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a MigrationDescriptor;
    type IntoIter = std::slice::Iter<'a, MigrationDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.iter()
    }
}

/// Most recent migration version available in `dir`, or zero when there are none.
pub fn most_recent_version(dir: &Path) -> Result<Version> {
    let catalog = Catalog::collect(dir, Version::ZERO, Version::MAX)?;
    Ok(catalog.latest_version())
}

/// Extract the version from a migration file name: `20240101120000_add_users.sql`
/// yields `20240101120000`.
pub fn parse_version(name: &str) -> std::result::Result<Version, CatalogError> {
    let unparseable = |reason: &str| CatalogError::UnparseableName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let (prefix, _) = name
        .split_once('_')
        .ok_or_else(|| unparseable("no '_' separator after the version"))?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unparseable("version prefix is not a number"));
    }
    let value: i64 = prefix
        .parse()
        .map_err(|e| unparseable(&format!("version prefix out of range: {e}")))?;
    if value <= 0 {
        return Err(unparseable("version must be greater than zero"));
    }
    Ok(Version::new(value))
}
