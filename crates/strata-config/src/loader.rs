use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::debug;

use crate::model::{
    DEFAULT_LEDGER_TABLE, DbConf, DbDriver, DriverKind, EnvironmentConfig, validate_table_name,
};

const CONFIG_FILES: [&str; 3] = ["dbconf.yml", "dbconf.yaml", "dbconf.toml"];

/// Reads the per-environment database configuration out of a db directory.
///
/// The directory holds one `dbconf.*` file and a `migrations/` subdirectory.
pub struct ConfigLoader {
    db_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(db_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_dir: db_dir.into(),
        }
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    /// Locate the config file. YAML wins over TOML when both exist.
    pub fn config_path(&self) -> Result<PathBuf> {
        CONFIG_FILES
            .iter()
            .map(|name| self.db_dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                Error::Config(format!(
                    "no dbconf.yml or dbconf.toml found in {}",
                    self.db_dir.display()
                ))
            })
    }

    /// Resolve the named environment into a [`DbConf`].
    pub fn load(&self, env: &str) -> Result<DbConf> {
        let path = self.config_path()?;
        let environments = read_environments(&path)?;

        let entry = environments.get(env).ok_or_else(|| {
            Error::Config(format!(
                "environment '{env}' not found in {}",
                path.display()
            ))
        })?;

        let conf = resolve(&self.db_dir, env, entry)?;
        debug!(
            "loaded environment '{env}' from {} (driver {})",
            path.display(),
            conf.driver.name
        );
        Ok(conf)
    }
}

fn read_environments(path: &Path) -> Result<BTreeMap<String, EnvironmentConfig>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}

fn resolve(db_dir: &Path, env: &str, entry: &EnvironmentConfig) -> Result<DbConf> {
    let name = expand_env(&entry.driver);
    let open = expand_env(&entry.open);
    let kind = DriverKind::from_name(&name)?;

    if open.is_empty() {
        return Err(Error::Config(format!(
            "environment '{env}' has an empty open string"
        )));
    }

    let table = entry
        .table
        .clone()
        .unwrap_or_else(|| DEFAULT_LEDGER_TABLE.to_string());
    validate_table_name(&table)?;

    Ok(DbConf {
        migrations_dir: db_dir.join("migrations"),
        env: env.to_string(),
        driver: DbDriver { name, kind, open },
        table,
    })
}

/// Expand `$VAR` and `${VAR}` references from the process environment.
/// Unset variables expand to the empty string.
pub fn expand_env(input: &str) -> String {
    expand_env_with(input, |key| std::env::var(key).ok())
}

/// Like [`expand_env`], with an explicit variable lookup.
pub fn expand_env_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    out.push_str(&lookup(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    // Unterminated brace: only the `${` is dropped.
                    rest = braced;
                }
            }
            continue;
        }

        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if name_len == 0 {
            out.push('$');
        } else {
            out.push_str(&lookup(&after[..name_len]).unwrap_or_default());
        }
        rest = &after[name_len..];
    }

    out.push_str(rest);
    out
}
