use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::Connection;
use strata_config::DbConf;
use strata_migrate::{Catalog, Ledger, Version, execute, open_database, plan, report};
use tracing::info;

/// Everything a command needs once configuration is resolved.
struct Session {
    conn: Connection,
    ledger: Ledger,
}

fn connect(conf: &DbConf) -> Result<Session> {
    let conn = open_database(conf)
        .with_context(|| format!("couldn't open database for environment '{}'", conf.env))?;
    let ledger = Ledger::from_conf(conf)?;
    // A pristine database has no ledger table yet.
    ledger.ensure_initialized(&conn)?;
    Ok(Session { conn, ledger })
}

fn collect(conf: &DbConf) -> Result<Catalog> {
    Catalog::collect(&conf.migrations_dir, Version::ZERO, Version::MAX).with_context(|| {
        format!(
            "failed to collect migrations from {}",
            conf.migrations_dir.display()
        )
    })
}

pub fn up(conf: &DbConf) -> Result<()> {
    let catalog = collect(conf)?;
    let target = catalog.latest_version();
    let mut session = connect(conf)?;

    let current = session.ledger.current_version(&session.conn)?;
    let steps = plan(&catalog, current, target)?;
    if steps.is_empty() {
        println!("strata: no migrations to run. current version: {current}");
        return Ok(());
    }

    println!(
        "strata: migrating db environment '{}', current version: {current}, target: {target}",
        conf.env
    );
    let summary = execute(&mut session.conn, &session.ledger, &steps)?;
    println!("strata: {} migration(s) applied", summary.completed);
    Ok(())
}

pub fn down(conf: &DbConf) -> Result<()> {
    let catalog = collect(conf)?;
    let mut session = connect(conf)?;

    let current = session.ledger.current_version(&session.conn)?;
    if current.is_zero() {
        bail!("no migrations to roll back");
    }
    if catalog.get(current).is_none() {
        bail!("migration file for applied version {current} not found");
    }

    let previous = catalog.previous_version(current);
    let steps = plan(&catalog, current, previous)?;
    println!(
        "strata: rolling back db environment '{}' from {current} to {previous}",
        conf.env
    );
    let summary = execute(&mut session.conn, &session.ledger, &steps)?;
    println!("strata: {} migration(s) reverted", summary.completed);
    Ok(())
}

pub fn status(conf: &DbConf) -> Result<()> {
    let catalog = collect(conf)?;
    let session = connect(conf)?;

    let status = report(&catalog, &session.ledger, &session.conn)?;
    println!("strata: status for environment '{}'", conf.env);
    print!("{status}");
    Ok(())
}

pub fn dbversion(conf: &DbConf) -> Result<()> {
    let session = connect(conf)?;
    let current = session.ledger.current_version(&session.conn)?;
    println!("strata: dbversion {current}");
    Ok(())
}

/// Write an empty migration named `<UTC timestamp>_<name>.sql` into `dir`.
pub fn create(dir: &Path, name: &str) -> Result<PathBuf> {
    let slug = slugify(name);
    if slug.is_empty() {
        bail!("migration name must contain at least one letter or digit");
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let version = Utc::now().format("%Y%m%d%H%M%S");
    let path = dir.join(format!("{version}_{slug}.sql"));
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    std::fs::write(&path, TEMPLATE).with_context(|| format!("failed to write {}", path.display()))?;
    info!("created migration {}", path.display());
    Ok(path)
}

const TEMPLATE: &str = "\
-- +strata Up
-- SQL in this section runs when the migration is applied.


-- +strata Down
-- SQL in this section runs when the migration is rolled back.
";

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}
