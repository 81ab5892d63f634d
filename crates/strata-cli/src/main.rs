mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strata_config::ConfigLoader;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata", version, about = "Apply and inspect versioned SQL migrations")]
struct Cli {
    /// Directory holding dbconf.yml and the migrations/ folder
    #[arg(long, global = true, default_value = "db", env = "STRATA_PATH")]
    path: PathBuf,

    /// Environment entry to use from dbconf.yml
    #[arg(long, global = true, default_value = "development", env = "STRATA_ENV")]
    env: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Migrate the DB to the most recent version available
    Up,
    /// Roll back the most recently applied migration
    Down,
    /// Dump the migration status for the current DB
    Status,
    /// Print the current version of the database
    Dbversion,
    /// Create a new timestamped migration file
    Create {
        /// Short description used in the file name
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let loader = ConfigLoader::new(&cli.path);
    let load = || {
        loader
            .load(&cli.env)
            .with_context(|| format!("failed to load configuration from {}", cli.path.display()))
    };

    match cli.command {
        Command::Up => commands::up(&load()?),
        Command::Down => commands::down(&load()?),
        Command::Status => commands::status(&load()?),
        Command::Dbversion => commands::dbversion(&load()?),
        // Only needs the migrations directory, not a working database.
        Command::Create { name } => {
            let path = commands::create(&loader.db_dir().join("migrations"), &name)?;
            println!("strata: created {}", path.display());
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
