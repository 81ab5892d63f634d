//! Resolution and application engine for versioned SQL migrations.
//!
//! The flow is always the same: [`Catalog::collect`] scans the migration
//! directory, [`Ledger::current_version`] reads where the database stands,
//! [`plan`] computes the steps between the two, [`execute`] runs them one
//! transaction at a time, and [`report`] joins catalog and ledger for display.

pub mod applier;
pub mod catalog;
pub mod db;
pub mod ledger;
pub mod resolver;
pub mod script;
pub mod status;

pub use applier::{Applier, ExecutionSummary, execute};
pub use catalog::{Catalog, MigrationDescriptor, most_recent_version, parse_version};
pub use db::open_database;
pub use ledger::{Ledger, LedgerRecord};
pub use resolver::{PlanStep, ResolutionPlan, plan};
pub use script::{Script, SqlScript};
pub use status::{StatusEntry, StatusReport, report};
pub use strata_common::{CatalogError, Direction, Error, Result, Version};
