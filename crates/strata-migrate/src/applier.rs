use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use strata_common::{Error, Result};
use tracing::{error, info, warn};

use crate::ledger::Ledger;
use crate::resolver::{PlanStep, ResolutionPlan};

/// How far an execution got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub completed: usize,
    /// The cancellation flag was raised before every step could start.
    pub cancelled: bool,
}

/// Runs a [`ResolutionPlan`] step by step, each step in its own transaction.
///
/// A failing step is rolled back and ends the run. Steps committed before it
/// stay committed, so the ledger's current version is the resume point.
pub struct Applier<'l> {
    ledger: &'l Ledger,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'l> Applier<'l> {
    pub fn new(ledger: &'l Ledger) -> Self {
        Self {
            ledger,
            cancel: None,
        }
    }

    /// Check `flag` before each step and stop once it is set. A step that has
    /// already started always runs to commit or rollback.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn execute(
        &self,
        conn: &mut Connection,
        plan: &ResolutionPlan<'_>,
    ) -> Result<ExecutionSummary> {
        let mut completed = 0;

        for step in plan.iter() {
            if self.cancelled() {
                warn!(
                    "cancelled before {} {}; {completed} of {} step(s) committed",
                    step.direction,
                    step.version(),
                    plan.len()
                );
                return Ok(ExecutionSummary {
                    completed,
                    cancelled: true,
                });
            }

            if let Err(cause) = self.run_step(conn, step) {
                error!(
                    "{} {} failed: {cause}",
                    step.direction,
                    step.migration.origin()
                );
                return Err(Error::Application {
                    version: step.version(),
                    direction: step.direction,
                    completed,
                    cause,
                });
            }

            info!("{} {}", step.direction, step.migration.origin());
            completed += 1;
        }

        Ok(ExecutionSummary {
            completed,
            cancelled: false,
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Run one step and its ledger write in a single transaction. Dropping the
    /// transaction on any early return rolls it back.
    fn run_step(
        &self,
        conn: &mut Connection,
        step: &PlanStep<'_>,
    ) -> std::result::Result<(), String> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| format!("failed to begin transaction: {e}"))?;

        step.migration
            .run(&tx, step.direction)
            .map_err(|e| e.to_string())?;

        // Never stamp earlier than the version's last record, even if the
        // clock moved backwards since it was written.
        let now = Utc::now();
        let stamp = match self
            .ledger
            .latest(&tx, step.version())
            .map_err(|e| e.to_string())?
        {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        self.ledger
            .record_outcome(&tx, step.version(), step.direction.leaves_applied(), stamp)
            .map_err(|e| e.to_string())?;

        tx.commit()
            .map_err(|e| format!("failed to commit transaction: {e}"))
    }
}

/// Run `plan` against `conn`, recording each step in `ledger`.
pub fn execute(
    conn: &mut Connection,
    ledger: &Ledger,
    plan: &ResolutionPlan<'_>,
) -> Result<ExecutionSummary> {
    Applier::new(ledger).execute(conn, plan)
}
