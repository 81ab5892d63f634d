use std::cmp::Ordering;

use strata_common::{Direction, Error, Result, Version};

use crate::catalog::{Catalog, MigrationDescriptor};

/// One migration to run, and which way.
#[derive(Debug, Clone, Copy)]
pub struct PlanStep<'a> {
    pub migration: &'a MigrationDescriptor,
    pub direction: Direction,
}

impl PlanStep<'_> {
    pub fn version(&self) -> Version {
        self.migration.version()
    }
}

/// Ordered steps that move the database from one version to another.
/// Built per invocation and never persisted.
#[derive(Debug, Default)]
pub struct ResolutionPlan<'a> {
    steps: Vec<PlanStep<'a>>,
}

impl<'a> ResolutionPlan<'a> {
    pub fn steps(&self) -> &[PlanStep<'a>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanStep<'a>> {
        self.steps.iter()
    }
}

/// Compute the steps between `current` and `target`.
///
/// Upward plans apply every catalog version in `(current, target]` ascending.
/// Downward plans revert every catalog version in `(target, current]`
/// descending. Equal versions give an empty plan.
pub fn plan(catalog: &Catalog, current: Version, target: Version) -> Result<ResolutionPlan<'_>> {
    let steps: Vec<PlanStep<'_>> = match target.cmp(&current) {
        Ordering::Equal => Vec::new(),
        Ordering::Greater => catalog
            .iter()
            .filter(|m| m.version() > current && m.version() <= target)
            .map(|migration| PlanStep {
                migration,
                direction: Direction::Apply,
            })
            .collect(),
        Ordering::Less => catalog
            .iter()
            .rev()
            .filter(|m| m.version() > target && m.version() <= current)
            .map(|migration| PlanStep {
                migration,
                direction: Direction::Revert,
            })
            .collect(),
    };

    let ordered = steps.windows(2).all(|w| match w[0].direction {
        Direction::Apply => w[0].version() < w[1].version(),
        Direction::Revert => w[0].version() > w[1].version(),
    });
    if !ordered {
        return Err(Error::Internal(format!(
            "catalog yielded non-unique or unordered versions between {current} and {target}"
        )));
    }

    Ok(ResolutionPlan { steps })
}
