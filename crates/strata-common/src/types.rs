use std::fmt;

/// Numeric migration identifier. Ordering is plain integer ordering; zero is
/// the "nothing applied" sentinel and never names a real migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(i64);

impl Version {
    pub const ZERO: Version = Version(0);
    pub const MAX: Version = Version(i64::MAX);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way a migration step moves the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Apply,
    Revert,
}

impl Direction {
    /// The `is_applied` value the ledger records after a step in this direction.
    pub fn leaves_applied(self) -> bool {
        matches!(self, Direction::Apply)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Apply => f.write_str("apply"),
            Direction::Revert => f.write_str("revert"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_order_numerically() {
        let mut versions = vec![Version::new(20), Version::new(3), Version::new(100)];
        versions.sort();
        assert_eq!(
            versions,
            vec![Version::new(3), Version::new(20), Version::new(100)]
        );
        assert!(Version::ZERO < Version::new(1));
        assert!(Version::ZERO.is_zero());
    }

    #[test]
    fn direction_maps_to_ledger_state() {
        assert!(Direction::Apply.leaves_applied());
        assert!(!Direction::Revert.leaves_applied());
        assert_eq!(Direction::Revert.to_string(), "revert");
    }
}
