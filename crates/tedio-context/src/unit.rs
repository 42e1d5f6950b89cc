//! Execution-unit identifiers.

use std::fmt;

/// Identifies one asynchronous execution unit for as long as it lives.
///
/// Identifiers are handed out in increasing order by the runtime and are
/// never reused. [`UnitId::ROOT`] is reported while no unit is executing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    pub const ROOT: UnitId = UnitId(0);

    pub(crate) const fn new(raw: u64) -> Self {
        UnitId(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of work a unit represents.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnitKind {
    /// A spawned future. Resumed once per poll.
    Task,
    /// A callback deferred to the start of the next turn.
    Tick,
    /// A callback fired once its deadline passes.
    Timeout,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitKind::Task => "task",
            UnitKind::Tick => "tick",
            UnitKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_zero_and_displays_raw_value() {
        assert!(UnitId::ROOT.is_root());
        assert_eq!(UnitId::ROOT.as_u64(), 0);

        let unit = UnitId::new(42);
        assert!(!unit.is_root());
        assert_eq!(unit.as_u64(), 42);
        assert_eq!(unit.to_string(), "42");
        assert_eq!(UnitKind::Timeout.to_string(), "timeout");
    }
}
