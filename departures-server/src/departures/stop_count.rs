//! Counting the stops left after a station.

use std::collections::HashSet;

use crate::domain::{Route, StationId};

/// Restricts stop counting on lines whose name contains `line_marker`.
///
/// Routes on such lines list every station of the trunk, but riders only
/// care about the branch stations in `stations`; only those are counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRule {
    pub line_marker: String,
    pub stations: HashSet<StationId>,
}

impl BranchRule {
    pub fn new(line_marker: impl Into<String>, stations: impl IntoIterator<Item = StationId>) -> Self {
        Self {
            line_marker: line_marker.into(),
            stations: stations.into_iter().collect(),
        }
    }

    fn applies_to(&self, line: &str) -> bool {
        line.contains(&self.line_marker)
    }
}

/// Counts the stops a train still makes after a given station.
///
/// Without branch rules every later stop counts. The first rule whose
/// marker occurs in the line name narrows the count to its stations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopCounter {
    branch_rules: Vec<BranchRule>,
}

impl StopCounter {
    pub fn new(branch_rules: Vec<BranchRule>) -> Self {
        Self { branch_rules }
    }

    pub fn branch_rules(&self) -> &[BranchRule] {
        &self.branch_rules
    }

    /// Stops of `route` strictly after `from`, on a train of `line`.
    pub fn count(&self, route: &Route, from: &StationId, line: &str) -> usize {
        let after = route.stops_after(from);
        match self.branch_rules.iter().find(|rule| rule.applies_to(line)) {
            Some(rule) => after
                .iter()
                .filter(|stop| rule.stations.contains(&stop.station_id))
                .count(),
            None => after.len(),
        }
    }
}
