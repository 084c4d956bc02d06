//! Per-arm category counts.

use crate::models::Arm;
use crate::schema::{Profile, Schema};

/// Count table indexed by (arm, variable index, category index).
///
/// K_i: Shape is fixed by the schema; counts only grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    counts: [Vec<Vec<u64>>; 2],
}

impl Tally {
    /// Zeroed table for every (arm, variable, category) of `schema`.
    pub fn new(schema: &Schema) -> Self {
        let zeroed: Vec<Vec<u64>> = schema
            .variables()
            .iter()
            .map(|v| vec![0; v.categories().len()])
            .collect();
        Self {
            counts: [zeroed.clone(), zeroed],
        }
    }

    /// Count for one cell. Out-of-range indices read as zero.
    pub fn count(&self, arm: Arm, variable: usize, category: usize) -> u64 {
        self.counts[arm.index()]
            .get(variable)
            .and_then(|cats| cats.get(category))
            .copied()
            .unwrap_or(0)
    }

    /// Counts for every category of one variable in one arm.
    pub fn variable_counts(&self, arm: Arm, variable: usize) -> &[u64] {
        self.counts[arm.index()]
            .get(variable)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Hypothetical imbalance score for placing `profile` in `arm`:
    /// the sum over variables of the arm's count for the participant's
    /// category, plus one for the participant.
    ///
    /// `profile` must come from the schema this tally was built for.
    pub(crate) fn score(&self, arm: Arm, profile: &Profile) -> u64 {
        profile
            .cells()
            .map(|(var, cat)| self.counts[arm.index()][var][cat] + 1)
            .sum()
    }

    /// Add one participant to `arm`.
    pub(crate) fn record(&mut self, arm: Arm, profile: &Profile) {
        let table = &mut self.counts[arm.index()];
        for (var, cat) in profile.cells() {
            table[var][cat] += 1;
        }
    }

    /// Sum of one variable's category counts in one arm; equals the number
    /// of participants in that arm.
    pub fn variable_total(&self, arm: Arm, variable: usize) -> u64 {
        self.variable_counts(arm, variable).iter().sum()
    }
}
