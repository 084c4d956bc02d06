//! Balance reporting over the allocation tally.
//!
//! K_i: Reports are pure reads; they never touch allocator state.

use crate::allocator::Tally;
use crate::models::Arm;
use crate::schema::Schema;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Nested counts: arm → variable → category → participants.
pub type CharacteristicsByArm = BTreeMap<Arm, BTreeMap<String, BTreeMap<String, u64>>>;

/// Counts of one category in each arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryBalance {
    pub category: String,
    pub counts: [u64; 2],
}

impl CategoryBalance {
    pub fn total(&self) -> u64 {
        self.counts[0] + self.counts[1]
    }

    /// Absolute difference between the arms.
    pub fn difference(&self) -> u64 {
        self.counts[0].abs_diff(self.counts[1])
    }

    /// Difference as a fraction of the category total (0 when empty).
    pub fn relative_difference(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.difference() as f64 / total as f64,
        }
    }
}

/// Category balances for one variable, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableBalance {
    pub variable: String,
    pub categories: Vec<CategoryBalance>,
}

/// Snapshot of the tally laid out for display and export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReport {
    pub arms: [String; 2],
    pub variables: Vec<VariableBalance>,
}

impl BalanceReport {
    /// Read every cell of `tally` in schema order.
    pub fn from_tally(schema: &Schema, tally: &Tally, arms: &[String; 2]) -> Self {
        let variables = schema
            .variables()
            .iter()
            .enumerate()
            .map(|(vi, var)| VariableBalance {
                variable: var.name().to_string(),
                categories: var
                    .categories()
                    .iter()
                    .enumerate()
                    .map(|(ci, cat)| CategoryBalance {
                        category: cat.clone(),
                        counts: [tally.count(Arm::A, vi, ci), tally.count(Arm::B, vi, ci)],
                    })
                    .collect(),
            })
            .collect();

        Self {
            arms: arms.clone(),
            variables,
        }
    }

    /// Nested arm → variable → category → count view.
    pub fn by_arm(&self) -> CharacteristicsByArm {
        Arm::ALL
            .iter()
            .map(|&arm| {
                let vars = self
                    .variables
                    .iter()
                    .map(|v| {
                        let cats = v
                            .categories
                            .iter()
                            .map(|c| (c.category.clone(), c.counts[arm.index()]))
                            .collect();
                        (v.variable.clone(), cats)
                    })
                    .collect();
                (arm, vars)
            })
            .collect()
    }

    pub fn variable(&self, name: &str) -> Option<&VariableBalance> {
        self.variables.iter().find(|v| v.variable == name)
    }

    /// Count for one cell, if the variable and category exist.
    pub fn count(&self, arm: Arm, variable: &str, category: &str) -> Option<u64> {
        self.variable(variable)?
            .categories
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.counts[arm.index()])
    }

    /// Largest per-category difference across all variables.
    pub fn max_difference(&self) -> u64 {
        self.variables
            .iter()
            .flat_map(|v| v.categories.iter())
            .map(CategoryBalance::difference)
            .max()
            .unwrap_or(0)
    }
}

impl fmt::Display for BalanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b] = &self.arms;
        let var_w = self
            .variables
            .iter()
            .map(|v| v.variable.len())
            .chain(std::iter::once("variable".len()))
            .max()
            .unwrap_or(8);
        let cat_w = self
            .variables
            .iter()
            .flat_map(|v| v.categories.iter().map(|c| c.category.len()))
            .chain(std::iter::once("category".len()))
            .max()
            .unwrap_or(8);
        let arm_w = a.len().max(b.len()).max(6);

        writeln!(
            f,
            "{:<var_w$}  {:<cat_w$}  {:>arm_w$}  {:>arm_w$}  {:>6}",
            "variable", "category", a, b, "diff"
        )?;
        for var in &self.variables {
            for (i, cat) in var.categories.iter().enumerate() {
                let name = if i == 0 { var.variable.as_str() } else { "" };
                writeln!(
                    f,
                    "{:<var_w$}  {:<cat_w$}  {:>arm_w$}  {:>arm_w$}  {:>6}",
                    name,
                    cat.category,
                    cat.counts[0],
                    cat.counts[1],
                    cat.difference()
                )?;
            }
        }
        Ok(())
    }
}
