//! The year-step pipeline. Stages run in a fixed order once per simulated
//! year and mutate the trial's state in place.

mod allocation;
mod conversion;
mod expenses;
mod growth;
mod income;
mod rmd;

use std::fmt;

use super::error::StageError;
use super::state::TrialState;
use super::tax::RmdTableProvider;

pub use allocation::{AllocationSlot, plan_purchases, rebalance_targets};
pub use rmd::{RequiredDistribution, distribution_factor, plan_distribution};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    Income,
    RequiredDistribution,
    Growth,
    RothConversion,
    Expenses,
    Discretionary,
    Allocation,
    Indexing,
}

impl Stage {
    /// Growth precedes conversion and every liquidation, so both see this
    /// year's balances.
    pub const ORDER: [Stage; 8] = [
        Stage::Income,
        Stage::RequiredDistribution,
        Stage::Growth,
        Stage::RothConversion,
        Stage::Expenses,
        Stage::Discretionary,
        Stage::Allocation,
        Stage::Indexing,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Income => "income",
            Stage::RequiredDistribution => "required minimum distribution",
            Stage::Growth => "investment growth",
            Stage::RothConversion => "roth conversion",
            Stage::Expenses => "non-discretionary expenses and taxes",
            Stage::Discretionary => "discretionary expenses",
            Stage::Allocation => "investment and rebalance events",
            Stage::Indexing => "tax indexing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Runs every stage for `state.year`. `position` tracks the stage in
/// progress so a caller can report where a trial stopped.
pub(crate) fn run_year(
    state: &mut TrialState,
    rmd_tables: &dyn RmdTableProvider,
    position: &mut Option<Stage>,
) -> Result<(), StageError> {
    for stage in Stage::ORDER {
        *position = Some(stage);
        match stage {
            Stage::Income => income::apply(state),
            Stage::RequiredDistribution => rmd::apply(state, rmd_tables)?,
            Stage::Growth => growth::apply(state)?,
            Stage::RothConversion => conversion::apply(state)?,
            Stage::Expenses => expenses::pay_mandatory(state)?,
            Stage::Discretionary => expenses::pay_discretionary(state)?,
            Stage::Allocation => allocation::apply(state)?,
            Stage::Indexing => index_thresholds(state),
        }
    }
    Ok(())
}

/// Shifts next year's thresholds and the contribution limit by this
/// year's inflation draw. This year's tables are kept for taxing this
/// year's income next year.
fn index_thresholds(state: &mut TrialState) {
    let inflation = state.inflation;
    state.prior_tax = state.tax.clone();
    state.tax.index(inflation);
    state.contribution_limit *= 1.0 + inflation / 100.0;
}
