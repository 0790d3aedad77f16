use crate::core::error::{ConfigError, StageError};
use crate::core::state::{EPS, TrialState};
use crate::core::tax::{RmdTable, RmdTableProvider};
use crate::core::types::TaxStatus;

/// Outcome of one year's required minimum distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredDistribution {
    pub amount: f64,
    /// Accounts that gave up money, in withdrawal order.
    pub distributions: Vec<(String, f64)>,
}

impl RequiredDistribution {
    pub fn distributed_from(&self, id: &str) -> f64 {
        self.distributions
            .iter()
            .find(|(account, _)| account == id)
            .map_or(0.0, |(_, amount)| *amount)
    }
}

/// Distribution period for a distribution taken at `age`. The table is
/// indexed by the age attained at the end of the prior year, so the lookup
/// uses `age - 1`.
pub fn distribution_factor(table: &RmdTable, age: u32, table_year: i32) -> Result<f64, ConfigError> {
    let attained = age.saturating_sub(1);
    table
        .distribution_period(attained)
        .filter(|period| *period > 0.0)
        .ok_or(ConfigError::MissingRmdFactor {
            age: attained,
            year: table_year,
        })
}

/// Required amount is the sum of the balances over `factor`; it is drawn
/// from the accounts in the given order, each capped at its balance.
pub fn plan_distribution(balances: &[(String, f64)], factor: f64) -> RequiredDistribution {
    let total: f64 = balances.iter().map(|(_, b)| b.max(0.0)).sum();
    if total <= 0.0 || factor <= 0.0 {
        return RequiredDistribution {
            amount: 0.0,
            distributions: Vec::new(),
        };
    }

    let amount = total / factor;
    let mut remaining = amount;
    let mut distributions = Vec::new();
    for (id, balance) in balances {
        if remaining <= EPS {
            break;
        }
        let take = remaining.min(balance.max(0.0));
        if take > 0.0 {
            distributions.push((id.clone(), take));
            remaining -= take;
        }
    }

    RequiredDistribution {
        amount,
        distributions,
    }
}

pub(super) fn apply(state: &mut TrialState, tables: &dyn RmdTableProvider) -> Result<(), StageError> {
    let age = state.primary_age();
    if age < state.rmd_start_age {
        return Ok(());
    }

    // Strategy order first; pre-tax accounts missing from it still count
    // toward the required amount and are drawn last.
    let mut order: Vec<usize> = state
        .strategies
        .rmd
        .iter()
        .copied()
        .filter(|&idx| state.investments[idx].tax_status == TaxStatus::PreTax)
        .collect();
    for (idx, record) in state.investments.iter().enumerate() {
        if record.tax_status == TaxStatus::PreTax && !order.contains(&idx) {
            order.push(idx);
        }
    }
    if order.is_empty() {
        return Ok(());
    }

    let table_year = state.year - 1;
    let table = tables
        .rmd_table(table_year)
        .ok_or(ConfigError::MissingRmdTable(table_year))?;
    let factor = distribution_factor(table, age, table_year)?;

    let balances: Vec<(String, f64)> = order
        .iter()
        .map(|&idx| (state.investments[idx].id.clone(), state.investments[idx].value))
        .collect();
    let plan = plan_distribution(&balances, factor);
    for (id, amount) in &plan.distributions {
        let idx = state.investment_index(id, "RMD strategy")?;
        state.liquidate(idx, *amount);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::fixtures::{base_scenario, investment, state_for};
    use crate::core::tax::UniformLifetimeTable;

    fn assert_cents(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 0.005,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn factor_uses_age_attained_in_prior_year() {
        let table = RmdTable::from_pairs(&[(73, 26.5), (74, 25.5)]);
        assert_eq!(distribution_factor(&table, 74, 2039).expect("factor"), 26.5);
    }

    #[test]
    fn missing_factor_is_a_configuration_error() {
        let table = RmdTable::from_pairs(&[(73, 26.5)]);
        let err = distribution_factor(&table, 80, 2045).expect_err("missing age");
        assert_eq!(err, ConfigError::MissingRmdFactor { age: 79, year: 2045 });
    }

    #[test]
    fn single_pretax_account_takes_whole_distribution() {
        let plan = plan_distribution(&[("pretax".to_string(), 100_000.0)], 25.5);
        assert_cents(plan.amount, 3_921.57);
        assert_eq!(plan.distributions.len(), 1);
        assert_cents(plan.distributed_from("pretax"), 3_921.57);
    }

    #[test]
    fn distribution_follows_strategy_order() {
        let forward = plan_distribution(
            &[("pretax1".to_string(), 100_000.0), ("pretax2".to_string(), 200_000.0)],
            25.5,
        );
        assert_cents(forward.amount, 11_764.71);
        assert_cents(forward.distributed_from("pretax1"), 11_764.71);
        assert_eq!(forward.distributed_from("pretax2"), 0.0);

        let reversed = plan_distribution(
            &[("pretax2".to_string(), 200_000.0), ("pretax1".to_string(), 100_000.0)],
            25.5,
        );
        assert_cents(reversed.distributed_from("pretax2"), 11_764.71);
        assert_eq!(reversed.distributed_from("pretax1"), 0.0);
    }

    #[test]
    fn small_first_account_spills_into_next() {
        let plan = plan_distribution(
            &[("small".to_string(), 1_000.0), ("large".to_string(), 254_000.0)],
            25.5,
        );
        assert_cents(plan.amount, 10_000.0);
        assert_cents(plan.distributed_from("small"), 1_000.0);
        assert_cents(plan.distributed_from("large"), 9_000.0);
    }

    #[test]
    fn zero_balance_yields_empty_distribution() {
        let plan = plan_distribution(&[], 25.5);
        assert_eq!(plan.amount, 0.0);
        assert!(plan.distributions.is_empty());
    }

    #[test]
    fn stage_moves_distribution_into_cash_as_income() {
        let mut scenario = base_scenario();
        scenario.owner.birth_year = 1951; // 74 in 2025
        scenario.investments.push(investment("ira", "index", 100_000.0, TaxStatus::PreTax));
        scenario.rmd_strategy = vec!["ira".to_string()];
        let mut state = state_for(scenario, 1);

        apply(&mut state, &UniformLifetimeTable::default()).expect("rmd");
        // age 74 uses the age-73 period of 26.5
        let expected = 100_000.0 / 26.5;
        assert!((state.current.income - expected).abs() < 1e-6);
        assert!((state.cash_value() - (10_000.0 + expected)).abs() < 1e-6);
        assert_eq!(state.current.early_withdrawals, 0.0);
    }

    #[test]
    fn stage_is_skipped_before_start_age() {
        let mut scenario = base_scenario();
        scenario.investments.push(investment("ira", "index", 100_000.0, TaxStatus::PreTax));
        let mut state = state_for(scenario, 1);

        apply(&mut state, &UniformLifetimeTable::default()).expect("rmd");
        assert_eq!(state.current.income, 0.0);
    }
}
