use std::collections::BTreeSet;

use crate::core::error::ConfigError;
use crate::core::sampler::sample;
use crate::core::state::TrialState;
use crate::core::types::{EventKind, TaxStatus};

/// Grows every investment named by an active investment event's
/// allocation: income first, then return, then the expense-ratio fee on the
/// average of the starting and grown balance.
pub(super) fn apply(state: &mut TrialState) -> Result<(), ConfigError> {
    for idx in allocated_investments(state)? {
        let record = &state.investments[idx];
        let ty = &state.investment_types[record.type_index];
        let income_spec = ty.expected_annual_income;
        let return_spec = ty.expected_annual_return;
        let expense_ratio = ty.expense_ratio;
        let taxable = ty.taxable;
        let before = record.value;

        let income = income_spec.delta(before, sample(&income_spec, &mut state.rng));
        let growth_draw = sample(&return_spec, &mut state.rng);

        let record = &mut state.investments[idx];
        record.value += income;
        record.purchase_price += income;
        record.value = return_spec.apply(record.value, growth_draw);
        let fee = expense_ratio / 100.0 * (before + record.value) / 2.0;
        record.value = (record.value - fee).max(0.0);

        if record.tax_status == TaxStatus::NonRetirement && taxable {
            state.current.income += income;
        }
    }
    Ok(())
}

fn allocated_investments(state: &TrialState) -> Result<BTreeSet<usize>, ConfigError> {
    let mut targets = BTreeSet::new();
    for record in &state.events {
        if !record.window.is_active(state.year) {
            continue;
        }
        let EventKind::Invest(invest) = &record.event.kind else {
            continue;
        };
        for allocation in &invest.allocations {
            for id in allocation.investments() {
                targets.insert(state.investment_index(id, &record.event.name)?);
            }
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::fixtures::{base_scenario, investment, state_for};
    use crate::core::types::{
        AssetAllocation, Event, EventDuration, EventStart, FixedTarget, InvestEvent,
        InvestmentType, StochasticValue, ValueType,
    };

    fn invest_in(ids: &[&str], start: i32) -> Event {
        let share = 100.0 / ids.len() as f64;
        Event {
            name: "invest".to_string(),
            description: String::new(),
            start: EventStart::Fixed { year: start },
            duration: EventDuration::Fixed { years: 30 },
            kind: EventKind::Invest(InvestEvent {
                allocations: vec![AssetAllocation::Fixed {
                    targets: ids
                        .iter()
                        .map(|id| FixedTarget {
                            investment: id.to_string(),
                            percent: share,
                        })
                        .collect(),
                }],
                max_cash: 0.0,
            }),
        }
    }

    fn dividend_fund() -> InvestmentType {
        InvestmentType {
            name: "dividend".to_string(),
            description: String::new(),
            expected_annual_return: StochasticValue::Fixed {
                value: 10.0,
                value_type: ValueType::Percentage,
            },
            expense_ratio: 1.0,
            expected_annual_income: StochasticValue::Fixed {
                value: 2.0,
                value_type: ValueType::Percentage,
            },
            taxable: true,
        }
    }

    #[test]
    fn growth_applies_income_return_then_fee() {
        let mut scenario = base_scenario();
        scenario.investment_types.push(dividend_fund());
        scenario.investments.push(investment("fund", "dividend", 1_000.0, TaxStatus::NonRetirement));
        scenario.events = vec![invest_in(&["fund"], 2025)];
        let mut state = state_for(scenario, 1);

        apply(&mut state).expect("growth");
        // 1000 + 20 income = 1020, grown 10% = 1122, fee 1% of avg(1000, 1122)
        let expected = 1_122.0 - 0.01 * (1_000.0 + 1_122.0) / 2.0;
        let fund = &state.investments[1];
        assert!((fund.value - expected).abs() < 1e-9);
        assert!((fund.purchase_price - 1_020.0).abs() < 1e-9);
        assert!((state.current.income - 20.0).abs() < 1e-9);
    }

    #[test]
    fn retirement_income_is_not_taxable_this_year() {
        let mut scenario = base_scenario();
        scenario.investment_types.push(dividend_fund());
        scenario.investments.push(investment("ira", "dividend", 1_000.0, TaxStatus::PreTax));
        scenario.events = vec![invest_in(&["ira"], 2025)];
        let mut state = state_for(scenario, 1);

        apply(&mut state).expect("growth");
        assert_eq!(state.current.income, 0.0);
        assert!(state.investments[1].value > 1_000.0);
    }

    #[test]
    fn investments_outside_active_allocations_do_not_grow() {
        let mut scenario = base_scenario();
        scenario.investment_types.push(dividend_fund());
        scenario.investments.push(investment("fund", "dividend", 1_000.0, TaxStatus::NonRetirement));
        scenario.events = vec![invest_in(&["fund"], 2040)];
        let mut state = state_for(scenario, 1);

        apply(&mut state).expect("growth");
        assert_eq!(state.investments[1].value, 1_000.0);
    }
}
