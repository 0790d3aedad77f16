use crate::core::error::ConfigError;
use crate::core::state::{EPS, InvestmentRecord, TrialState};
use crate::core::tax::SOCIAL_SECURITY_EXCLUDED_SHARE;
use crate::core::types::TaxStatus;

/// Converts pre-tax balances to after-tax up to the top of the federal
/// bracket this year's income falls in.
pub(super) fn apply(state: &mut TrialState) -> Result<(), ConfigError> {
    let Some(plan) = &state.roth_plan else {
        return Ok(());
    };
    if state.year < plan.start_year || state.year > plan.end_year {
        return Ok(());
    }

    let mut headroom = conversion_headroom(state)?;
    if headroom <= EPS {
        return Ok(());
    }

    let order = state.strategies.roth.clone();
    for idx in order {
        if headroom <= EPS {
            break;
        }
        if state.investments[idx].tax_status != TaxStatus::PreTax {
            continue;
        }
        let amount = headroom.min(state.investments[idx].value);
        if amount <= 0.0 {
            continue;
        }
        convert(state, idx, amount);
        headroom -= amount;
    }
    Ok(())
}

/// Upper bound of the bracket containing this year's taxable income, less
/// the income already above the standard deduction. An unbounded top
/// bracket leaves no headroom.
fn conversion_headroom(state: &TrialState) -> Result<f64, ConfigError> {
    let status = state.filing_status();
    let income = (state.current.income
        - SOCIAL_SECURITY_EXCLUDED_SHARE * state.current.social_security)
        .max(0.0);
    let bracket = state
        .tax
        .federal
        .get(status)
        .bracket_for(income)
        .ok_or(ConfigError::MissingTaxBracket {
            schedule: "federal",
            income,
        })?;
    let Some(upper) = bracket.upper else {
        return Ok(0.0);
    };
    let deduction = *state.tax.standard_deductions.get(status);
    Ok((upper - (income - deduction)).max(0.0))
}

/// Moves `amount` in kind to the after-tax investment of the same type,
/// creating that investment on first use.
fn convert(state: &mut TrialState, from: usize, amount: f64) {
    let source = &mut state.investments[from];
    let fraction = amount / source.value;
    let basis = source.purchase_price * fraction;
    source.value -= amount;
    source.purchase_price -= basis;
    let type_index = source.type_index;
    let source_id = source.id.clone();

    let target = match state
        .investments
        .iter()
        .position(|r| r.type_index == type_index && r.tax_status == TaxStatus::AfterTax)
    {
        Some(idx) => idx,
        None => {
            let mut id = format!("{} after-tax", state.investment_types[type_index].name);
            if state.investment_index(&id, "roth conversion").is_ok() {
                id = format!("{source_id} after-tax");
            }
            state.add_investment(InvestmentRecord {
                id,
                type_index,
                tax_status: TaxStatus::AfterTax,
                value: 0.0,
                purchase_price: 0.0,
            })
        }
    };

    let target = &mut state.investments[target];
    target.value += amount;
    target.purchase_price += amount;
    state.current.income += amount;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::fixtures::{base_scenario, investment, state_for};
    use crate::core::types::RothConversionPlan;

    fn roth_scenario() -> crate::core::types::Scenario {
        let mut scenario = base_scenario();
        scenario.investments.push(investment("ira", "index", 500_000.0, TaxStatus::PreTax));
        scenario.roth_conversion = Some(RothConversionPlan {
            start_year: 2025,
            end_year: 2030,
            strategy: vec!["ira".to_string()],
        });
        scenario
    }

    #[test]
    fn conversion_fills_current_bracket() {
        let mut state = state_for(roth_scenario(), 1);
        state.current.income = 40_000.0;

        apply(&mut state).expect("conversion");
        // 40,000 sits in the 12% band (11,600..47,150): headroom 47,150 - (40,000 - 14,600)
        let converted = 47_150.0 - (40_000.0 - 14_600.0);
        let roth = state
            .investments
            .iter()
            .find(|r| r.tax_status == TaxStatus::AfterTax)
            .expect("after-tax investment created");
        assert!((roth.value - converted).abs() < 1e-6);
        assert_eq!(roth.id, "index after-tax");
        assert!((state.investments[1].value - (500_000.0 - converted)).abs() < 1e-6);
        assert!((state.current.income - (40_000.0 + converted)).abs() < 1e-6);
    }

    #[test]
    fn conversion_is_capped_by_balance() {
        let mut scenario = roth_scenario();
        scenario.investments[1].value = 1_000.0;
        let mut state = state_for(scenario, 1);

        apply(&mut state).expect("conversion");
        assert_eq!(state.investments[1].value, 0.0);
        assert!((state.current.income - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn conversion_outside_window_does_nothing() {
        let mut scenario = roth_scenario();
        if let Some(plan) = &mut scenario.roth_conversion {
            plan.start_year = 2026;
        }
        let mut state = state_for(scenario, 1);

        apply(&mut state).expect("conversion");
        assert_eq!(state.investments.len(), 2);
        assert_eq!(state.investments[1].value, 500_000.0);
    }

    #[test]
    fn existing_after_tax_investment_is_reused() {
        let mut scenario = roth_scenario();
        scenario.investments.push(investment("roth", "index", 2_000.0, TaxStatus::AfterTax));
        let mut state = state_for(scenario, 1);

        apply(&mut state).expect("conversion");
        assert_eq!(state.investments.len(), 3);
        assert!(state.investments[2].value > 2_000.0);
    }
}
