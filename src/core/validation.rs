use std::collections::{HashMap, HashSet};

use super::activation::{MAX_EVENT_YEARS, START_YEARS, resolve_windows};
use super::error::ConfigError;
use super::sampler::trial_rng;
use super::state::MAX_AGE;
use super::types::{
    AssetAllocation, CASH_INVESTMENT_TYPE, Event, EventDuration, EventKind, EventStart, Person,
    Scenario, StochasticValue,
};

/// Allowed distance of an allocation's percentages from 100.
const ALLOCATION_TOLERANCE: f64 = 0.01;

/// Checks every precondition that does not depend on a sampled value, so
/// a batch can be rejected before any trial starts.
pub fn validate_scenario(scenario: &Scenario) -> Result<(), ConfigError> {
    validate_people(scenario)?;
    let investments = validate_investments(scenario)?;
    validate_strategies(scenario, &investments)?;
    validate_events(scenario, &investments)?;
    Ok(())
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidScenario(reason.into())
}

fn validate_people(scenario: &Scenario) -> Result<(), ConfigError> {
    if !START_YEARS.contains(&scenario.start_year) {
        return Err(invalid(format!("start year {} is out of range", scenario.start_year)));
    }
    check_person("owner", &scenario.owner)?;
    if let Some(spouse) = &scenario.spouse {
        check_person("spouse", spouse)?;
    }
    if !scenario.financial_goal.is_finite() || scenario.financial_goal < 0.0 {
        return Err(invalid("financialGoal must be a non-negative number"));
    }
    if !scenario.after_tax_contribution_limit.is_finite() || scenario.after_tax_contribution_limit < 0.0 {
        return Err(invalid("afterTaxContributionLimit must be a non-negative number"));
    }
    Ok(())
}

fn check_person(who: &str, person: &Person) -> Result<(), ConfigError> {
    if !START_YEARS.contains(&person.birth_year) {
        return Err(invalid(format!("{who} birth year {} is out of range", person.birth_year)));
    }
    let max = MAX_AGE as f64;
    let ok = match person.life_expectancy {
        StochasticValue::Fixed { value, .. } => (0.0..=max).contains(&value),
        StochasticValue::Normal { mean, std_dev, .. } => {
            (0.0..=max).contains(&mean) && (0.0..=max).contains(&std_dev)
        }
        StochasticValue::Uniform { min, max: upper, .. } => {
            (0.0..=max).contains(&min) && (min..=max).contains(&upper)
        }
    };
    if ok {
        Ok(())
    } else {
        Err(invalid(format!("{who} life expectancy must be an age between 0 and {MAX_AGE}")))
    }
}

/// Bounds the declared start and duration; sampled values are checked again
/// when a trial resolves its windows.
fn check_window(event: &Event) -> Result<(), ConfigError> {
    let first = *START_YEARS.start() as f64;
    let last = *START_YEARS.end() as f64;
    let years = MAX_EVENT_YEARS as f64;
    let start_ok = match event.start {
        EventStart::Fixed { year } => START_YEARS.contains(&year),
        EventStart::Normal { mean, std_dev } => {
            (first..=last).contains(&mean) && (0.0..=years).contains(&std_dev)
        }
        EventStart::Uniform { lower, upper } => {
            (first..=last).contains(&lower) && (lower..=last).contains(&upper)
        }
        EventStart::StartWith { .. } | EventStart::StartAfter { .. } => true,
    };
    if !start_ok {
        return Err(ConfigError::InvalidEventWindow {
            event: event.name.clone(),
            reason: format!(
                "start must fall between {} and {}",
                START_YEARS.start(),
                START_YEARS.end()
            ),
        });
    }
    let duration_ok = match event.duration {
        EventDuration::Fixed { years: fixed } => fixed <= MAX_EVENT_YEARS,
        EventDuration::Normal { mean, std_dev } => {
            (0.0..=years).contains(&mean) && (0.0..=years).contains(&std_dev)
        }
        EventDuration::Uniform { lower, upper } => {
            (0.0..=years).contains(&lower) && (lower..=years).contains(&upper)
        }
    };
    if !duration_ok {
        return Err(ConfigError::InvalidEventWindow {
            event: event.name.clone(),
            reason: format!("duration must be between 0 and {MAX_EVENT_YEARS} years"),
        });
    }
    Ok(())
}

fn validate_investments(scenario: &Scenario) -> Result<HashMap<&str, bool>, ConfigError> {
    let mut types = HashSet::with_capacity(scenario.investment_types.len());
    for ty in &scenario.investment_types {
        if !types.insert(ty.name.as_str()) {
            return Err(invalid(format!("duplicate investment type {}", ty.name)));
        }
    }

    let mut investments = HashMap::with_capacity(scenario.investments.len());
    for investment in &scenario.investments {
        if !types.contains(investment.investment_type.as_str()) {
            return Err(ConfigError::UnknownInvestmentType {
                investment: investment.id.clone(),
                investment_type: investment.investment_type.clone(),
            });
        }
        if !investment.value.is_finite() || investment.value < 0.0 {
            return Err(invalid(format!("investment {} has a negative value", investment.id)));
        }
        let is_cash = investment.investment_type == CASH_INVESTMENT_TYPE;
        if investments.insert(investment.id.as_str(), is_cash).is_some() {
            return Err(ConfigError::DuplicateInvestment(investment.id.clone()));
        }
    }
    if !investments.values().any(|is_cash| *is_cash) {
        return Err(ConfigError::MissingCashAccount);
    }
    Ok(investments)
}

fn validate_strategies(
    scenario: &Scenario,
    investments: &HashMap<&str, bool>,
) -> Result<(), ConfigError> {
    let known = |context: &str, id: &String| {
        if investments.contains_key(id.as_str()) {
            Ok(())
        } else {
            Err(ConfigError::UnknownInvestment {
                context: context.to_string(),
                id: id.clone(),
            })
        }
    };
    for id in &scenario.expense_withdrawal_strategy {
        known("expense withdrawal strategy", id)?;
    }
    for id in &scenario.rmd_strategy {
        known("RMD strategy", id)?;
    }
    if let Some(plan) = &scenario.roth_conversion {
        if plan.start_year > plan.end_year {
            return Err(invalid("Roth conversion window ends before it starts"));
        }
        for id in &plan.strategy {
            known("Roth conversion strategy", id)?;
        }
    }

    for name in &scenario.spending_strategy {
        let event = scenario
            .events
            .iter()
            .find(|e| &e.name == name)
            .ok_or_else(|| ConfigError::UnknownEvent {
                event: "spending strategy".to_string(),
                reference: name.clone(),
            })?;
        if !event.is_discretionary_expense() {
            return Err(ConfigError::NotDiscretionary(name.clone()));
        }
    }
    Ok(())
}

fn validate_events(
    scenario: &Scenario,
    investments: &HashMap<&str, bool>,
) -> Result<(), ConfigError> {
    for event in &scenario.events {
        check_window(event)?;
    }
    // Dry-run resolution catches duplicate names, dangling references and
    // cycles; the sampled windows are discarded.
    resolve_windows(&scenario.events, &mut trial_rng(0))?;

    for event in &scenario.events {
        let allocations = match &event.kind {
            EventKind::Income(income) => {
                check_user_fraction(&event.name, income.user_fraction)?;
                continue;
            }
            EventKind::Expense(expense) => {
                check_user_fraction(&event.name, expense.user_fraction)?;
                continue;
            }
            EventKind::Invest(invest) => {
                if !invest.max_cash.is_finite() || invest.max_cash < 0.0 {
                    return Err(invalid(format!("event {} has a negative maxCash", event.name)));
                }
                &invest.allocations
            }
            EventKind::Rebalance(rebalance) => &rebalance.allocations,
        };

        let malformed = |reason: String| ConfigError::MalformedAllocation {
            event: event.name.clone(),
            reason,
        };
        if allocations.is_empty() {
            return Err(malformed("no allocations".to_string()));
        }
        let combine = matches!(event.kind, EventKind::Invest(_));
        let mut initial_total = 0.0;
        let mut final_total = 0.0;
        for allocation in allocations {
            let (initial, last) = check_allocation(&event.name, allocation, investments)?;
            if combine {
                initial_total += initial;
                final_total += last;
            } else {
                check_total(initial, last).map_err(&malformed)?;
            }
        }
        if combine {
            check_total(initial_total, final_total).map_err(&malformed)?;
        }
    }
    Ok(())
}

fn check_user_fraction(event: &str, fraction: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&fraction) {
        Ok(())
    } else {
        Err(invalid(format!("event {event} has userFraction outside 0..=1")))
    }
}

/// Returns the allocation's percentage totals at the start and the end of
/// its window.
fn check_allocation(
    event: &str,
    allocation: &AssetAllocation,
    investments: &HashMap<&str, bool>,
) -> Result<(f64, f64), ConfigError> {
    let malformed = |reason: String| ConfigError::MalformedAllocation {
        event: event.to_string(),
        reason,
    };
    let ids = allocation.investments();
    if ids.is_empty() {
        return Err(malformed("allocation has no targets".to_string()));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        match investments.get(id) {
            None => {
                return Err(ConfigError::UnknownInvestment {
                    context: event.to_string(),
                    id: id.to_string(),
                });
            }
            Some(true) => return Err(malformed(format!("cash account {id} cannot be a target"))),
            Some(false) => {}
        }
        if !seen.insert(id) {
            return Err(malformed(format!("{id} listed twice")));
        }
    }

    let initial = allocation.percentages(0.0);
    let last = allocation.percentages(1.0);
    for (id, pct) in initial.iter().chain(&last) {
        if !pct.is_finite() || *pct < 0.0 {
            return Err(malformed(format!("{id} has invalid percentage {pct}")));
        }
    }
    Ok((
        initial.iter().map(|(_, p)| p).sum(),
        last.iter().map(|(_, p)| p).sum(),
    ))
}

fn check_total(initial: f64, last: f64) -> Result<(), String> {
    for total in [initial, last] {
        if (total - 100.0).abs() > ALLOCATION_TOLERANCE {
            return Err(format!("percentages sum to {total}, expected 100"));
        }
    }
    Ok(())
}
