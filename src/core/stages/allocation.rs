use crate::core::error::ConfigError;
use crate::core::state::{EPS, TrialState};
use crate::core::types::{AssetAllocation, EventKind, TaxStatus};

/// One holding as seen by the purchase planner.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AllocationSlot {
    pub value: f64,
    pub percent: f64,
    pub after_tax: bool,
}

/// Splits `excess` cash across the slots so that each moves toward its
/// target share of `held + excess`. Holdings already above target receive
/// nothing. After-tax purchases are capped at `after_tax_room`; the cut is
/// redistributed over the other slots by weight, or left in cash when there
/// are none.
pub fn plan_purchases(slots: &[AllocationSlot], excess: f64, after_tax_room: f64) -> Vec<f64> {
    let mut buys = vec![0.0; slots.len()];
    let total_percent: f64 = slots.iter().map(|s| s.percent.max(0.0)).sum();
    if excess <= EPS || total_percent <= 0.0 {
        return buys;
    }

    let pool = slots.iter().map(|s| s.value).sum::<f64>() + excess;
    let shortfalls: Vec<f64> = slots
        .iter()
        .map(|s| (pool * s.percent.max(0.0) / total_percent - s.value).max(0.0))
        .collect();
    let total_shortfall: f64 = shortfalls.iter().sum();
    if total_shortfall > EPS {
        let scale = (excess / total_shortfall).min(1.0);
        for (buy, shortfall) in buys.iter_mut().zip(&shortfalls) {
            *buy = shortfall * scale;
        }
    } else {
        for (buy, slot) in buys.iter_mut().zip(slots) {
            *buy = excess * slot.percent.max(0.0) / total_percent;
        }
    }

    let after_tax: f64 = buys
        .iter()
        .zip(slots)
        .filter(|(_, s)| s.after_tax)
        .map(|(b, _)| *b)
        .sum();
    let room = after_tax_room.max(0.0);
    if after_tax <= room + EPS {
        return buys;
    }

    let scale = room / after_tax;
    let cut = after_tax - room;
    for (buy, slot) in buys.iter_mut().zip(slots) {
        if slot.after_tax {
            *buy *= scale;
        }
    }
    let other_percent: f64 = slots
        .iter()
        .filter(|s| !s.after_tax)
        .map(|s| s.percent.max(0.0))
        .sum();
    if other_percent > 0.0 {
        for (buy, slot) in buys.iter_mut().zip(slots) {
            if !slot.after_tax {
                *buy += cut * slot.percent.max(0.0) / other_percent;
            }
        }
    }
    buys
}

/// Target value per holding: the subset's total split by normalized weight.
pub fn rebalance_targets(values: &[f64], percents: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    let weight: f64 = percents.iter().map(|p| p.max(0.0)).sum();
    if weight <= 0.0 {
        return values.to_vec();
    }
    percents
        .iter()
        .map(|p| total * p.max(0.0) / weight)
        .collect()
}

/// Runs every active investment and rebalance event in declaration order.
pub(super) fn apply(state: &mut TrialState) -> Result<(), ConfigError> {
    for idx in 0..state.events.len() {
        if !state.is_active(idx) {
            continue;
        }
        let record = &state.events[idx];
        let progress = record.window.progress(state.year);
        match &record.event.kind {
            EventKind::Invest(invest) => {
                let mut targets: Vec<(usize, f64)> = Vec::new();
                for allocation in &invest.allocations {
                    for (inv, pct) in resolve_targets(state, allocation, progress, &record.event.name)? {
                        match targets.iter_mut().find(|(existing, _)| *existing == inv) {
                            Some((_, total)) => *total += pct,
                            None => targets.push((inv, pct)),
                        }
                    }
                }
                let max_cash = invest.max_cash;
                invest_excess(state, &targets, max_cash);
            }
            EventKind::Rebalance(rebalance) => {
                let mut groups = Vec::with_capacity(rebalance.allocations.len());
                for allocation in &rebalance.allocations {
                    let targets = resolve_targets(state, allocation, progress, &record.event.name)?;
                    groups.push(targets);
                }
                for targets in &groups {
                    rebalance_subset(state, targets);
                }
            }
            EventKind::Income(_) | EventKind::Expense(_) => {}
        }
    }
    Ok(())
}

fn resolve_targets(
    state: &TrialState,
    allocation: &AssetAllocation,
    progress: f64,
    event: &str,
) -> Result<Vec<(usize, f64)>, ConfigError> {
    let malformed = |reason: String| ConfigError::MalformedAllocation {
        event: event.to_string(),
        reason,
    };
    let percentages = allocation.percentages(progress);
    if percentages.is_empty() {
        return Err(malformed("allocation has no targets".to_string()));
    }

    let mut targets = Vec::with_capacity(percentages.len());
    for (id, pct) in percentages {
        let idx = state.investment_index(id, event)?;
        if idx == state.cash {
            return Err(malformed(format!("cash account {id} cannot be a target")));
        }
        if !pct.is_finite() || pct < 0.0 {
            return Err(malformed(format!("{id} has invalid percentage {pct}")));
        }
        if targets.iter().any(|(existing, _)| *existing == idx) {
            return Err(malformed(format!("{id} listed twice")));
        }
        targets.push((idx, pct));
    }
    Ok(targets)
}

fn invest_excess(state: &mut TrialState, targets: &[(usize, f64)], max_cash: f64) {
    let excess = state.cash_value() - max_cash;
    if excess <= EPS || targets.is_empty() {
        return;
    }
    let room = state.contribution_limit - state.current.after_tax_contributions;
    let slots: Vec<AllocationSlot> = targets
        .iter()
        .map(|&(idx, percent)| AllocationSlot {
            value: state.investments[idx].value,
            percent,
            after_tax: state.investments[idx].tax_status == TaxStatus::AfterTax,
        })
        .collect();

    let buys = plan_purchases(&slots, excess, room);
    for ((&(idx, _), slot), buy) in targets.iter().zip(&slots).zip(buys) {
        if buy <= 0.0 {
            continue;
        }
        state.debit_cash(buy);
        let record = &mut state.investments[idx];
        record.value += buy;
        record.purchase_price += buy;
        if slot.after_tax {
            state.current.after_tax_contributions += buy;
        }
    }
}

/// Sells overweight holdings, then buys underweight ones with the
/// proceeds. The subset's total value is unchanged.
fn rebalance_subset(state: &mut TrialState, targets: &[(usize, f64)]) {
    let values: Vec<f64> = targets
        .iter()
        .map(|&(idx, _)| state.investments[idx].value)
        .collect();
    let percents: Vec<f64> = targets.iter().map(|&(_, pct)| pct).collect();
    let goals = rebalance_targets(&values, &percents);

    for (&(idx, _), goal) in targets.iter().zip(&goals) {
        let record = &mut state.investments[idx];
        let sell = record.value - goal;
        if sell <= 0.0 || record.value <= 0.0 {
            continue;
        }
        let basis = record.purchase_price * sell / record.value;
        record.value -= sell;
        record.purchase_price -= basis;
        if record.tax_status == TaxStatus::NonRetirement {
            state.current.capital_gains += sell - basis;
        }
    }
    for (&(idx, _), goal) in targets.iter().zip(&goals) {
        let record = &mut state.investments[idx];
        let buy = goal - record.value;
        if buy <= 0.0 {
            continue;
        }
        record.value += buy;
        record.purchase_price += buy;
    }
}
