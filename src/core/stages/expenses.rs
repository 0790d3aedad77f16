use crate::core::error::StageError;
use crate::core::state::TrialState;
use crate::core::types::EventKind;

/// Pays last year's taxes and every active non-discretionary expense,
/// liquidating along the withdrawal strategy when cash runs out.
pub(super) fn pay_mandatory(state: &mut TrialState) -> Result<(), StageError> {
    let bill = state.prior_tax.bill(state.filing_status(), &state.prior.taxable())?;
    let taxes = bill.total();

    let mut expenses = 0.0;
    for idx in 0..state.events.len() {
        if !state.is_active(idx) {
            continue;
        }
        let EventKind::Expense(expense) = &state.events[idx].event.kind else {
            continue;
        };
        if expense.discretionary {
            continue;
        }
        expenses += state.advance_cash_flow(idx);
    }

    state.current.taxes_paid += taxes;
    state.current.expenses_paid += expenses;
    state.pay(expenses + taxes)
}

/// Pays active discretionary expenses in spending-strategy order while
/// net worth after the payment stays above the financial goal. Expenses
/// missing from the strategy follow in declaration order.
pub(super) fn pay_discretionary(state: &mut TrialState) -> Result<(), StageError> {
    let mut order = state.strategies.spending.clone();
    for (idx, record) in state.events.iter().enumerate() {
        if record.event.is_discretionary_expense() && !order.contains(&idx) {
            order.push(idx);
        }
    }

    let mut net_worth = state.net_worth();
    for idx in order {
        if !state.is_active(idx) || !state.events[idx].event.is_discretionary_expense() {
            continue;
        }
        let amount = state.advance_cash_flow(idx);
        if net_worth - amount <= state.financial_goal {
            continue;
        }
        state.pay(amount)?;
        state.current.discretionary_paid += amount;
        net_worth -= amount;
    }
    Ok(())
}
