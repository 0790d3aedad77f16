use crate::core::state::TrialState;
use crate::core::types::EventKind;

/// Pays every active income event into cash.
pub(super) fn apply(state: &mut TrialState) {
    for idx in 0..state.events.len() {
        if !state.is_active(idx) {
            continue;
        }
        let EventKind::Income(income) = &state.events[idx].event.kind else {
            continue;
        };
        let social_security = income.social_security;

        let amount = state.advance_cash_flow(idx);
        state.credit_cash(amount);
        state.current.income += amount;
        if social_security {
            state.current.social_security += amount;
        }
    }
}
