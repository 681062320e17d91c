//! Outcome evaluation.
//!
//! Decides whether an actionable decision turned out correct once a
//! horizon has matured, judged purely on price direction.

use crate::types::Action;

/// BUY is correct iff the price rose; SELL is correct iff it fell.
/// An unchanged price is always incorrect. HOLD/ABSTAIN never reach
/// this point and always evaluate as incorrect.
pub fn evaluate_outcome(action: Action, entry_price: f64, current_price: f64) -> bool {
    match action {
        Action::Buy => current_price > entry_price,
        Action::Sell => current_price < entry_price,
        Action::Hold | Action::Abstain => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
