// =============================================================================
// Derived Analytics — cost-to-close, qualified-covered-call eligibility
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::book::BookTop;
use crate::contract::{Contract, ContractCatalogue, DerivativeType};
use crate::ids::ContractId;
use crate::position::Position;

/// `fee(price, size) = |size| * min(15, price / 500)` — cents per contract,
/// capped at 15c (20% of price below the 7500 threshold). See spec §4.8 and
/// Open Question #2: this supersedes the original's flat `15 * abs(size)`.
pub fn fee(price: i64, size: i64) -> i64 {
    size.abs() * price.div_euclid(500).min(15)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostToClose {
    /// Mid-price estimated cost to flatten, in whole cents.
    pub cost: i64,
    /// Net P&L against basis using the exit-side price, if basis is known.
    pub net: Option<i64>,
    pub low: i64,
    pub high: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostToCloseError {
    NoPosition,
    ContractExpired,
    NoBookTop,
    BookTopIncomplete,
}

/// Estimate the cost to flatten a position, per spec §4.8. Returns an error
/// variant (logged by the caller) rather than panicking when a precondition
/// is missing; a missing basis does not block the mid-price estimate, it
/// just leaves `net` as `None` and the caller should schedule a basis
/// refresh.
pub fn cost_to_close(
    position: Option<&Position>,
    contract: Option<&Contract>,
    top: Option<BookTop>,
    now: DateTime<Utc>,
) -> Result<CostToClose, CostToCloseError> {
    let position = position.ok_or(CostToCloseError::NoPosition)?;
    let contract = contract.ok_or(CostToCloseError::NoPosition)?;
    if (contract.date_expires - now).num_seconds() < 10 {
        return Err(CostToCloseError::ContractExpired);
    }
    let top = top.ok_or(CostToCloseError::NoBookTop)?;
    let (bid, ask) = match (top.best_bid, top.best_ask) {
        (Some(b), Some(a)) => (b, a),
        _ => return Err(CostToCloseError::BookTopIncomplete),
    };

    let size = position.size;
    let mid = (bid + ask) / 2;
    let cost = (fee(mid, size) + mid * size) / 10_000;

    let (exit_price, low, high) = if size > 0 {
        (bid, (fee(bid, size) + bid * size) / 10_000, (fee(ask, size) + ask * size) / 10_000)
    } else {
        (ask, (fee(ask, size) + ask * size) / 10_000, (fee(bid, size) + bid * size) / 10_000)
    };

    let net = match position.basis {
        Some(basis) => Some((fee(exit_price, size) + exit_price * size) / 10_000 - basis),
        None => {
            debug!(contract_id = %position.contract_id, "cost_to_close: basis unknown, net omitted");
            None
        }
    };

    Ok(CostToClose { cost, net, low, high })
}

/// True iff `contract` is a call, expires more than 30 days out, the
/// underlying next-day swap has a computable fair value (its own book-top
/// mid), and its strike clears the walked-ladder threshold (one strike past
/// FMV for 30-90 days, two strikes for 90+ days).
pub fn is_qualified_covered_call(
    contract: &Contract,
    catalogue: &ContractCatalogue,
    next_day_top: Option<BookTop>,
    now: DateTime<Utc>,
) -> bool {
    if contract.derivative_type != DerivativeType::Option {
        return false;
    }
    if !contract.is_call.unwrap_or(false) {
        return false;
    }
    let days_out = (contract.date_expires - now).num_days();
    if days_out <= 30 {
        return false;
    }
    let Some(strike) = contract.strike_price else {
        return false;
    };

    let Some(top) = next_day_top else { return false };
    let (Some(bid), Some(ask)) = (top.best_bid, top.best_ask) else {
        return false;
    };
    let fmv = (bid + ask) / 2;

    let mut ladder = catalogue.strike_ladder(&contract.underlying_asset, contract.date_expires);
    ladder.sort_by(|a, b| b.cmp(a)); // descending
    let Some(&highest) = ladder.first() else {
        return false;
    };
    let steps_required = if days_out > 90 { 2 } else { 1 };

    // Walk the full descending ladder, seeding the threshold at the highest
    // strike and keeping it pinned to the last strike seen while `passed`
    // (strikes at-or-below fmv) stays within `steps_required`. If the ladder
    // never accumulates that many strikes past fmv, the threshold clamps to
    // the lowest strike on the ladder rather than leaving the call
    // unqualified.
    let mut passed = 0usize;
    let mut threshold = highest;
    for &s in &ladder {
        if s <= fmv {
            passed += 1;
        }
        if passed <= steps_required {
            threshold = s;
        }
    }

    strike >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ContractCatalogue;
    use crate::ids::ContractId;
    use crate::position::PositionSide;
    use chrono::TimeZone;

    #[test]
    fn fee_table_scenario_6() {
        assert_eq!(fee(1000, 2), 4);
        assert_eq!(fee(100_000, 3), 45);
    }

    fn far_future(days: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::days(days)
    }

    fn option_contract(id: i64, asset: &str, expiry: DateTime<Utc>, strike: i64) -> Contract {
        Contract {
            id: ContractId(id),
            label: None,
            derivative_type: DerivativeType::Option,
            underlying_asset: asset.to_string(),
            date_expires: expiry,
            active: true,
            is_next_day: false,
            is_call: Some(true),
            strike_price: Some(strike),
        }
    }

    #[test]
    fn cost_to_close_requires_book_top() {
        let pos = Position::new(ContractId(1), PositionSide::Long, 5);
        let contract = option_contract(1, "BTC", far_future(365), 5_000_000);
        let err = cost_to_close(Some(&pos), Some(&contract), None, Utc::now()).unwrap_err();
        assert_eq!(err, CostToCloseError::NoBookTop);
    }

    #[test]
    fn cost_to_close_computes_mid_price_cost() {
        let mut pos = Position::new(ContractId(1), PositionSide::Long, 5);
        pos.basis = Some(500_075);
        let contract = option_contract(1, "BTC", far_future(365), 5_000_000);
        let top = BookTop { best_bid: Some(100_000), best_ask: Some(110_000), clock: 1 };
        let result = cost_to_close(Some(&pos), Some(&contract), Some(top), Utc::now()).unwrap();
        assert!(result.net.is_some());
        assert!(result.low <= result.high);
    }

    #[test]
    fn expired_contract_rejected() {
        let pos = Position::new(ContractId(1), PositionSide::Long, 5);
        let contract = option_contract(1, "BTC", Utc::now() - chrono::Duration::days(1), 5_000_000);
        let top = BookTop { best_bid: Some(1), best_ask: Some(2), clock: 1 };
        let err = cost_to_close(Some(&pos), Some(&contract), Some(top), Utc::now()).unwrap_err();
        assert_eq!(err, CostToCloseError::ContractExpired);
    }

    #[test]
    fn qcc_false_for_put() {
        let mut contract = option_contract(1, "BTC", far_future(365), 5_000_000);
        contract.is_call = Some(false);
        let cat = ContractCatalogue::new();
        let top = BookTop { best_bid: Some(100), best_ask: Some(110), clock: 1 };
        assert!(!is_qualified_covered_call(&contract, &cat, Some(top), Utc::now()));
    }

    #[test]
    fn qcc_false_for_short_tenor() {
        let contract = option_contract(1, "BTC", far_future(10), 5_000_000);
        let cat = ContractCatalogue::new();
        let top = BookTop { best_bid: Some(100), best_ask: Some(110), clock: 1 };
        assert!(!is_qualified_covered_call(&contract, &cat, Some(top), Utc::now()));
    }

    #[test]
    fn qcc_true_when_strike_clears_walked_threshold() {
        let expiry = far_future(365);
        let mut cat = ContractCatalogue::new();
        for (i, strike) in [4_000_000, 4_500_000, 5_000_000, 5_500_000].iter().enumerate() {
            cat.add_contract(Contract {
                id: ContractId(10 + i as i64),
                label: Some(format!("BTC {} Call ${}", expiry.format("%Y-%m-%d"), strike / 100)),
                derivative_type: DerivativeType::Option,
                underlying_asset: "BTC".to_string(),
                date_expires: expiry,
                active: true,
                is_next_day: false,
                is_call: Some(true),
                strike_price: Some(*strike),
            });
        }
        let contract = option_contract(1, "BTC", expiry, 4_500_000);
        let top = BookTop { best_bid: Some(4_900_000), best_ask: Some(4_910_000), clock: 1 };
        assert!(is_qualified_covered_call(&contract, &cat, Some(top), Utc::now()));
    }

    #[test]
    fn qcc_threshold_clamps_to_lowest_strike_when_ladder_runs_short() {
        // Ladder only has one strike at-or-below fmv, but 90+ days out
        // requires two steps past fmv. The threshold must clamp to the
        // lowest strike on the ladder rather than leaving the call
        // unqualified.
        let expiry = far_future(365);
        let mut cat = ContractCatalogue::new();
        for (i, strike) in [6_000_000, 5_000_000, 4_800_000].iter().enumerate() {
            cat.add_contract(Contract {
                id: ContractId(20 + i as i64),
                label: Some(format!("BTC {} Call ${}", expiry.format("%Y-%m-%d"), strike / 100)),
                derivative_type: DerivativeType::Option,
                underlying_asset: "BTC".to_string(),
                date_expires: expiry,
                active: true,
                is_next_day: false,
                is_call: Some(true),
                strike_price: Some(*strike),
            });
        }
        let contract = option_contract(1, "BTC", expiry, 5_000_000);
        let top = BookTop { best_bid: Some(4_900_000), best_ask: Some(4_900_000), clock: 1 };
        assert!(is_qualified_covered_call(&contract, &cat, Some(top), Utc::now()));
    }
}
