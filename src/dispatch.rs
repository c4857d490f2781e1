// =============================================================================
// Action Dispatcher — routes decoded `Action`s to the owning component
// =============================================================================
//
// The single seam where a decoded websocket frame is applied to state. Every
// branch logs and returns rather than propagating an error upward — nothing
// here is permitted to abort ingestion (spec §7: "nothing in the core is
// fatal").
// =============================================================================

use tracing::{debug, info, warn};

use crate::action::{Action, ActionReportStatus};
use crate::book::Order as BookOrder;
use crate::contract::Contract;
use crate::ids::{accept_update, Clock, Ticks, UpdateVerdict};
use crate::position::PositionSide;
use crate::state::MarketState;

/// Apply one decoded action to `state`. Never returns an error: anything
/// that can't be applied is logged and dropped in place, per the "nothing
/// fatal" contract.
pub fn dispatch_action(state: &mut MarketState, action: Action) {
    match action {
        Action::BookTop(evt) => {
            if !state.catalogue.contains(evt.contract_id) {
                warn!(contract_id = %evt.contract_id, "book_top for unknown contract, scheduling contract + book reload");
                state.schedule_contract_reload(evt.contract_id);
                return;
            }
            state.books.apply_book_top(
                evt.contract_id,
                crate::book::BookTop {
                    best_bid: evt.bid,
                    best_ask: evt.ask,
                    clock: evt.clock,
                },
            );
            if state.books.needs_reload(evt.contract_id) {
                debug!(
                    contract_id = %evt.contract_id,
                    "book_top clock outpaces resting orders by more than 2, scheduling full book reload"
                );
                state.schedule_book_reload(evt.contract_id);
            }
        }

        Action::ActionReport(report) => dispatch_action_report(state, report),

        Action::Heartbeat(hb) => state.on_heartbeat(hb),

        Action::CollateralUpdate(evt) => {
            state
                .account
                .apply_collateral_update(&evt.available_balances, &evt.position_locked_balances);
        }

        Action::OpenPositionsUpdate(evt) => {
            for entry in evt.positions {
                let unknown = state.positions.get(entry.contract_id).is_none();
                let triggered = state.positions.apply_server_size(
                    entry.contract_id,
                    PositionSide::Long,
                    entry.size,
                    entry.exercised_size,
                );
                if unknown || triggered {
                    info!(contract_id = %entry.contract_id, "open_positions_update: unknown contract, scheduling full position re-list");
                    state.schedule_position_relist();
                }
            }
        }

        Action::ContractAdded(contract) => on_contract_added(state, contract),
        Action::ContractRemoved(contract) => {
            info!(contract_id = %contract.id, "contract_removed");
            let id = contract.id;
            state.catalogue.remove_contract(contract);
            state.positions.expire_position(id);
        }

        Action::TradeBusted(raw) => {
            warn!(raw = %raw, "trade_busted received, logged only (no model change specified)");
        }
        Action::ExposureReport(_) => {
            debug!("exposure_reports received, no state effect");
        }
        Action::Success(kind) => {
            debug!(kind = %kind, "connection acknowledgement");
        }
        Action::Other(raw) => {
            warn!(raw = %raw, "unrecognized action type");
        }
    }
}

fn on_contract_added(state: &mut MarketState, contract: Contract) {
    if let Some(label) = &contract.label {
        let expected = crate::contract::to_contract_label(
            &contract.underlying_asset,
            contract.date_expires,
            contract.derivative_type,
            contract.is_call,
            contract.strike_price,
        );
        if label != &expected {
            warn!(
                contract_id = %contract.id,
                label = %label,
                expected = %expected,
                "contract label disagrees with derived formatter"
            );
        }
    }
    state.catalogue.add_contract(contract);
}

fn dispatch_action_report(state: &mut MarketState, report: crate::action::ActionReport) {
    let order = report.order;

    match report.status {
        ActionReportStatus::Resting => apply_resting(state, order),
        ActionReportStatus::Cross => apply_cross(state, order),
        ActionReportStatus::UnfilledMarket => {
            debug!(mid = %order.mid, "unfilled market order, no state effect");
        }
        ActionReportStatus::Cancelled => remove_order(state, &order, "cancelled"),
        ActionReportStatus::Acknowledged => {
            debug!(mid = %order.mid, "action_report acknowledged");
        }
        ActionReportStatus::Expired => remove_order(state, &order, "expired"),
        ActionReportStatus::Rejected(code) => {
            warn!(mid = %order.mid, code, "order rejected/invalid");
            remove_order(state, &order, "rejected");
        }
        ActionReportStatus::Unknown(code) => {
            warn!(mid = %order.mid, code, "unrecognized action_report status_type");
        }
    }
}

/// Learn `mpid` for the session the first time an own order is observed.
fn maybe_learn_mpid(state: &mut MarketState, order: &BookOrder) {
    if state.session.mpid.is_none() {
        if let Some(mpid) = &order.mpid {
            info!(mpid = %mpid, "learned session mpid from first own order");
            state.session.mpid = Some(mpid.clone());
        }
    }
}

fn is_own_order(state: &MarketState, order: &BookOrder) -> bool {
    match (&state.session.mpid, &order.mpid) {
        (Some(session_mpid), Some(order_mpid)) => session_mpid == order_mpid,
        _ => false,
    }
}

/// status_type 200: insert-or-replace under the clock rule, apply to book.
fn apply_resting(state: &mut MarketState, order: BookOrder) {
    maybe_learn_mpid(state, &order);

    if !state.books.is_loaded(order.contract_id) {
        debug!(contract_id = %order.contract_id, "resting order for unloaded book, scheduling reload");
        state.schedule_book_reload(order.contract_id);
    }

    if let Some(existing) = state.books.get_order(order.contract_id, &order.mid) {
        let verdict = accept_update(
            (Clock(existing.clock), Ticks(existing.ticks)),
            (Clock(order.clock), Ticks(order.ticks)),
        );
        match verdict {
            UpdateVerdict::Stale => {
                debug!(mid = %order.mid, "stale action_report dropped");
                return;
            }
            UpdateVerdict::SameTicks => {
                if existing.price == order.price && existing.size == order.size {
                    debug!(mid = %order.mid, "duplicate action_report dropped");
                } else {
                    warn!(mid = %order.mid, "action_report with equal ticks but differing payload, keeping stored");
                }
                return;
            }
            UpdateVerdict::Accept => {}
        }
    }

    state.books.apply_edit(order);
}

/// status_type 201: a cross (trade). If an own order, log observed deltas;
/// if size remains > 0 it's a partial fill (replace), else the order is
/// fully filled (remove). A fill for an untracked `mid` is inserted first,
/// then processed as a trade — a fill is never dropped for a missing insert.
fn apply_cross(state: &mut MarketState, order: BookOrder) {
    maybe_learn_mpid(state, &order);

    if state.books.get_order(order.contract_id, &order.mid).is_none() {
        info!(mid = %order.mid, "cross for untracked order, inserting before processing fill");
        state.books.upsert_order(order.clone());
    }

    if is_own_order(state, &order) {
        info!(
            mid = %order.mid,
            contract_id = %order.contract_id,
            filled_size = order.filled_size,
            filled_price = order.filled_price,
            is_ask = order.is_ask,
            "own order crossed"
        );
    }

    if order.size > 0 {
        state.books.apply_edit(order);
    } else {
        state.books.remove_order(order.contract_id, &order.mid);
    }
}

fn remove_order(state: &mut MarketState, order: &BookOrder, reason: &str) {
    debug!(mid = %order.mid, reason, "removing order from book");
    state.books.remove_order(order.contract_id, &order.mid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn fresh_state() -> MarketState {
        MarketState::new(Config::default())
    }

    fn seed_contract(state: &mut MarketState, id: i64) {
        let action = Action::from_json(json!({
            "type": "contract_added",
            "data": {
                "id": id,
                "label": "BTC 2099-01-01 Call $50000",
                "derivative_type": "options_contract",
                "underlying_asset": "BTC",
                "date_expires": "2099-01-01T00:00:00Z",
                "active": true,
                "is_next_day": false,
                "is_call": true,
                "strike_price": 5_000_000
            }
        }));
        dispatch_action(state, action);
    }

    #[test]
    fn scenario_1_resting_insert_then_cancel() {
        let mut state = fresh_state();
        seed_contract(&mut state, 1);

        dispatch_action(
            &mut state,
            Action::from_json(json!({
                "type": "action_report", "mid": "m1", "contract_id": 1, "mpid": "ME",
                "clock": 10, "ticks": 1, "status_type": 200, "is_ask": false,
                "price": 100000, "size": 5
            })),
        );
        let order = state.books.get_order(crate::ids::ContractId(1), &crate::ids::Mid::from("m1"));
        assert_eq!(order.unwrap().size, 5);
        assert_eq!(state.books.top(crate::ids::ContractId(1)).unwrap().best_bid, Some(100000));

        dispatch_action(
            &mut state,
            Action::from_json(json!({
                "type": "action_report", "mid": "m1", "contract_id": 1,
                "clock": 11, "ticks": 2, "status_type": 203, "is_ask": false,
                "price": 100000, "size": 5
            })),
        );
        assert!(state.books.get_order(crate::ids::ContractId(1), &crate::ids::Mid::from("m1")).is_none());
        assert_eq!(state.books.top(crate::ids::ContractId(1)).unwrap().best_bid, None);
    }

    #[test]
    fn scenario_2_stale_update_dropped() {
        let mut state = fresh_state();
        seed_contract(&mut state, 1);
        dispatch_action(
            &mut state,
            Action::from_json(json!({
                "type": "action_report", "mid": "m1", "contract_id": 1, "mpid": "ME",
                "clock": 10, "ticks": 1, "status_type": 200, "is_ask": false,
                "price": 100000, "size": 5
            })),
        );
        dispatch_action(
            &mut state,
            Action::from_json(json!({
                "type": "action_report", "mid": "m1", "contract_id": 1,
                "clock": 9, "ticks": 0, "status_type": 200, "is_ask": false,
                "price": 100000, "size": 99
            })),
        );
        let order = state.books.get_order(crate::ids::ContractId(1), &crate::ids::Mid::from("m1"));
        assert_eq!(order.unwrap().size, 5);
    }

    #[test]
    fn scenario_3_partial_then_full_fill() {
        let mut state = fresh_state();
        seed_contract(&mut state, 1);
        dispatch_action(
            &mut state,
            Action::from_json(json!({
                "type": "action_report", "mid": "m2", "contract_id": 1,
                "clock": 1, "ticks": 1, "status_type": 200, "is_ask": true,
                "price": 110000, "size": 10
            })),
        );
        dispatch_action(
            &mut state,
            Action::from_json(json!({
                "type": "action_report", "mid": "m2", "contract_id": 1,
                "clock": 2, "ticks": 2, "status_type": 201, "is_ask": true,
                "price": 110000, "size": 7, "filled_size": 3, "filled_price": 110000
            })),
        );
        assert_eq!(
            state.books.get_order(crate::ids::ContractId(1), &crate::ids::Mid::from("m2")).unwrap().size,
            7
        );
        dispatch_action(
            &mut state,
            Action::from_json(json!({
                "type": "action_report", "mid": "m2", "contract_id": 1,
                "clock": 3, "ticks": 3, "status_type": 201, "is_ask": true,
                "price": 110000, "size": 0, "filled_size": 7, "filled_price": 110000
            })),
        );
        assert!(state.books.get_order(crate::ids::ContractId(1), &crate::ids::Mid::from("m2")).is_none());
    }

    #[test]
    fn cross_for_untracked_mid_is_inserted_then_processed() {
        let mut state = fresh_state();
        seed_contract(&mut state, 1);
        dispatch_action(
            &mut state,
            Action::from_json(json!({
                "type": "action_report", "mid": "ghost", "contract_id": 1,
                "clock": 5, "ticks": 5, "status_type": 201, "is_ask": false,
                "price": 100000, "size": 2, "filled_size": 3, "filled_price": 100000
            })),
        );
        let order = state.books.get_order(crate::ids::ContractId(1), &crate::ids::Mid::from("ghost"));
        assert_eq!(order.unwrap().size, 2);
    }

    #[test]
    fn book_top_for_unknown_contract_schedules_reload() {
        let mut state = fresh_state();
        dispatch_action(
            &mut state,
            Action::from_json(json!({"type": "book_top", "contract_id": 99, "bid": 1, "ask": 2, "clock": 1})),
        );
        assert!(state.pending_contract_reloads().contains(&crate::ids::ContractId(99)));
    }

    #[test]
    fn book_top_far_ahead_of_resting_orders_schedules_book_reload() {
        let mut state = fresh_state();
        seed_contract(&mut state, 1);
        state.books.load_full_book(
            crate::ids::ContractId(1),
            vec![crate::book::Order {
                mid: crate::ids::Mid::from("m1"),
                contract_id: crate::ids::ContractId(1),
                mpid: None,
                cid: None,
                clock: 1,
                ticks: 1,
                is_ask: false,
                price: 100,
                size: 5,
                filled_size: 0,
                filled_price: 0,
            }],
        );

        dispatch_action(
            &mut state,
            Action::from_json(json!({"type": "book_top", "contract_id": 1, "bid": 100, "ask": 110, "clock": 5})),
        );
        assert!(state.pending_book_reloads().contains(&crate::ids::ContractId(1)));
    }

    #[test]
    fn contract_removed_zeroes_tracked_position_into_expired_size() {
        let mut state = fresh_state();
        seed_contract(&mut state, 1);
        state.positions.insert_or_replace(crate::position::Position::new(
            crate::ids::ContractId(1),
            PositionSide::Long,
            7,
        ));

        dispatch_action(
            &mut state,
            Action::from_json(json!({
                "type": "contract_removed",
                "data": {
                    "id": 1,
                    "label": "BTC 2099-01-01 Call $50000",
                    "derivative_type": "options_contract",
                    "underlying_asset": "BTC",
                    "date_expires": "2099-01-01T00:00:00Z",
                    "active": false,
                    "is_next_day": false,
                    "is_call": true,
                    "strike_price": 5_000_000
                }
            })),
        );

        let pos = state.positions.get(crate::ids::ContractId(1)).unwrap();
        assert_eq!(pos.size, 0);
        assert_eq!(pos.expired_size, 7);
        assert!(state.catalogue.is_expired(crate::ids::ContractId(1), chrono::Utc::now()));
    }
}
