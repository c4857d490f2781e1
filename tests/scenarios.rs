//! End-to-end scenarios from spec.md §8, exercised directly against
//! `MarketState`/`dispatch_action` — no network involved.

use meridian_market_state::action::Action;
use meridian_market_state::config::Config;
use meridian_market_state::dispatch::dispatch_action;
use meridian_market_state::ids::{ContractId, Mid};
use meridian_market_state::position::{replay_trades, Trade, TradeSide};
use meridian_market_state::state::MarketState;
use serde_json::json;

fn fresh_state() -> MarketState {
    MarketState::new(Config::default())
}

fn seed_contract(state: &mut MarketState, id: i64) {
    dispatch_action(
        state,
        Action::from_json(json!({
            "type": "contract_added",
            "data": {
                "id": id,
                "label": "BTC 2024-01-05 Call $50000",
                "derivative_type": "options_contract",
                "underlying_asset": "BTC",
                "date_expires": "2099-01-01T00:00:00Z",
                "active": true,
                "is_next_day": false,
                "is_call": true,
                "strike_price": 5_000_000
            }
        })),
    );
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
    assert_eq!(
        state.books.get_order(ContractId(1), &Mid::from("m1")).unwrap().size,
        5
    );
    assert_eq!(state.books.top(ContractId(1)).unwrap().best_bid, Some(100000));

    dispatch_action(
        &mut state,
        Action::from_json(json!({
            "type": "action_report", "mid": "m1", "contract_id": 1,
            "clock": 11, "ticks": 2, "status_type": 203
        })),
    );
    assert!(state.books.get_order(ContractId(1), &Mid::from("m1")).is_none());
    assert_eq!(state.books.top(ContractId(1)).unwrap().best_bid, None);
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
            "clock": 9, "ticks": 0, "status_type": 200, "size": 99
        })),
    );
    assert_eq!(
        state.books.get_order(ContractId(1), &Mid::from("m1")).unwrap().size,
        5
    );
}

#[test]
fn scenario_3_partial_fill_then_full_fill() {
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
        state.books.get_order(ContractId(1), &Mid::from("m2")).unwrap().size,
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
    assert!(state.books.get_order(ContractId(1), &Mid::from("m2")).is_none());
}

#[test]
fn scenario_4_basis_from_trade_tape() {
    let trades = vec![
        Trade { contract_id: ContractId(1), side: TradeSide::Bid, filled_size: 3, filled_price: 0, fee: 45, rebate: 0, premium: 300_000 },
        Trade { contract_id: ContractId(1), side: TradeSide::Bid, filled_size: 2, filled_price: 0, fee: 30, rebate: 0, premium: 200_000 },
    ];
    let (size, basis) = replay_trades(&trades);
    assert_eq!(size, 5);
    assert_eq!(basis, 500_075);
}

#[test]
fn scenario_5_run_id_restart_clears_and_rebuilds() {
    let mut state = fresh_state();
    seed_contract(&mut state, 1);
    assert!(state.catalogue.contains(ContractId(1)));

    dispatch_action(&mut state, Action::from_json(json!({"type": "heartbeat", "ticks": 100, "run_id": "A"})));
    assert!(!state.take_restart_pending());

    dispatch_action(&mut state, Action::from_json(json!({"type": "heartbeat", "ticks": 101, "run_id": "B"})));
    assert!(state.take_restart_pending());
    // A full flush happened: the previously-seeded contract is gone until
    // the session controller re-runs load_market against REST.
    assert!(!state.catalogue.contains(ContractId(1)));
}

#[test]
fn scenario_6_fee_table() {
    use meridian_market_state::analytics::fee;
    assert_eq!(fee(1000, 2), 4);
    assert_eq!(fee(100_000, 3), 45);
}
