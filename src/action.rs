// =============================================================================
// Action Model — the websocket wire format lifted into tagged Rust types
// =============================================================================
//
// The feed sends heterogeneous JSON objects discriminated by a `type` field.
// Rather than pattern-matching raw `serde_json::Value` throughout the
// dispatcher, every inbound frame is parsed once into an `Action` here.
// Anything this crate doesn't need to model precisely (successes,
// exposure reports, contact-channel notices, truly unrecognized types)
// collapses into `Action::Other` with the raw value preserved for logging.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::book::Order as BookOrder;
use crate::contract::Contract;
use crate::ids::{ContractId, Mid};

/// `status_type` on an `action_report` event — see spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionReportStatus {
    /// 200 — resting insert/update.
    Resting,
    /// 201 — cross (trade).
    Cross,
    /// 202 — unfilled market order.
    UnfilledMarket,
    /// 203 — cancelled.
    Cancelled,
    /// 300 — acknowledged.
    Acknowledged,
    /// 610 — expired.
    Expired,
    /// >= 600 (other than 610) — rejected or invalid.
    Rejected(i64),
    /// Anything else; logged as a protocol warning, not acted upon.
    Unknown(i64),
}

impl ActionReportStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            200 => Self::Resting,
            201 => Self::Cross,
            202 => Self::UnfilledMarket,
            203 => Self::Cancelled,
            300 => Self::Acknowledged,
            610 => Self::Expired,
            c if c >= 600 => Self::Rejected(c),
            c => Self::Unknown(c),
        }
    }
}

/// A decoded `action_report` event: an order-lifecycle wire message.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub order: BookOrder,
    pub status: ActionReportStatus,
}

/// A decoded `book_top` event.
#[derive(Debug, Clone)]
pub struct BookTopEvent {
    pub contract_id: ContractId,
    pub bid: Option<i64>,
    pub ask: Option<i64>,
    pub clock: i64,
}

/// A decoded `heartbeat` event.
#[derive(Debug, Clone)]
pub struct HeartbeatEvent {
    pub ticks: i64,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A decoded `collateral_balance_update` event.
#[derive(Debug, Clone)]
pub struct CollateralUpdateEvent {
    pub available_balances: HashMap<String, i64>,
    pub position_locked_balances: HashMap<String, i64>,
}

/// A single entry inside an `open_positions_update` event's `positions` list.
#[derive(Debug, Clone)]
pub struct PositionUpdateEntry {
    pub contract_id: ContractId,
    pub mpid: Option<String>,
    pub size: i64,
    pub exercised_size: i64,
}

/// A decoded `open_positions_update` event.
#[derive(Debug, Clone)]
pub struct OpenPositionsUpdateEvent {
    pub positions: Vec<PositionUpdateEntry>,
}

/// Every action type this engine needs to distinguish. Anything else (plus
/// `*_success` acks, `exposure_reports`, and genuinely unrecognized types)
/// is preserved verbatim in `Other` for logging only.
#[derive(Debug, Clone)]
pub enum Action {
    BookTop(BookTopEvent),
    ActionReport(ActionReport),
    Heartbeat(HeartbeatEvent),
    CollateralUpdate(CollateralUpdateEvent),
    OpenPositionsUpdate(OpenPositionsUpdateEvent),
    ContractAdded(Contract),
    ContractRemoved(Contract),
    TradeBusted(Value),
    ExposureReport(Value),
    Success(String),
    Other(Value),
}

fn i64_field(v: &Value, field: &str) -> Option<i64> {
    v.get(field).and_then(|x| x.as_i64())
}

fn str_field<'a>(v: &'a Value, field: &str) -> Option<&'a str> {
    v.get(field).and_then(|x| x.as_str())
}

fn decode_order(v: &Value) -> Option<BookOrder> {
    Some(BookOrder {
        mid: Mid::from(str_field(v, "mid")?),
        contract_id: ContractId(i64_field(v, "contract_id")?),
        mpid: str_field(v, "mpid").map(|s| s.to_string()),
        cid: str_field(v, "cid").map(|s| s.to_string()),
        clock: i64_field(v, "clock")?,
        ticks: i64_field(v, "ticks")?,
        is_ask: v.get("is_ask").and_then(|x| x.as_bool()).unwrap_or(false),
        price: i64_field(v, "price").unwrap_or(0),
        size: i64_field(v, "size").unwrap_or(0),
        filled_size: i64_field(v, "filled_size").unwrap_or(0),
        filled_price: i64_field(v, "filled_price").unwrap_or(0),
    })
}

fn decode_balances(v: &Value) -> HashMap<String, i64> {
    v.as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, val)| val.as_i64().map(|n| (k.clone(), n)))
                .collect()
        })
        .unwrap_or_default()
}

impl Action {
    /// Parse one inbound websocket frame. Never fails: anything this crate
    /// can't decode becomes `Action::Other` with the raw value attached, and
    /// a warning is logged.
    pub fn from_json(raw: Value) -> Action {
        let type_ = match raw.get("type").and_then(|t| t.as_str()) {
            Some(t) => t.to_string(),
            None => {
                warn!(raw = %raw, "action frame missing 'type' field");
                return Action::Other(raw);
            }
        };

        match type_.as_str() {
            "book_top" => match (
                i64_field(&raw, "contract_id"),
                i64_field(&raw, "clock"),
            ) {
                (Some(cid), Some(clock)) => Action::BookTop(BookTopEvent {
                    contract_id: ContractId(cid),
                    bid: i64_field(&raw, "bid"),
                    ask: i64_field(&raw, "ask"),
                    clock,
                }),
                _ => {
                    warn!(raw = %raw, "malformed book_top, treating as Other");
                    Action::Other(raw)
                }
            },
            "action_report" => {
                match (decode_order(&raw), i64_field(&raw, "status_type")) {
                    (Some(order), Some(code)) => Action::ActionReport(ActionReport {
                        order,
                        status: ActionReportStatus::from_code(code),
                    }),
                    _ => {
                        warn!(raw = %raw, "malformed action_report, treating as Other");
                        Action::Other(raw)
                    }
                }
            }
            "heartbeat" => {
                match (i64_field(&raw, "ticks"), str_field(&raw, "run_id")) {
                    (Some(ticks), Some(run_id)) => {
                        let timestamp = raw
                            .get("timestamp")
                            .and_then(|t| t.as_str())
                            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(Utc::now);
                        Action::Heartbeat(HeartbeatEvent {
                            ticks,
                            run_id: run_id.to_string(),
                            timestamp,
                        })
                    }
                    _ => {
                        warn!(raw = %raw, "malformed heartbeat, treating as Other");
                        Action::Other(raw)
                    }
                }
            }
            "collateral_balance_update" => {
                let collateral = raw.get("collateral").cloned().unwrap_or(Value::Null);
                let available = collateral
                    .get("available_balances")
                    .map(decode_balances)
                    .unwrap_or_default();
                let locked = collateral
                    .get("position_locked_balances")
                    .map(decode_balances)
                    .unwrap_or_default();
                Action::CollateralUpdate(CollateralUpdateEvent {
                    available_balances: available,
                    position_locked_balances: locked,
                })
            }
            "open_positions_update" => {
                let entries = raw
                    .get("positions")
                    .and_then(|p| p.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|p| {
                                Some(PositionUpdateEntry {
                                    contract_id: ContractId(i64_field(p, "contract_id")?),
                                    mpid: str_field(p, "mpid").map(|s| s.to_string()),
                                    size: i64_field(p, "size").unwrap_or(0),
                                    exercised_size: i64_field(p, "exercised_size").unwrap_or(0),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Action::OpenPositionsUpdate(OpenPositionsUpdateEvent { positions: entries })
            }
            "contract_added" | "contract_removed" => {
                let data = raw.get("data").cloned().unwrap_or(Value::Null);
                match serde_json::from_value::<Contract>(data) {
                    Ok(contract) => {
                        if type_ == "contract_added" {
                            Action::ContractAdded(contract)
                        } else {
                            Action::ContractRemoved(contract)
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, raw = %raw, "failed to decode contract payload");
                        Action::Other(raw)
                    }
                }
            }
            "trade_busted" => Action::TradeBusted(raw),
            "exposure_reports" => Action::ExposureReport(raw),
            t if t.ends_with("_success") => Action::Success(t.to_string()),
            _ => Action::Other(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_book_top() {
        let raw = json!({"type": "book_top", "contract_id": 1, "bid": 100, "ask": 110, "clock": 5});
        match Action::from_json(raw) {
            Action::BookTop(e) => {
                assert_eq!(e.contract_id, ContractId(1));
                assert_eq!(e.bid, Some(100));
                assert_eq!(e.ask, Some(110));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn decodes_action_report_status_codes() {
        let raw = json!({
            "type": "action_report", "mid": "m1", "contract_id": 1,
            "clock": 1, "ticks": 1, "is_ask": false, "price": 100, "size": 5,
            "status_type": 200
        });
        match Action::from_json(raw) {
            Action::ActionReport(r) => assert_eq!(r.status, ActionReportStatus::Resting),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_becomes_other() {
        let raw = json!({"type": "something_weird", "foo": "bar"});
        assert!(matches!(Action::from_json(raw), Action::Other(_)));
    }

    #[test]
    fn success_suffix_detected() {
        let raw = json!({"type": "auth_success"});
        assert!(matches!(Action::from_json(raw), Action::Success(_)));
    }

    #[test]
    fn status_code_classification() {
        assert_eq!(ActionReportStatus::from_code(201), ActionReportStatus::Cross);
        assert_eq!(ActionReportStatus::from_code(650), ActionReportStatus::Rejected(650));
        assert_eq!(ActionReportStatus::from_code(610), ActionReportStatus::Expired);
        assert_eq!(ActionReportStatus::from_code(42), ActionReportStatus::Unknown(42));
    }
}
