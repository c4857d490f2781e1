// =============================================================================
// Contract Catalogue — identity, expiry ladders, put/call cross-references
// =============================================================================
//
// Owns the set of known contracts, indexed by id and label, with a sorted
// per-(asset, expiry) strike ladder for options and a put<->call side table.
// Expired contracts are retained (never deleted) for historical lookup but
// excluded from active iteration when the caller asks to skip them.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ids::ContractId;

/// The three derivative families this venue lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeType {
    #[serde(alias = "future_contract")]
    Future,
    #[serde(alias = "options_contract")]
    Option,
    DayAheadSwap,
}

/// A single known contract (future, option, or day-ahead swap).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub label: Option<String>,
    pub derivative_type: DerivativeType,
    pub underlying_asset: String,
    pub date_expires: DateTime<Utc>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub is_next_day: bool,
    #[serde(default)]
    pub is_call: Option<bool>,
    #[serde(default)]
    pub strike_price: Option<i64>,
}

/// Catalogue of all known contracts, indexed for the lookups §4.2 requires.
#[derive(Debug, Default)]
pub struct ContractCatalogue {
    contracts: HashMap<ContractId, Contract>,
    expired: HashMap<ContractId, Contract>,
    label_to_id: HashMap<String, ContractId>,
    /// (underlying_asset, date_expires) -> sorted ascending strikes, for options.
    strike_ladders: HashMap<(String, DateTime<Utc>), Vec<i64>>,
    put_call_map: HashMap<ContractId, ContractId>,
    expiry_dates: Vec<DateTime<Utc>>,
    /// Most recent unexpired day-ahead swap per underlying asset.
    next_day_by_asset: HashMap<String, ContractId>,
}

impl ContractCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Idempotent by id. See §4.2.
    pub fn add_contract(&mut self, contract: Contract) {
        if self.contracts.contains_key(&contract.id) {
            debug!(contract_id = %contract.id, "add_contract: already known, ignoring");
            return;
        }

        if !self.expiry_dates.contains(&contract.date_expires) {
            self.expiry_dates.push(contract.date_expires);
            self.expiry_dates.sort();
        }

        if let Some(label) = &contract.label {
            if let Some(existing) = self.label_to_id.get(label) {
                if *existing != contract.id {
                    warn!(
                        label = %label,
                        existing = %existing,
                        new = %contract.id,
                        "add_contract: label collision, keeping existing mapping"
                    );
                }
            } else {
                self.label_to_id.insert(label.clone(), contract.id);
            }
        }

        if matches!(contract.derivative_type, DerivativeType::Option) {
            if let Some(strike) = contract.strike_price {
                let key = (contract.underlying_asset.clone(), contract.date_expires);
                let ladder = self.strike_ladders.entry(key).or_default();
                if !ladder.contains(&strike) {
                    ladder.push(strike);
                    ladder.sort();
                }
            }
        }

        if contract.is_next_day {
            let supersede = match self.next_day_by_asset.get(&contract.underlying_asset) {
                None => true,
                Some(existing_id) => match self.contracts.get(existing_id) {
                    Some(existing) => contract.date_expires > existing.date_expires,
                    None => true,
                },
            };
            if supersede {
                info!(
                    contract_id = %contract.id,
                    asset = %contract.underlying_asset,
                    "next-day swap registered as most recent for asset"
                );
                self.next_day_by_asset
                    .insert(contract.underlying_asset.clone(), contract.id);
            }
        }

        // Derive put<->call cross-reference via label substring rewrite.
        if let Some(label) = &contract.label {
            let sibling_label = if label.contains("Put") {
                Some(label.replacen("Put", "Call", 1))
            } else if label.contains("Call") {
                Some(label.replacen("Call", "Put", 1))
            } else {
                None
            };
            if let Some(sibling_label) = sibling_label {
                if let Some(&sibling_id) = self.label_to_id.get(&sibling_label) {
                    self.put_call_map.insert(contract.id, sibling_id);
                    self.put_call_map.insert(sibling_id, contract.id);
                    info!(
                        a = %contract.id,
                        b = %sibling_id,
                        "mapped put<->call sibling pair"
                    );
                }
            }
        }

        info!(contract_id = %contract.id, label = ?contract.label, "contract added");
        self.contracts.insert(contract.id, contract);
    }

    /// Moves a contract into the expired set; never deletes it.
    pub fn remove_contract(&mut self, contract: Contract) {
        if self.expired.contains_key(&contract.id) {
            return;
        }
        info!(contract_id = %contract.id, "contract marked expired");
        self.expired.insert(contract.id, contract);
    }

    pub fn get(&self, id: ContractId) -> Option<&Contract> {
        self.contracts.get(&id).or_else(|| self.expired.get(&id))
    }

    pub fn get_by_label(&self, label: &str) -> Option<&Contract> {
        self.label_to_id.get(label).and_then(|id| self.get(*id))
    }

    pub fn put_call_sibling(&self, id: ContractId) -> Option<ContractId> {
        self.put_call_map.get(&id).copied()
    }

    pub fn strike_ladder(&self, asset: &str, expiry: DateTime<Utc>) -> Vec<i64> {
        self.strike_ladders
            .get(&(asset.to_string(), expiry))
            .cloned()
            .unwrap_or_default()
    }

    pub fn next_day_for_asset(&self, asset: &str) -> Option<ContractId> {
        self.next_day_by_asset.get(asset).copied()
    }

    /// All known expiration dates, sorted ascending (C2's "track
    /// expirations" responsibility — spec §2).
    pub fn expiry_dates(&self) -> &[DateTime<Utc>] {
        &self.expiry_dates
    }

    pub fn is_expired(&self, id: ContractId, now: DateTime<Utc>) -> bool {
        if self.expired.contains_key(&id) {
            return true;
        }
        match self.contracts.get(&id) {
            Some(c) => (c.date_expires - now).num_seconds() < 10,
            None => false,
        }
    }

    /// Active (non-expired, known) contracts, honoring the "skip expired" flag.
    pub fn iter_active(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Contract> {
        self.contracts
            .values()
            .filter(move |c| (c.date_expires - now).num_seconds() >= 10)
    }

    pub fn all_known(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values().chain(self.expired.values())
    }

    pub fn contains(&self, id: ContractId) -> bool {
        self.contracts.contains_key(&id) || self.expired.contains_key(&id)
    }
}

/// Deterministic label formatter, used only to detect label/metadata
/// disagreement (logged, not fatal) — see §4.2.
pub fn to_contract_label(
    asset: &str,
    expiry: DateTime<Utc>,
    derivative_type: DerivativeType,
    is_call: Option<bool>,
    strike: Option<i64>,
) -> String {
    let display_asset = if asset == "CBTC" { "BTC Mini" } else { asset };
    let date = expiry.format("%Y-%m-%d").to_string();
    match derivative_type {
        DerivativeType::Future => format!("{date} Future {display_asset}"),
        DerivativeType::DayAheadSwap => format!("{date} Next-Day {display_asset}"),
        DerivativeType::Option => {
            let side = if is_call.unwrap_or(false) { "Call" } else { "Put" };
            let dollars = strike.unwrap_or(0) as f64 / 100.0;
            format!("{display_asset} {date} {side} ${dollars}")
        }
    }
}
