// =============================================================================
// Account Ledger — transaction stream projected onto per-asset balance fields
// =============================================================================
//
// The venue's transaction records name their own debit/credit fields and
// carry pre/post balances for each side (`original_source/ledgerx/
// market_state.py::add_transaction`). This module doesn't interpret those
// fields semantically (it never assumes "available_balance" is the only
// debit target) — it applies whichever field name the transaction carries,
// auto-creating it at zero if the asset bucket hasn't seen it before, and
// asserts the post/pre delta matches the signed amount applied.
// =============================================================================

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

/// A single ledger entry from `list_transactions` / the live feed. A
/// transaction may carry a debit side, a credit side, or both — each is
/// `None` when the transaction doesn't move that side of the books (the
/// original represents this as the post-balance field being absent/null).
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: i64,
    pub asset: String,
    pub state: TransactionState,
    pub amount: i64,
    pub debit: Option<BalanceMove>,
    pub credit: Option<BalanceMove>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Executed,
    Other,
}

impl TransactionState {
    pub fn from_str(s: &str) -> Self {
        match s {
            "executed" => Self::Executed,
            _ => Self::Other,
        }
    }
}

/// One side (debit or credit) of a transaction's effect on an asset's
/// dynamically-named balance fields.
#[derive(Debug, Clone)]
pub struct BalanceMove {
    pub field_name: String,
    pub pre_balance: i64,
    pub post_balance: i64,
}

/// Per-asset balance bucket: an open set of dynamically server-named fields
/// (`available_balance`, `position_locked_amount`, `withdrawal_locked_amount`,
/// and whatever else the venue introduces later), each an integer
/// accumulator defaulting to zero the first time it's referenced.
#[derive(Debug, Clone, Default)]
pub struct AssetBalance {
    fields: HashMap<String, i64>,
}

impl AssetBalance {
    pub fn field(&self, name: &str) -> i64 {
        self.fields.get(name).copied().unwrap_or(0)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.fields.iter()
    }
}

/// Account-level ledger: dynamic per-asset balances plus applied transaction
/// ids (so REST backfill and the live feed replaying the same transaction
/// twice is a no-op).
#[derive(Debug, Default)]
pub struct Account {
    balances: HashMap<String, AssetBalance>,
    applied_tx_ids: HashSet<i64>,
    highest_tx_id: i64,
}

impl Account {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn balance(&self, asset: &str) -> AssetBalance {
        self.balances.get(asset).cloned().unwrap_or_default()
    }

    pub fn assets(&self) -> impl Iterator<Item = (&String, &AssetBalance)> {
        self.balances.iter()
    }

    pub fn highest_applied_tx_id(&self) -> i64 {
        self.highest_tx_id
    }

    /// Apply one transaction (§4.6): non-`executed` transactions are logged
    /// and skipped; otherwise `-amount` is applied to the debit field and
    /// `+amount` to the credit field of the named asset bucket, each
    /// auto-created at zero if unseen. Idempotent per transaction id.
    pub fn apply_transaction(&mut self, tx: &Transaction) {
        if tx.state != TransactionState::Executed {
            warn!(tx_id = tx.id, "non-executed transaction state, skipping");
            return;
        }
        if !self.applied_tx_ids.insert(tx.id) {
            debug!(tx_id = tx.id, "transaction already applied, skipping");
            return;
        }
        self.highest_tx_id = self.highest_tx_id.max(tx.id);

        let bucket = self.balances.entry(tx.asset.clone()).or_default();

        if let Some(debit) = &tx.debit {
            let entry = bucket.fields.entry(debit.field_name.clone());
            let existing = matches!(entry, std::collections::hash_map::Entry::Occupied(_));
            if !existing {
                warn!(field = %debit.field_name, "unknown debit balance field, initializing at zero");
            }
            let field = entry.or_insert(0);
            *field -= tx.amount;
            if debit.post_balance - debit.pre_balance != -tx.amount {
                warn!(
                    tx_id = tx.id,
                    field = %debit.field_name,
                    expected_delta = -tx.amount,
                    actual_delta = debit.post_balance - debit.pre_balance,
                    "debit post/pre balance delta disagrees with transaction amount"
                );
            }
        }

        if let Some(credit) = &tx.credit {
            let entry = bucket.fields.entry(credit.field_name.clone());
            let existing = matches!(entry, std::collections::hash_map::Entry::Occupied(_));
            if !existing {
                warn!(field = %credit.field_name, "unknown credit balance field, initializing at zero");
            }
            let field = entry.or_insert(0);
            *field += tx.amount;
            if credit.post_balance - credit.pre_balance != tx.amount {
                warn!(
                    tx_id = tx.id,
                    field = %credit.field_name,
                    expected_delta = tx.amount,
                    actual_delta = credit.post_balance - credit.pre_balance,
                    "credit post/pre balance delta disagrees with transaction amount"
                );
            }
        }

        debug!(tx_id = tx.id, asset = %tx.asset, amount = tx.amount, "transaction applied");
    }

    /// Fold in an authoritative `collateral_balance_update` push (§4.4):
    /// replaces, not accumulates, the named asset buckets' `available` and
    /// `position_locked` fields.
    pub fn apply_collateral_update(
        &mut self,
        available: &HashMap<String, i64>,
        position_locked: &HashMap<String, i64>,
    ) {
        for (asset, amount) in available {
            self.balances
                .entry(asset.clone())
                .or_default()
                .fields
                .insert("available_balance".to_string(), *amount);
        }
        for (asset, amount) in position_locked {
            self.balances
                .entry(asset.clone())
                .or_default()
                .fields
                .insert("position_locked_amount".to_string(), *amount);
        }
        debug!(assets = available.len(), "collateral balances refreshed from push");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn move_(field: &str, pre: i64, post: i64) -> BalanceMove {
        BalanceMove { field_name: field.to_string(), pre_balance: pre, post_balance: post }
    }

    fn tx(id: i64, asset: &str, amount: i64, debit: Option<BalanceMove>, credit: Option<BalanceMove>) -> Transaction {
        Transaction { id, asset: asset.to_string(), state: TransactionState::Executed, amount, debit, credit }
    }

    #[test]
    fn debit_and_credit_fields_move_opposite_directions() {
        let mut acct = Account::new();
        acct.apply_transaction(&tx(
            1,
            "USD",
            500,
            Some(move_("withdrawal_locked_amount", 0, -500)),
            Some(move_("available_balance", 0, 500)),
        ));
        assert_eq!(acct.balance("USD").field("withdrawal_locked_amount"), -500);
        assert_eq!(acct.balance("USD").field("available_balance"), 500);
    }

    #[test]
    fn debit_post_balance_delta_matches_negated_amount() {
        let mut acct = Account::new();
        let before = acct.balance("USD").field("available_balance");
        acct.apply_transaction(&tx(1, "USD", 300, Some(move_("available_balance", 1000, 700)), None));
        let after = acct.balance("USD").field("available_balance");
        assert_eq!(after - before, -300);
    }

    #[test]
    fn credit_post_balance_delta_matches_amount() {
        let mut acct = Account::new();
        let before = acct.balance("USD").field("available_balance");
        acct.apply_transaction(&tx(1, "USD", 300, None, Some(move_("available_balance", 700, 1000))));
        let after = acct.balance("USD").field("available_balance");
        assert_eq!(after - before, 300);
    }

    #[test]
    fn non_executed_transaction_is_skipped() {
        let mut acct = Account::new();
        let mut t = tx(1, "USD", 100, Some(move_("available_balance", 0, -100)), None);
        t.state = TransactionState::Other;
        acct.apply_transaction(&t);
        assert_eq!(acct.balance("USD").field("available_balance"), 0);
    }

    #[test]
    fn duplicate_transaction_id_is_idempotent() {
        let mut acct = Account::new();
        let t = tx(1, "USD", 100, Some(move_("available_balance", 0, -100)), None);
        acct.apply_transaction(&t);
        acct.apply_transaction(&t);
        assert_eq!(acct.balance("USD").field("available_balance"), -100);
    }

    #[test]
    fn unknown_field_auto_created_at_zero() {
        let mut acct = Account::new();
        acct.apply_transaction(&tx(1, "BTC", 10, Some(move_("brand_new_field", 0, -10)), None));
        assert_eq!(acct.balance("BTC").field("brand_new_field"), -10);
    }

    #[test]
    fn collateral_update_replaces_not_accumulates() {
        let mut acct = Account::new();
        acct.apply_transaction(&tx(1, "USD", 1000, None, Some(move_("available_balance", 0, 1000))));
        let mut avail = HashMap::new();
        avail.insert("USD".to_string(), 500);
        let locked = HashMap::new();
        acct.apply_collateral_update(&avail, &locked);
        assert_eq!(acct.balance("USD").field("available_balance"), 500);
    }

    #[test]
    fn transaction_state_classification() {
        assert_eq!(TransactionState::from_str("executed"), TransactionState::Executed);
        assert_eq!(TransactionState::from_str("pending"), TransactionState::Other);
    }
}
