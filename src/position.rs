// =============================================================================
// Position & Basis Engine — own positions, cost basis via trade-tape replay
// =============================================================================
//
// Basis is never trusted from the server directly; it's reconstructed by
// replaying every trade against a position and compared to the server's
// reported size. A mismatch clears the basis and schedules a deferred
// re-list (drained by the heartbeat loop in session.rs), rather than
// failing the update outright.
// =============================================================================

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::ids::ContractId;

/// Long or short, with the size-sign invariant enforced at the type's edge
/// (checked in `recompute_basis`, not encoded in the type itself, since the
/// server is the source of truth for which side a position is on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

/// A single fill against a position, replayed to reconstruct basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Bid,
    Ask,
}

#[derive(Debug, Clone)]
pub struct Trade {
    pub contract_id: ContractId,
    pub side: TradeSide,
    pub filled_size: i64,
    pub filled_price: i64,
    pub fee: i64,
    pub rebate: i64,
    pub premium: i64,
}

/// An operator-owned position in one contract.
#[derive(Debug, Clone)]
pub struct Position {
    pub server_id: Option<i64>,
    pub contract_id: ContractId,
    pub side: PositionSide,
    pub size: i64,
    pub assigned_size: i64,
    pub exercised_size: i64,
    pub expired_size: i64,
    pub basis: Option<i64>,
}

impl Position {
    pub fn new(contract_id: ContractId, side: PositionSide, size: i64) -> Self {
        Self {
            server_id: None,
            contract_id,
            side,
            size,
            assigned_size: 0,
            exercised_size: 0,
            expired_size: 0,
            basis: None,
        }
    }

    fn sign_ok(&self) -> bool {
        match self.side {
            PositionSide::Short => self.size <= 0,
            PositionSide::Long => self.size >= 0,
        }
    }
}

/// Result of a basis recomputation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasisOutcome {
    /// Replayed size matched the server-reported size; basis committed.
    Committed,
    /// Replayed size disagreed; basis cleared, re-list scheduled.
    Mismatch,
    /// The sign invariant itself was violated; fatal to this update, full
    /// position re-list scheduled.
    SignViolation,
}

/// Replay `trades` for a position and return `(size, basis)` per the §4.5
/// formula:
///   basis = sum(fee - rebate + premium) for bids + sum(fee - rebate - premium) for asks
///   size  = sum(filled_size) for bids - sum(filled_size) for asks
pub fn replay_trades(trades: &[Trade]) -> (i64, i64) {
    let mut size = 0i64;
    let mut basis = 0i64;
    for t in trades {
        match t.side {
            TradeSide::Bid => {
                basis += t.fee - t.rebate + t.premium;
                size += t.filled_size;
            }
            TradeSide::Ask => {
                basis += t.fee - t.rebate - t.premium;
                size -= t.filled_size;
            }
        }
    }
    (size, basis)
}

/// Deferred work set: positions whose basis could not be established.
/// Drained up to `N` at a time by the heartbeat maintenance loop.
#[derive(Debug, Default)]
pub struct DeferredBasisQueue {
    pending: VecDeque<ContractId>,
    queued: HashSet<ContractId>,
}

impl DeferredBasisQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, contract_id: ContractId) {
        if self.queued.insert(contract_id) {
            self.pending.push_back(contract_id);
        }
    }

    /// Pop up to `n` contract ids to re-process. Default `N` per §4.5 is 2.
    pub fn drain(&mut self, n: usize) -> Vec<ContractId> {
        let mut out = Vec::with_capacity(n.min(self.pending.len()));
        for _ in 0..n {
            match self.pending.pop_front() {
                Some(id) => {
                    self.queued.remove(&id);
                    out.push(id);
                }
                None => break,
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Owns all tracked positions, keyed by contract.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: std::collections::HashMap<ContractId, Position>,
    pub deferred: DeferredBasisQueue,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.deferred = DeferredBasisQueue::new();
    }

    pub fn get(&self, contract_id: ContractId) -> Option<&Position> {
        self.positions.get(&contract_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Insert or update from an `open_positions_update` entry (§4.4). If the
    /// reported size disagrees with what's tracked, schedules a basis
    /// refresh; if the contract is wholly unknown, the caller should trigger
    /// a full position-list refresh (signaled by returning `true`).
    pub fn apply_server_size(
        &mut self,
        contract_id: ContractId,
        side: PositionSide,
        size: i64,
        exercised_size: i64,
    ) -> bool {
        match self.positions.get_mut(&contract_id) {
            Some(pos) => {
                if pos.size != size {
                    debug!(contract_id = %contract_id, tracked = pos.size, reported = size, "position size drifted, scheduling basis refresh");
                    self.deferred.schedule(contract_id);
                }
                pos.size = size;
                pos.exercised_size = exercised_size;
                false
            }
            None => {
                if size != 0 || exercised_size != 0 {
                    info!(contract_id = %contract_id, "no tracked position for reported non-zero position");
                    let mut pos = Position::new(contract_id, side, size);
                    pos.exercised_size = exercised_size;
                    self.positions.insert(contract_id, pos);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn insert_or_replace(&mut self, position: Position) {
        self.positions.insert(position.contract_id, position);
    }

    /// Recompute basis for `contract_id` by replaying `trades` (§4.5). On a
    /// sign violation or size mismatch, clears the basis and schedules
    /// the position for a deferred re-list.
    pub fn recompute_basis(&mut self, contract_id: ContractId, trades: &[Trade]) -> BasisOutcome {
        let (replayed_size, basis) = replay_trades(trades);

        let pos = match self.positions.get_mut(&contract_id) {
            Some(p) => p,
            None => {
                warn!(contract_id = %contract_id, "recompute_basis: no tracked position");
                self.deferred.schedule(contract_id);
                return BasisOutcome::Mismatch;
            }
        };

        let sign_ok = match pos.side {
            PositionSide::Short => replayed_size <= 0,
            PositionSide::Long => replayed_size >= 0,
        };
        if !sign_ok {
            warn!(
                contract_id = %contract_id,
                replayed_size,
                side = ?pos.side,
                "basis replay violated position sign invariant"
            );
            pos.basis = None;
            self.deferred.schedule(contract_id);
            return BasisOutcome::SignViolation;
        }

        if replayed_size == pos.size {
            pos.basis = Some(basis);
            debug_assert!(pos.sign_ok());
            BasisOutcome::Committed
        } else {
            warn!(
                contract_id = %contract_id,
                replayed_size,
                reported_size = pos.size,
                "basis replay size mismatch, clearing basis"
            );
            pos.basis = None;
            self.deferred.schedule(contract_id);
            BasisOutcome::Mismatch
        }
    }

    /// Zero out `size` into `expired_size` for positions in expired
    /// contracts (§3 lifecycle).
    pub fn expire_position(&mut self, contract_id: ContractId) {
        if let Some(pos) = self.positions.get_mut(&contract_id) {
            pos.expired_size = pos.size;
            pos.size = 0;
        }
    }
}
