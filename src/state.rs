// =============================================================================
// MarketState — single-writer owner of C2-C6, wrapped by a mutex-guarded handle
// =============================================================================
//
// `MarketState` owns the contract catalogue, order books, positions, and
// account ledger directly — no `Arc<RwLock<_>>` sprinkled per-field as in
// `app_state.rs`. That pattern fits a multi-reader dashboard; this engine
// has exactly one writer, so `EngineHandle` exposes mutation through a
// single `tokio::sync::Mutex` with short critical sections instead.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::action::HeartbeatEvent;
use crate::config::Config;
use crate::contract::ContractCatalogue;
use crate::book::OrderBookStore;
use crate::ids::ContractId;
use crate::ledger::Account;
use crate::position::PositionBook;

/// Session-scoped bookkeeping that isn't owned by any one component:
/// the learned own-order `mpid`, the last-seen heartbeat, and restart
/// detection via `run_id`.
#[derive(Debug, Default)]
pub struct Session {
    pub mpid: Option<String>,
    pub run_id: Option<String>,
    pub last_heartbeat_ticks: i64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Set when a heartbeat's `run_id` differs from the stored one; drained
    /// (and cleared) by the session controller, which re-runs `load_market`.
    pub restart_pending: bool,
}

pub struct MarketState {
    pub catalogue: ContractCatalogue,
    pub books: OrderBookStore,
    pub positions: PositionBook,
    pub account: Account,
    pub session: Session,
    pub config: Config,

    contract_reload_queue: HashSet<ContractId>,
    book_reload_queue: HashSet<ContractId>,
    position_relist_pending: bool,
}

impl MarketState {
    pub fn new(config: Config) -> Self {
        Self {
            catalogue: ContractCatalogue::new(),
            books: OrderBookStore::new(),
            positions: PositionBook::new(),
            account: Account::new(),
            session: Session::default(),
            config,
            contract_reload_queue: HashSet::new(),
            book_reload_queue: HashSet::new(),
            position_relist_pending: false,
        }
    }

    /// Discard every piece of server-derived state, keeping only config.
    /// Invoked on a detected `run_id` change before `load_market` re-seeds
    /// everything from REST.
    pub fn clear_all(&mut self) {
        self.catalogue.clear();
        self.books.clear();
        self.positions.clear();
        self.account.clear();
        let run_id = self.session.run_id.clone();
        self.session = Session { run_id, ..Session::default() };
        self.contract_reload_queue.clear();
        self.book_reload_queue.clear();
        self.position_relist_pending = false;
    }

    pub fn schedule_contract_reload(&mut self, id: ContractId) {
        self.contract_reload_queue.insert(id);
    }

    pub fn schedule_book_reload(&mut self, id: ContractId) {
        self.book_reload_queue.insert(id);
    }

    pub fn schedule_position_relist(&mut self) {
        self.position_relist_pending = true;
    }

    pub fn pending_contract_reloads(&self) -> &HashSet<ContractId> {
        &self.contract_reload_queue
    }

    pub fn pending_book_reloads(&self) -> &HashSet<ContractId> {
        &self.book_reload_queue
    }

    pub fn take_contract_reloads(&mut self) -> HashSet<ContractId> {
        std::mem::take(&mut self.contract_reload_queue)
    }

    pub fn take_book_reloads(&mut self, n: usize) -> Vec<ContractId> {
        let take: Vec<ContractId> = self.book_reload_queue.iter().copied().take(n).collect();
        for id in &take {
            self.book_reload_queue.remove(id);
        }
        take
    }

    pub fn take_position_relist(&mut self) -> bool {
        std::mem::replace(&mut self.position_relist_pending, false)
    }

    /// Apply a `heartbeat` event (§4.7): validate monotonic ticks, detect a
    /// `run_id` change (server restart), and — when not restarting — record
    /// the tick for the session controller's lateness check.
    pub fn on_heartbeat(&mut self, hb: HeartbeatEvent) {
        match &self.session.run_id {
            None => {
                info!(run_id = %hb.run_id, "session run_id observed for the first time");
                self.session.run_id = Some(hb.run_id.clone());
            }
            Some(current) if *current != hb.run_id => {
                info!(old = %current, new = %hb.run_id, "run_id changed, server restart detected");
                self.clear_all();
                self.session.run_id = Some(hb.run_id.clone());
                self.session.restart_pending = true;
                return;
            }
            _ => {}
        }

        if hb.ticks < self.session.last_heartbeat_ticks {
            tracing::warn!(
                ticks = hb.ticks,
                last = self.session.last_heartbeat_ticks,
                "non-monotonic heartbeat ticks observed"
            );
        }
        self.session.last_heartbeat_ticks = hb.ticks;
        self.session.last_heartbeat_at = Some(hb.timestamp);
    }

    pub fn take_restart_pending(&mut self) -> bool {
        std::mem::replace(&mut self.session.restart_pending, false)
    }
}

/// Single-writer wrapper exposing `MarketState` through one mutex with a
/// short critical section per access — the "mutex-guarded state object"
/// option named in spec §5.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<Mutex<MarketState>>,
}

impl EngineHandle {
    pub fn new(state: MarketState) -> Self {
        Self { inner: Arc::new(Mutex::new(state)) }
    }

    pub async fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut MarketState) -> R,
    {
        let mut guard = self.inner.lock().await;
        f(&mut guard)
    }
}
