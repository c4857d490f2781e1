// =============================================================================
// Session Controller — startup load, heartbeat maintenance, restart recovery
// =============================================================================
//
// The only caller that drives REST reloads and feeds the websocket stream
// into `dispatch_action`. Every REST call happens *before* acquiring the
// `EngineHandle` lock (fetch, then apply) so a slow network call never
// holds up the single-writer critical section — grounded in the
// spawn-then-loop shape of `market_data/orderbook.rs::run_depth_stream`,
// generalized from one Binance stream to the full action feed plus the
// heartbeat-driven maintenance step described in spec §4.7.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::action::{Action, ActionReport, ActionReportStatus};
use crate::book::BookTop;
use crate::contract::Contract;
use crate::dispatch::dispatch_action;
use crate::feed::WebsocketFeed;
use crate::ids::ContractId;
use crate::position::{Position, PositionSide};
use crate::rest::{PositionSnapshot, RestClient};
use crate::state::EngineHandle;

/// Number of deferred basis refreshes and lazy book loads drained per
/// heartbeat tick (spec §4.5, §4.7 — default `N` is 2 for both).
const MAINTENANCE_BATCH_SIZE: usize = 2;

/// How far behind wall-clock a heartbeat's `timestamp` may lag before this
/// tick's maintenance step is skipped (spec §4.7).
const HEARTBEAT_STALENESS_LIMIT_MS: i64 = 2_000;

/// Drives `EngineHandle` from a `RestClient` and a `WebsocketFeed`. Owns no
/// state itself beyond the handle and the REST client; the websocket feed
/// is passed into `run` so callers can swap in a reconnecting wrapper.
pub struct SessionController {
    rest: Arc<dyn RestClient>,
    handle: EngineHandle,
}

impl SessionController {
    pub fn new(rest: Arc<dyn RestClient>, handle: EngineHandle) -> Self {
        Self { rest, handle }
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Full startup sequence (spec §4.7): clear all state, then re-seed the
    /// catalogue, own open orders (to learn `mpid`/`cid`), traded contracts,
    /// positions (with basis replay), and books for every traded contract.
    /// Invoked at process start and again whenever a `run_id` change is
    /// detected on a heartbeat.
    pub async fn load_market(&self) -> Result<()> {
        info!("load_market: starting full reload");
        self.handle.with_state(|s| s.clear_all()).await;

        let contracts = self
            .rest
            .list_contracts()
            .await
            .context("load_market: list_contracts failed")?;
        let contract_count = contracts.len();
        self.handle
            .with_state(|s| {
                for c in contracts {
                    s.catalogue.add_contract(c);
                }
            })
            .await;
        info!(count = contract_count, "load_market: contracts seeded");

        let open_orders = self
            .rest
            .list_open_orders()
            .await
            .context("load_market: list_open_orders failed")?;
        let open_order_count = open_orders.len();
        self.handle
            .with_state(|s| {
                for order in open_orders {
                    dispatch_action(
                        s,
                        Action::ActionReport(ActionReport {
                            order,
                            status: ActionReportStatus::Resting,
                        }),
                    );
                }
            })
            .await;
        info!(count = open_order_count, "load_market: own open orders replayed");

        let traded = self
            .rest
            .list_traded_contracts()
            .await
            .context("load_market: list_traded_contracts failed")?;

        let transactions = self
            .rest
            .list_transactions()
            .await
            .context("load_market: list_transactions failed")?;
        let transaction_count = transactions.len();
        self.handle
            .with_state(|s| {
                for tx in &transactions {
                    s.account.apply_transaction(tx);
                }
            })
            .await;
        info!(count = transaction_count, "load_market: transactions applied to account balances");

        let positions = self
            .rest
            .list_positions()
            .await
            .context("load_market: list_positions failed")?;
        info!(count = positions.len(), "load_market: positions listed");

        self.handle
            .with_state(|s| {
                for p in &positions {
                    s.positions.insert_or_replace(snapshot_to_position(p));
                }
            })
            .await;

        for p in &positions {
            if let Err(e) = self.refresh_basis_for_position(p.id, p.contract_id).await {
                warn!(contract_id = %p.contract_id, error = %e, "load_market: basis replay failed, deferring");
                self.handle
                    .with_state(|s| s.positions.deferred.schedule(p.contract_id))
                    .await;
            }
        }

        // Zero out positions in contracts that have already expired (spec §3
        // lifecycle: `expired contracts zero the size into expired_size`),
        // mirroring the original's end-of-`load_market` expired-position pass.
        let now = Utc::now();
        self.handle
            .with_state(|s| {
                for p in &positions {
                    if s.catalogue.is_expired(p.contract_id, now) {
                        s.positions.expire_position(p.contract_id);
                    }
                }
            })
            .await;

        for c in &traded {
            if let Err(e) = self.load_book(c.id).await {
                warn!(contract_id = %c.id, error = %e, "load_market: book load failed, will retry on next trigger");
            }
        }

        info!("load_market: complete");
        Ok(())
    }

    /// Run the heartbeat-driven maintenance step (spec §4.7). Called once
    /// per heartbeat, strictly after that heartbeat has already been
    /// dispatched into state (maintenance never interleaves mid-event).
    pub async fn handle_heartbeat_maintenance(&self, heartbeat_timestamp: DateTime<Utc>) -> Result<()> {
        let restart = self.handle.with_state(|s| s.take_restart_pending()).await;
        if restart {
            info!("heartbeat: run_id change detected, reloading market");
            return self.load_market().await;
        }

        let lag_ms = (Utc::now() - heartbeat_timestamp).num_milliseconds();
        if lag_ms > HEARTBEAT_STALENESS_LIMIT_MS {
            debug!(lag_ms, "heartbeat stale by more than 2s, skipping maintenance this tick");
            return Ok(());
        }

        if self.handle.with_state(|s| s.take_position_relist()).await {
            if let Err(e) = self.relist_positions().await {
                warn!(error = %e, "heartbeat: position relist failed, will retry next trigger");
            }
        }

        let deferred = self
            .handle
            .with_state(|s| s.positions.deferred.drain(MAINTENANCE_BATCH_SIZE))
            .await;
        for contract_id in deferred {
            let server_id = self
                .handle
                .with_state(|s| s.positions.get(contract_id).and_then(|p| p.server_id))
                .await;
            match server_id {
                Some(position_id) => {
                    if let Err(e) = self.refresh_basis_for_position(position_id, contract_id).await {
                        warn!(contract_id = %contract_id, error = %e, "heartbeat: deferred basis refresh failed, re-scheduling");
                        self.handle
                            .with_state(|s| s.positions.deferred.schedule(contract_id))
                            .await;
                    }
                }
                None => {
                    debug!(contract_id = %contract_id, "heartbeat: deferred position has no server id, scheduling full relist");
                    self.handle.with_state(|s| s.schedule_position_relist()).await;
                }
            }
        }

        let now = Utc::now();
        let to_load: Vec<ContractId> = self
            .handle
            .with_state(|s| {
                s.catalogue
                    .iter_active(now)
                    .map(|c| c.id)
                    .filter(|id| !s.books.is_loaded(*id))
                    .take(MAINTENANCE_BATCH_SIZE)
                    .collect()
            })
            .await;
        for id in to_load {
            if let Err(e) = self.load_book(id).await {
                warn!(contract_id = %id, error = %e, "heartbeat: lazy book load failed, will retry next tick");
            }
        }

        Ok(())
    }

    /// Consume the websocket feed forever: dispatch every decoded action,
    /// eagerly resolving any contract/book reloads the dispatch just
    /// scheduled, then running heartbeat maintenance right after each
    /// `heartbeat`. Returns once the feed closes cleanly or errors.
    pub async fn run(&self, feed: &mut dyn WebsocketFeed) -> Result<()> {
        loop {
            match feed.next_action().await {
                Ok(Some(action)) => {
                    let heartbeat_ts = match &action {
                        Action::Heartbeat(hb) => Some(hb.timestamp),
                        _ => None,
                    };
                    self.handle.with_state(|s| dispatch_action(s, action)).await;

                    self.drain_contract_reloads().await;
                    let to_load = self.handle.with_state(|s| s.take_book_reloads(MAINTENANCE_BATCH_SIZE)).await;
                    for id in to_load {
                        if let Err(e) = self.load_book(id).await {
                            warn!(contract_id = %id, error = %e, "run: eager book reload failed, will retry on heartbeat");
                        }
                    }

                    if let Some(ts) = heartbeat_ts {
                        if let Err(e) = self.handle_heartbeat_maintenance(ts).await {
                            warn!(error = %e, "heartbeat maintenance failed, continuing to next event");
                        }
                    }
                }
                Ok(None) => {
                    info!("websocket feed closed cleanly");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "websocket feed error, ending session run");
                    return Err(e.into());
                }
            }
        }
    }

    /// Fetch `/positions` fresh and replace every tracked position, then
    /// replay trades for each (spec §4.4: triggered by an unknown contract
    /// or a position observed with no tracked counterpart).
    async fn relist_positions(&self) -> Result<()> {
        let positions = self
            .rest
            .list_positions()
            .await
            .context("relist_positions: list_positions failed")?;
        self.handle
            .with_state(|s| {
                for p in &positions {
                    s.positions.insert_or_replace(snapshot_to_position(p));
                }
            })
            .await;
        for p in &positions {
            self.refresh_basis_for_position(p.id, p.contract_id).await?;
        }
        Ok(())
    }

    /// Replay `list_trades(position_id)` into the basis engine for one
    /// contract (spec §4.5).
    async fn refresh_basis_for_position(&self, position_id: i64, contract_id: ContractId) -> Result<()> {
        let trades = self
            .rest
            .list_trades(position_id)
            .await
            .with_context(|| format!("refresh_basis_for_position: list_trades({position_id}) failed"))?;
        self.handle
            .with_state(|s| s.positions.recompute_basis(contract_id, &trades))
            .await;
        Ok(())
    }

    /// Fetch and install a full book for one contract (spec §4.3/§4.7).
    async fn load_book(&self, contract_id: ContractId) -> Result<()> {
        let orders = self
            .rest
            .get_book_states(contract_id)
            .await
            .with_context(|| format!("load_book: get_book_states({contract_id}) failed"))?;
        self.handle
            .with_state(|s| s.books.load_full_book(contract_id, orders))
            .await;
        Ok(())
    }

    /// Resolve an unknown contract referenced by a live event (spec §7,
    /// error class 2): synchronous REST retrieve, logging and giving up on
    /// failure rather than stalling the caller.
    pub async fn retrieve_and_add_contract(&self, id: ContractId) -> Option<Contract> {
        match self.rest.retrieve_contract(id).await {
            Ok(contract) => {
                self.handle.with_state(|s| s.catalogue.add_contract(contract.clone())).await;
                Some(contract)
            }
            Err(e) => {
                warn!(contract_id = %id, error = %e, "retrieve_contract failed, dropping triggering event");
                None
            }
        }
    }

    /// Drain the queue of contracts whose `book_top` arrived before the
    /// contract itself was known (spec §4.4's `book_top` unknown-contract
    /// path): retrieve each contract, then load its book.
    pub async fn drain_contract_reloads(&self) {
        let pending = self.handle.with_state(|s| s.take_contract_reloads()).await;
        for id in pending {
            if self.retrieve_and_add_contract(id).await.is_some() {
                if let Err(e) = self.load_book(id).await {
                    warn!(contract_id = %id, error = %e, "drain_contract_reloads: book load failed");
                }
            }
        }
    }

    /// Current top-of-book for a contract, loading it first if necessary —
    /// the "analytics request" lazy-load trigger named in spec §4.3.
    pub async fn book_top_for_analytics(&self, contract_id: ContractId) -> Option<BookTop> {
        let already_loaded = self.handle.with_state(|s| s.books.is_loaded(contract_id)).await;
        if !already_loaded {
            if let Err(e) = self.load_book(contract_id).await {
                warn!(contract_id = %contract_id, error = %e, "book_top_for_analytics: load failed");
                return None;
            }
        }
        self.handle.with_state(|s| s.books.top(contract_id)).await
    }
}

fn snapshot_to_position(p: &PositionSnapshot) -> Position {
    let side = if p.is_short { PositionSide::Short } else { PositionSide::Long };
    let mut pos = Position::new(p.contract_id, side, p.size);
    pos.server_id = Some(p.id);
    pos.assigned_size = p.assigned_size;
    pos.exercised_size = p.exercised_size;
    pos
}
