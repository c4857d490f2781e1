// =============================================================================
// Order Book Store — resting orders, derived top-of-book
// =============================================================================
//
// A `BookState` exists for a contract only once it has been explicitly
// loaded (first own-order, first book-top, analytics request, or heartbeat
// maintenance). Incremental edits for a not-yet-loaded contract are dropped,
// not buffered — see the Open Question in spec.md §9 on this choice.
// =============================================================================

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::ids::{ContractId, Mid};

/// A single resting (or just-crossed) order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Order {
    pub mid: Mid,
    pub contract_id: ContractId,
    #[serde(default)]
    pub mpid: Option<String>,
    #[serde(default)]
    pub cid: Option<String>,
    pub clock: i64,
    pub ticks: i64,
    #[serde(default)]
    pub is_ask: bool,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub filled_size: i64,
    #[serde(default)]
    pub filled_price: i64,
}

/// Best bid / best ask for a contract, plus the clock it was derived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookTop {
    pub best_bid: Option<i64>,
    pub best_ask: Option<i64>,
    pub clock: i64,
}

impl BookTop {
    fn empty() -> Self {
        Self {
            best_bid: None,
            best_ask: None,
            clock: -1,
        }
    }
}

/// Per-contract resting-order map plus derived top-of-book.
#[derive(Debug, Default)]
struct ContractBook {
    orders: HashMap<Mid, Order>,
    top: BookTop,
}

/// Store of all contracts whose books have been explicitly loaded.
#[derive(Debug, Default)]
pub struct OrderBookStore {
    books: HashMap<ContractId, ContractBook>,
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.books.clear();
    }

    pub fn is_loaded(&self, contract_id: ContractId) -> bool {
        self.books.contains_key(&contract_id)
    }

    /// Replace the full resting-order set for `contract_id` (a full reload)
    /// and recompute top-of-book from it.
    pub fn load_full_book(&mut self, contract_id: ContractId, orders: Vec<Order>) {
        let mut book = ContractBook::default();
        for o in orders {
            if o.size == 0 {
                continue;
            }
            book.orders.insert(o.mid.clone(), o);
        }
        book.top = Self::derive_top(&book.orders);
        info!(contract_id = %contract_id, count = book.orders.len(), "book fully (re)loaded");
        self.books.insert(contract_id, book);
    }

    fn derive_top(orders: &HashMap<Mid, Order>) -> BookTop {
        let mut best_bid = None;
        let mut best_ask = None;
        let mut max_clock = -1i64;
        for o in orders.values() {
            max_clock = max_clock.max(o.clock);
            if o.is_ask {
                best_ask = Some(best_ask.map_or(o.price, |a: i64| a.min(o.price)));
            } else {
                best_bid = Some(best_bid.map_or(o.price, |b: i64| b.max(o.price)));
            }
        }
        BookTop {
            best_bid,
            best_ask,
            clock: max_clock,
        }
    }

    /// Apply an incremental edit (§4.3): merge field-wise into the stored
    /// order when accepted by the clock rule, insert if new, or remove on a
    /// delete edit (size == 0). Dropped silently if the contract's book
    /// isn't loaded.
    pub fn apply_edit(&mut self, edit: Order) {
        let Some(book) = self.books.get_mut(&edit.contract_id) else {
            debug!(
                contract_id = %edit.contract_id,
                mid = %edit.mid,
                "book not loaded, dropping incremental edit"
            );
            return;
        };

        if edit.size == 0 {
            if book.orders.remove(&edit.mid).is_some() {
                debug!(mid = %edit.mid, "removed order via delete edit");
            }
            book.top = Self::derive_top(&book.orders);
            return;
        }

        match book.orders.get_mut(&edit.mid) {
            None => {
                book.orders.insert(edit.mid.clone(), edit);
            }
            Some(existing) => {
                if edit.clock < existing.clock {
                    debug!(mid = %edit.mid, "stale book edit dropped");
                    return;
                }
                merge_order_fields(existing, &edit);
            }
        }
        book.top = Self::derive_top(&book.orders);
    }

    pub fn remove_order(&mut self, contract_id: ContractId, mid: &Mid) {
        if let Some(book) = self.books.get_mut(&contract_id) {
            if book.orders.remove(mid).is_some() {
                book.top = Self::derive_top(&book.orders);
            }
        } else {
            debug!(contract_id = %contract_id, "ignoring delete on unloaded book");
        }
    }

    pub fn get_order(&self, contract_id: ContractId, mid: &Mid) -> Option<&Order> {
        self.books.get(&contract_id).and_then(|b| b.orders.get(mid))
    }

    pub fn upsert_order(&mut self, order: Order) {
        let book = self.books.entry(order.contract_id).or_default();
        book.orders.insert(order.mid.clone(), order);
        book.top = Self::derive_top(&book.orders);
    }

    /// Apply a `book_top` event if it is newer than what's stored.
    /// Staleness check per §4.3: if the highest order-level clock lags the
    /// applied top's clock by more than 2, the caller should force a full
    /// reload before trusting this top (see `needs_reload`).
    pub fn apply_book_top(&mut self, contract_id: ContractId, top: BookTop) {
        let book = self.books.entry(contract_id).or_default();
        if top.clock > book.top.clock {
            book.top = top;
        } else if top.clock == book.top.clock {
            if top.best_bid == book.top.best_bid && top.best_ask == book.top.best_ask {
                debug!(contract_id = %contract_id, "duplicate book_top ignored");
            } else {
                warn!(contract_id = %contract_id, "differing book_top at same clock, keeping stored");
            }
        } else {
            warn!(contract_id = %contract_id, "stale book_top ignored");
        }
    }

    pub fn top(&self, contract_id: ContractId) -> Option<BookTop> {
        self.books.get(&contract_id).map(|b| b.top)
    }

    /// True if the resting-order clock trails the stored top's clock by
    /// more than 2 — caller should force a full book reload.
    pub fn needs_reload(&self, contract_id: ContractId) -> bool {
        match self.books.get(&contract_id) {
            None => true,
            Some(book) => {
                let max_order_clock = book.orders.values().map(|o| o.clock).max().unwrap_or(-1);
                book.top.clock - max_order_clock > 2
            }
        }
    }
}

fn merge_order_fields(existing: &mut Order, edit: &Order) {
    existing.clock = edit.clock;
    existing.ticks = edit.ticks;
    existing.price = edit.price;
    existing.size = edit.size;
    existing.filled_size = edit.filled_size;
    existing.filled_price = edit.filled_price;
    existing.is_ask = edit.is_ask;
    if edit.mpid.is_some() {
        existing.mpid = edit.mpid.clone();
    }
    if edit.cid.is_some() {
        existing.cid = edit.cid.clone();
    }
}
