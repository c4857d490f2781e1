// =============================================================================
// Clock & Identifier Model — per-contract logical clocks and wire ids
// =============================================================================
//
// Every order/book event carries a per-contract `clock` (monotonic sequence
// number) and a global `ticks` timestamp. The accept rule in `accept_update`
// is the single place that decides whether an incoming event supersedes
// whatever is currently stored for a given `(contract_id, mid)` key — every
// other module (book merge, book-top staleness) goes through it instead of
// re-deriving the comparison inline.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned contract identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractId(pub i64);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque server-assigned message id, unique within a contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mid(pub String);

impl fmt::Display for Mid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Mid {
    fn from(s: String) -> Self {
        Mid(s)
    }
}

impl From<&str> for Mid {
    fn from(s: &str) -> Self {
        Mid(s.to_string())
    }
}

/// Server session identifier. A change in `RunId` across heartbeats means
/// the server restarted and all client-side state is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunId(pub String);

/// Per-contract monotonic sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Clock(pub i64);

/// Global monotonic event timestamp (also the heartbeat counter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticks(pub i64);

/// Outcome of comparing an incoming `(clock, ticks)` pair against whatever is
/// currently stored for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateVerdict {
    /// Incoming strictly supersedes the stored value; apply it.
    Accept,
    /// Same `ticks` as stored; caller must compare payloads to tell a
    /// duplicate (identical payload, drop silently) from a protocol anomaly
    /// (differing payload, log and keep stored).
    SameTicks,
    /// Strictly behind the stored value; a stale replay, drop.
    Stale,
}

/// Apply the §4.1 accept rule: accept iff `incoming.clock >= stored.clock
/// AND incoming.ticks > stored.ticks`. Equal `ticks` is handled by the
/// caller (duplicate vs. anomaly) since that requires comparing payloads.
pub fn accept_update(
    stored: (Clock, Ticks),
    incoming: (Clock, Ticks),
) -> UpdateVerdict {
    let (stored_clock, stored_ticks) = stored;
    let (incoming_clock, incoming_ticks) = incoming;

    if incoming_ticks == stored_ticks {
        return UpdateVerdict::SameTicks;
    }
    if incoming_clock >= stored_clock && incoming_ticks > stored_ticks {
        UpdateVerdict::Accept
    } else {
        UpdateVerdict::Stale
    }
}
