//! Append-only audit trail of every negotiation step on a bid.
//!
//! Each event carries the sha256 of its predecessor's CBOR encoding, so the
//! stored history of a bid is a hash chain whose head is kept on the bid
//! itself (`Bid::last_event_hash`). Terminal bids keep their chain for audit.
use chrono::Utc;

use crate::bid::Bid;
use crate::error::{BidError, ValidationError};
use crate::types::{Amount, BidId, Role, TimeStamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum EventKind {
    #[n(0)]
    Placed,
    #[n(1)]
    Countered {
        #[n(0)]
        by: Role,
    },
    #[n(2)]
    Accepted {
        #[n(0)]
        by: Role,
    },
    #[n(3)]
    Rejected {
        #[n(0)]
        by: Role,
    },
    #[n(4)]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct BidEvent {
    #[n(0)]
    pub bid_id: BidId,
    #[n(1)]
    pub seq: u64, // equals the bid version the event produced
    #[n(2)]
    pub actor: Option<UserId>, // None for system transitions
    #[n(3)]
    pub kind: EventKind,
    #[n(4)]
    pub price: Amount,
    #[n(5)]
    pub quantity: Amount,
    #[n(6)]
    pub round: u32,
    #[n(7)]
    pub message: Option<String>,
    #[n(8)]
    pub at: TimeStamp<Utc>,
    #[n(9)]
    pub prev_hash: Option<String>,
}

impl BidEvent {
    /// Snapshot `bid` (already in its post-transition state) as the next link
    /// of its chain. `prev_hash` is taken from the bid's current chain head.
    pub fn record(bid: &Bid, kind: EventKind, actor: Option<UserId>) -> Self {
        Self {
            bid_id: bid.id.clone(),
            seq: bid.version,
            actor,
            kind,
            price: bid.price,
            quantity: bid.quantity,
            round: bid.negotiation_round,
            message: bid.message.clone(),
            at: bid.updated_at.clone(),
            prev_hash: bid.last_event_hash.clone(),
        }
    }

    pub fn build(&self) -> Result<(String, Vec<u8>), BidError> {
        let cbor = minicbor::to_vec(self).map_err(|e| BidError::Codec(e.to_string()))?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }

    pub fn storage_key(&self) -> String {
        event_key(&self.bid_id, self.seq)
    }
}

pub(crate) fn event_prefix(bid_id: &BidId) -> String {
    format!("{bid_id}/")
}

// zero padded so lexicographic order in sled matches sequence order
pub(crate) fn event_key(bid_id: &BidId, seq: u64) -> String {
    format!("{bid_id}/{seq:020}")
}

/// Checks an ordered history: one bid, strictly increasing sequence numbers,
/// no predecessor for the first event, and every other event pointing at the
/// hash of the one before it.
pub fn verify_chain(events: &[BidEvent]) -> Result<(), BidError> {
    let mut previous: Option<(&BidEvent, String)> = None;

    for event in events {
        let linked = match &previous {
            None => event.prev_hash.is_none(),
            Some((prev, prev_hash)) => {
                prev.bid_id == event.bid_id
                    && prev.seq < event.seq
                    && event.prev_hash.as_deref() == Some(prev_hash.as_str())
            }
        };
        if !linked {
            return Err(ValidationError::BrokenHistory { seq: event.seq }.into());
        }

        let (hash, _) = event.build()?;
        previous = Some((event, hash));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_keys_sort_by_sequence() {
        let bid = BidId::generate().unwrap();
        assert!(event_key(&bid, 9) < event_key(&bid, 10));
        assert!(event_key(&bid, 10).starts_with(&event_prefix(&bid)));
    }
}
