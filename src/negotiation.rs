//! The bid negotiation state machine.
//!
//! ```text
//! place ──► PLACED ──counter──► COUNTERED ──counter──► COUNTERED ...
//!             │                    │            (while round < max)
//!             ├──accept────────────┴──► ACCEPTED   product sold
//!             ├──reject────────────┴──► REJECTED   product reopened
//!             └──expire (system)───┴──► EXPIRED    product reopened
//! ```
//!
//! Everything here is pure: it decides the next bid state and which product
//! effect must accompany it. The service applies both inside one storage
//! transaction. Only the party that did not make the latest offer may act.
use chrono::Utc;

use crate::bid::{Bid, BidStatus, CounterOffer, check_message};
use crate::config::NegotiationConfig;
use crate::error::{BidError, ConflictReason};
use crate::history::{BidEvent, EventKind};
use crate::types::{Actor, Role, TimeStamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Accept,
    Reject { message: Option<String> },
    Counter(CounterOffer),
}

/// What must happen to the bid's product in the same atomic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductEffect {
    Keep,
    Unlock,
    MarkSold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub bid: Bid,
    pub event: BidEvent,
    pub effect: ProductEffect,
}

/// Resolve which side of `bid` the actor speaks for. The claimed role must
/// match the participant slot their user id occupies.
pub fn party_of(bid: &Bid, actor: &Actor) -> Result<Role, BidError> {
    match bid.party(&actor.user_id) {
        Some(role) if role == actor.role => Ok(role),
        _ => Err(BidError::Forbidden(format!(
            "{} {} is not a party to bid {}",
            actor.role, actor.user_id, bid.id
        ))),
    }
}

/// Guard shared by every user action: the bid must still be active and not
/// logically expired, even if the sweeper has not caught up with it.
pub fn ensure_open(bid: &Bid, now: &TimeStamp<Utc>) -> Result<(), BidError> {
    if bid.status.is_terminal() {
        return Err(ConflictReason::AlreadyClosed(bid.status).into());
    }
    if bid.is_expired_at(now) {
        return Err(BidError::Expired(bid.id.clone()));
    }
    Ok(())
}

pub fn apply(
    bid: &Bid,
    actor: &Actor,
    action: &Action,
    now: &TimeStamp<Utc>,
    rules: &NegotiationConfig,
) -> Result<Transition, BidError> {
    let party = party_of(bid, actor)?;
    ensure_open(bid, now)?;

    if party != bid.awaiting() {
        return Err(ConflictReason::NotYourTurn {
            status: bid.status,
            awaiting: bid.awaiting(),
        }
        .into());
    }

    let mut next = bid.clone();
    next.version += 1;
    next.updated_at = now.clone();

    let (kind, effect) = match action {
        Action::Accept => {
            next.status = BidStatus::Accepted;
            (EventKind::Accepted { by: party }, ProductEffect::MarkSold)
        }
        Action::Reject { message } => {
            check_message(message.as_deref(), rules.max_message_len)?;
            next.status = BidStatus::Rejected;
            next.message = message.clone();
            (EventKind::Rejected { by: party }, ProductEffect::Unlock)
        }
        Action::Counter(offer) => {
            offer.validate(rules.max_message_len)?;
            if bid.negotiation_round >= rules.max_negotiation_rounds {
                return Err(ConflictReason::NegotiationLimitReached {
                    max: rules.max_negotiation_rounds,
                }
                .into());
            }

            next.status = BidStatus::Countered;
            next.price = offer.price;
            next.quantity = offer.quantity.unwrap_or(bid.quantity);
            next.message = offer.message.clone();
            next.negotiation_round += 1;
            next.last_offer_by = party;
            if rules.reset_expiry_on_counter {
                next.expires_at = now.plus_secs(rules.bid_ttl_secs)?;
            }
            (EventKind::Countered { by: party }, ProductEffect::Keep)
        }
    };

    let event = chain_event(&mut next, kind, Some(actor.user_id.clone()))?;
    Ok(Transition {
        bid: next,
        event,
        effect,
    })
}

/// System-driven expiry. `None` when there is nothing to do, which makes
/// repeated sweeps over the same bid harmless.
pub fn expire(bid: &Bid, now: &TimeStamp<Utc>) -> Result<Option<Transition>, BidError> {
    if !bid.is_expired_at(now) {
        return Ok(None);
    }

    let mut next = bid.clone();
    next.status = BidStatus::Expired;
    next.version += 1;
    next.updated_at = now.clone();

    let event = chain_event(&mut next, EventKind::Expired, None)?;
    Ok(Some(Transition {
        bid: next,
        event,
        effect: ProductEffect::Unlock,
    }))
}

/// Record the opening event of a freshly placed bid.
pub fn open(bid: &mut Bid) -> Result<BidEvent, BidError> {
    let buyer = bid.buyer_id.clone();
    chain_event(bid, EventKind::Placed, Some(buyer))
}

fn chain_event(
    bid: &mut Bid,
    kind: EventKind,
    actor: Option<UserId>,
) -> Result<BidEvent, BidError> {
    let event = BidEvent::record(bid, kind, actor);
    let (hash, _) = event.build()?;
    bid.last_event_hash = Some(hash);
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bid::BidDraft;
    use crate::types::{Amount, BidId, ProductId};

    fn placed(now: &TimeStamp<Utc>) -> (Bid, Actor, Actor) {
        let buyer = Actor::buyer(UserId::generate().unwrap());
        let farmer = Actor::farmer(UserId::generate().unwrap());
        let terms = BidDraft::new()
            .set_product(ProductId::generate().unwrap())
            .set_price(Amount::from(2000))
            .set_quantity(Amount::from(10))
            .validate(500)
            .unwrap();
        let mut bid = Bid::new_placed(
            BidId::generate().unwrap(),
            terms,
            buyer.user_id.clone(),
            farmer.user_id.clone(),
            now,
            3600,
        )
        .unwrap();
        open(&mut bid).unwrap();
        (bid, buyer, farmer)
    }

    #[test]
    fn buyer_cannot_act_on_own_placed_bid() {
        let now = TimeStamp::new();
        let (bid, buyer, _) = placed(&now);
        let rules = NegotiationConfig::default();

        let err = apply(
            &bid,
            &buyer,
            &Action::Counter(CounterOffer::new(Amount::from(1900))),
            &now,
            &rules,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BidError::Conflict(ConflictReason::NotYourTurn {
                awaiting: Role::Farmer,
                ..
            })
        ));
    }

    #[test]
    fn stranger_is_forbidden() {
        let now = TimeStamp::new();
        let (bid, _, _) = placed(&now);
        let stranger = Actor::farmer(UserId::generate().unwrap());

        let err = apply(
            &bid,
            &stranger,
            &Action::Accept,
            &now,
            &NegotiationConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BidError::Forbidden(_)));
    }

    #[test]
    fn role_must_match_participant_slot() {
        let now = TimeStamp::new();
        let (bid, buyer, _) = placed(&now);
        // the buyer's id presented with a farmer role
        let imposter = Actor::farmer(buyer.user_id.clone());

        let err = apply(
            &bid,
            &imposter,
            &Action::Accept,
            &now,
            &NegotiationConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BidError::Forbidden(_)));
    }

    #[test]
    fn counter_moves_turn_and_round() {
        let now = TimeStamp::new();
        let (bid, _, farmer) = placed(&now);

        let t = apply(
            &bid,
            &farmer,
            &Action::Counter(CounterOffer::new(Amount::from(2200)).with_message("firm")),
            &now,
            &NegotiationConfig::default(),
        )
        .unwrap();

        assert_eq!(t.bid.status, BidStatus::Countered);
        assert_eq!(t.bid.negotiation_round, 2);
        assert_eq!(t.bid.price, Amount::from(2200));
        assert_eq!(t.bid.quantity, Amount::from(10));
        assert_eq!(t.bid.awaiting(), Role::Buyer);
        assert_eq!(t.bid.version, bid.version + 1);
        assert_eq!(t.effect, ProductEffect::Keep);
        assert_eq!(t.event.prev_hash, bid.last_event_hash);
    }

    #[test]
    fn buyer_counter_again_hands_turn_back_to_farmer() {
        let now = TimeStamp::new();
        let (bid, buyer, farmer) = placed(&now);
        let rules = NegotiationConfig {
            max_negotiation_rounds: 3,
            ..NegotiationConfig::default()
        };

        let countered = apply(
            &bid,
            &farmer,
            &Action::Counter(CounterOffer::new(Amount::from(2200))),
            &now,
            &rules,
        )
        .unwrap()
        .bid;
        let again = apply(
            &countered,
            &buyer,
            &Action::Counter(CounterOffer::new(Amount::from(2100))),
            &now,
            &rules,
        )
        .unwrap()
        .bid;

        assert_eq!(again.status, BidStatus::Countered);
        assert_eq!(again.negotiation_round, 3);
        assert_eq!(again.awaiting(), Role::Farmer);
    }

    #[test]
    fn expire_is_a_no_op_until_due_and_after_close() {
        let now = TimeStamp::new_with(2026, 5, 1, 12, 0, 0);
        let (bid, _, _) = placed(&now);

        assert!(expire(&bid, &now).unwrap().is_none());

        let later = now.plus_secs(3601).unwrap();
        let t = expire(&bid, &later).unwrap().unwrap();
        assert_eq!(t.bid.status, BidStatus::Expired);
        assert_eq!(t.effect, ProductEffect::Unlock);
        assert!(expire(&t.bid, &later).unwrap().is_none());
    }

    #[test]
    fn logically_expired_bid_refuses_actions() {
        let now = TimeStamp::new_with(2026, 5, 1, 12, 0, 0);
        let (bid, _, farmer) = placed(&now);

        let err = apply(
            &bid,
            &farmer,
            &Action::Accept,
            &now.plus_secs(7200).unwrap(),
            &NegotiationConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BidError::Expired(_)));
    }
}
