//! Service layer API for bid negotiation operations
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bid::{Bid, BidDraft, CounterOffer};
use crate::clock::{Clock, SystemClock};
use crate::config::NegotiationConfig;
use crate::error::{BidError, ConflictReason, ValidationError};
use crate::history::BidEvent;
use crate::listener::NegotiationListener;
use crate::negotiation::{self, Action, Transition};
use crate::order::{Order, PaymentConfirmation};
use crate::product::{Product, ProductListing};
use crate::store::{Store, abort, keys, lift, tx_product, tx_put_product};
use crate::sweeper::SweepReport;
use crate::types::{Actor, BidId, OrderId, ProductId, Role};
use crate::views::{BidQuery, BidStats, BidView, Page};

/// Result of a payment confirmation. `created` is false when the confirmation
/// was a replay and the existing order was returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub order: Order,
    pub created: bool,
}

pub struct BidService {
    store: Store,
    rules: NegotiationConfig,
    clock: Arc<dyn Clock>,
    listeners: Vec<Arc<dyn NegotiationListener>>,
}

impl BidService {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, BidError> {
        Ok(Self {
            store: Store::open(&instance)?,
            rules: NegotiationConfig::default(),
            clock: Arc::new(SystemClock),
            listeners: Vec::new(),
        })
    }

    pub fn with_config(mut self, rules: NegotiationConfig) -> Result<Self, BidError> {
        rules.validate()?;
        self.rules = rules;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn NegotiationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn rules(&self) -> &NegotiationConfig {
        &self.rules
    }

    fn notify(&self, event: &BidEvent) {
        for listener in &self.listeners {
            listener.on_bid_event(event);
        }
    }

    fn committed(&self, transition: &Transition) {
        let bid = &transition.bid;
        info!(
            bid_id = %bid.id,
            status = %bid.status,
            round = bid.negotiation_round,
            version = bid.version,
            "bid transition committed"
        );
        self.notify(&transition.event);
    }

    fn refused<T>(
        &self,
        operation: &'static str,
        result: Result<T, BidError>,
    ) -> Result<T, BidError> {
        if let Err(err) = &result {
            debug!(operation, kind = ?err.kind(), error = %err, "operation refused");
        }
        result
    }

    // ---- products -------------------------------------------------------

    #[tracing::instrument(skip_all, fields(farmer = %actor.user_id))]
    pub fn list_product(
        &self,
        actor: &Actor,
        listing: ProductListing,
    ) -> Result<Product, BidError> {
        if actor.role != Role::Farmer {
            return Err(BidError::Forbidden("only farmers can list products".into()));
        }
        let product = listing.validate_and_finalise(
            ProductId::generate()?,
            actor.user_id.clone(),
            &self.clock.now(),
        )?;
        self.store.insert_product(&product)?;
        info!(product_id = %product.id, stage = ?product.stage, "product listed");
        Ok(product)
    }

    #[tracing::instrument(skip_all, fields(product_id = %product_id))]
    pub fn publish_product(
        &self,
        actor: &Actor,
        product_id: &ProductId,
    ) -> Result<Product, BidError> {
        let result = self.modify_product(actor, product_id, |product| product.publish());
        self.refused("publish_product", result)
    }

    #[tracing::instrument(skip_all, fields(product_id = %product_id))]
    pub fn withdraw_product(
        &self,
        actor: &Actor,
        product_id: &ProductId,
    ) -> Result<Product, BidError> {
        let result = self.modify_product(actor, product_id, |product| product.withdraw());
        self.refused("withdraw_product", result)
    }

    #[tracing::instrument(skip_all, fields(product_id = %product_id, visible = visible))]
    pub fn set_browse_visibility(
        &self,
        actor: &Actor,
        product_id: &ProductId,
        visible: bool,
    ) -> Result<Product, BidError> {
        let result = self.modify_product(actor, product_id, |product| {
            product.available_for_browse = visible;
            Ok(())
        });
        self.refused("set_browse_visibility", result)
    }

    pub fn get_product(&self, product_id: &ProductId) -> Result<Product, BidError> {
        self.store.product(product_id)
    }

    pub fn is_biddable(&self, product_id: &ProductId) -> Result<bool, BidError> {
        Ok(self.store.product(product_id)?.is_biddable())
    }

    fn modify_product(
        &self,
        actor: &Actor,
        product_id: &ProductId,
        change: impl Fn(&mut Product) -> Result<(), BidError>,
    ) -> Result<Product, BidError> {
        let now = self.clock.now();
        self.store.update_product(|products| {
            let mut product = tx_product(products, product_id)?;
            if actor.role != Role::Farmer || product.farmer_id != actor.user_id {
                return abort(BidError::Forbidden(format!(
                    "{} does not own product {product_id}",
                    actor.user_id
                )));
            }
            lift(change(&mut product))?;
            product.updated_at = now.clone();
            tx_put_product(products, &product)?;
            Ok(product)
        })
    }

    // ---- negotiation ----------------------------------------------------

    /// Open a negotiation. The product is locked to the new bid in the same
    /// transaction that writes it, so concurrent placements on one product
    /// yield exactly one bid.
    #[tracing::instrument(skip_all, fields(buyer = %actor.user_id))]
    pub fn place_bid(&self, actor: &Actor, draft: BidDraft) -> Result<Bid, BidError> {
        let result = self.try_place_bid(actor, draft);
        self.refused("place_bid", result)
    }

    fn try_place_bid(&self, actor: &Actor, draft: BidDraft) -> Result<Bid, BidError> {
        if actor.role != Role::Buyer {
            return Err(BidError::Forbidden("only buyers can place bids".into()));
        }
        let terms = draft.validate(self.rules.max_message_len)?;
        let id = BidId::generate()?;
        let now = self.clock.now();

        let (placed, lapsed) = self.store.negotiate(|tx| {
            let mut lapsed = Vec::new();
            let product = tx.product(&terms.product_id)?;
            if product.farmer_id == actor.user_id {
                return abort(BidError::Forbidden("cannot bid on your own product".into()));
            }

            // a lapsed negotiation never blocks a new one
            let pair = keys::active(&actor.user_id, &terms.product_id);
            if let Some(existing) = tx.active_bid_for(&pair)? {
                match tx.expire_lapsed(&existing, &now)? {
                    Some(expired) => lapsed.push(expired),
                    None => return abort(ConflictReason::DuplicateActiveBid),
                }
            }
            if let Some(holder) = product.locked_by() {
                if let Some(expired) = tx.expire_lapsed(holder, &now)? {
                    lapsed.push(expired);
                }
            }

            let mut product = tx.product(&terms.product_id)?;
            if !product.is_biddable() {
                return abort(ConflictReason::ProductNotBiddable);
            }
            if terms.quantity > product.available_quantity {
                return abort(ValidationError::QuantityExceedsStock {
                    requested: terms.quantity.to_string(),
                    available: product.available_quantity.to_string(),
                });
            }

            let mut bid = lift(
                Bid::new_placed(
                    id.clone(),
                    terms.clone(),
                    actor.user_id.clone(),
                    product.farmer_id.clone(),
                    &now,
                    self.rules.bid_ttl_secs,
                )
                .map_err(BidError::from),
            )?;
            let event = lift(negotiation::open(&mut bid))?;
            lift(product.lock(&bid.id))?;
            product.updated_at = now.clone();
            tx.put_product(&product)?;
            tx.insert_placed(&bid, &event)?;

            Ok((
                Transition {
                    bid,
                    event,
                    effect: negotiation::ProductEffect::Keep,
                },
                lapsed,
            ))
        })?;

        for expired in &lapsed {
            self.committed(expired);
        }
        self.committed(&placed);
        Ok(placed.bid)
    }

    /// Apply `action` on behalf of `actor`. With `expected_version` set the
    /// call fails unless the stored bid is still at that version.
    #[tracing::instrument(skip_all, fields(bid_id = %bid_id, actor = %actor.user_id))]
    pub fn act(
        &self,
        bid_id: &BidId,
        actor: &Actor,
        action: Action,
        expected_version: Option<u64>,
    ) -> Result<Bid, BidError> {
        let now = self.clock.now();
        let result = self.store.negotiate(|tx| {
            let bid = tx.bid(bid_id)?;
            lift(negotiation::party_of(&bid, actor))?;
            if let Some(expected) = expected_version {
                if expected != bid.version {
                    return abort(ConflictReason::StaleVersion {
                        expected,
                        actual: bid.version,
                    });
                }
            }

            let transition = lift(negotiation::apply(&bid, actor, &action, &now, &self.rules))?;
            if let Action::Counter(CounterOffer {
                quantity: Some(quantity),
                ..
            }) = &action
            {
                let product = tx.product(&bid.product_id)?;
                if *quantity > product.available_quantity {
                    return abort(ValidationError::QuantityExceedsStock {
                        requested: quantity.to_string(),
                        available: product.available_quantity.to_string(),
                    });
                }
            }
            tx.commit(&transition, &now)?;
            Ok(transition)
        });

        let transition = self.refused("act", result)?;
        self.committed(&transition);
        Ok(transition.bid)
    }

    pub fn accept_bid(&self, bid_id: &BidId, actor: &Actor) -> Result<Bid, BidError> {
        self.act(bid_id, actor, Action::Accept, None)
    }

    pub fn reject_bid(
        &self,
        bid_id: &BidId,
        actor: &Actor,
        message: Option<&str>,
    ) -> Result<Bid, BidError> {
        let action = Action::Reject {
            message: message.map(str::to_owned),
        };
        self.act(bid_id, actor, action, None)
    }

    pub fn counter_bid(
        &self,
        bid_id: &BidId,
        actor: &Actor,
        offer: CounterOffer,
    ) -> Result<Bid, BidError> {
        self.act(bid_id, actor, Action::Counter(offer), None)
    }

    /// Move a lapsed bid to EXPIRED and reopen its product. Safe to call any
    /// number of times; `None` means there was nothing to expire.
    #[tracing::instrument(skip_all, fields(bid_id = %bid_id))]
    pub fn expire_bid(&self, bid_id: &BidId) -> Result<Option<Bid>, BidError> {
        let now = self.clock.now();
        let expired = self.store.negotiate(|tx| tx.expire_lapsed(bid_id, &now))?;
        Ok(expired.map(|transition| {
            self.committed(&transition);
            transition.bid
        }))
    }

    /// One pass over every active bid. Failures on individual bids are counted
    /// and logged; the pass carries on.
    pub fn expire_stale_bids(&self) -> Result<SweepReport, BidError> {
        let mut report = SweepReport::default();
        for bid_id in self.store.active_bid_ids()? {
            report.scanned += 1;
            match self.expire_bid(&bid_id) {
                Ok(Some(_)) => report.expired += 1,
                Ok(None) => {}
                Err(err) => {
                    warn!(bid_id = %bid_id, error = %err, "failed to expire bid");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    // ---- orders ---------------------------------------------------------

    /// Materialise the order for an accepted bid. Replaying the same
    /// confirmation returns the order created the first time.
    #[tracing::instrument(skip_all, fields(bid_id = %payment.bid_id))]
    pub fn confirm_payment(&self, payment: PaymentConfirmation) -> Result<Materialized, BidError> {
        let result = self.try_confirm_payment(&payment);
        let materialized = self.refused("confirm_payment", result)?;
        if materialized.created {
            info!(
                order_id = %materialized.order.id,
                order_number = %materialized.order.order_number,
                "order created"
            );
            for listener in &self.listeners {
                listener.on_order_created(&materialized.order);
            }
        }
        Ok(materialized)
    }

    fn try_confirm_payment(&self, payment: &PaymentConfirmation) -> Result<Materialized, BidError> {
        payment.validate()?;
        let order_id = OrderId::generate()?;
        let now = self.clock.now();

        self.store.settle(|tx| {
            let bid = tx.bid(&payment.bid_id)?;
            if let Some(existing) = tx.order_for(&bid.id)? {
                if existing.payment_reference == payment.reference {
                    return Ok(Materialized {
                        order: existing,
                        created: false,
                    });
                }
                return abort(ConflictReason::DuplicateOrder);
            }

            let order = lift(Order::from_accepted_bid(
                order_id.clone(),
                &bid,
                payment,
                &self.rules.order_number_prefix,
                &now,
            ))?;
            tx.insert_order(&order)?;
            Ok(Materialized {
                order,
                created: true,
            })
        })
    }

    pub fn get_order(&self, order_id: &OrderId) -> Result<Order, BidError> {
        self.store.order(order_id)
    }

    pub fn order_for_bid(&self, bid_id: &BidId) -> Result<Option<Order>, BidError> {
        match self.store.order_id_for_bid(bid_id)? {
            Some(order_id) => Ok(Some(self.store.order(&order_id)?)),
            None => Ok(None),
        }
    }

    // ---- reads ----------------------------------------------------------

    pub fn get_bid(&self, bid_id: &BidId, viewer: &Actor) -> Result<BidView, BidError> {
        let bid = self.store.bid(bid_id)?;
        negotiation::party_of(&bid, viewer)?;
        let product = self.store.product(&bid.product_id)?;
        Ok(BidView::new(bid, &product, &self.clock.now()))
    }

    pub fn bid_history(&self, bid_id: &BidId, viewer: &Actor) -> Result<Vec<BidEvent>, BidError> {
        let bid = self.store.bid(bid_id)?;
        negotiation::party_of(&bid, viewer)?;
        self.store.events(bid_id)
    }

    /// Bids on one of the caller's products, newest first.
    pub fn product_bids(
        &self,
        actor: &Actor,
        product_id: &ProductId,
        query: BidQuery,
    ) -> Result<Page<BidView>, BidError> {
        let product = self.store.product(product_id)?;
        if actor.role != Role::Farmer || product.farmer_id != actor.user_id {
            return Err(BidError::Forbidden(format!(
                "{} does not own product {product_id}",
                actor.user_id
            )));
        }

        let now = self.clock.now();
        let views = self
            .load_bids(&keys::product_prefix(product_id), &query)?
            .into_iter()
            .map(|bid| BidView::new(bid, &product, &now))
            .collect();
        Ok(Page::paginate(views, query.page, query.limit))
    }

    /// The calling buyer's own bids across all products, newest first.
    pub fn buyer_bids(&self, actor: &Actor, query: BidQuery) -> Result<Page<BidView>, BidError> {
        if actor.role != Role::Buyer {
            return Err(BidError::Forbidden("only buyers have placed bids".into()));
        }

        let now = self.clock.now();
        let mut products: HashMap<ProductId, Product> = HashMap::new();
        let mut views = Vec::new();
        for bid in self.load_bids(&keys::buyer_prefix(&actor.user_id), &query)? {
            let product = match products.entry(bid.product_id.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(self.store.product(&bid.product_id)?),
            };
            views.push(BidView::new(bid, product, &now));
        }
        Ok(Page::paginate(views, query.page, query.limit))
    }

    /// Counts over the bids the caller takes part in, as buyer or as farmer.
    pub fn bid_stats(&self, actor: &Actor) -> Result<BidStats, BidError> {
        let prefix = match actor.role {
            Role::Buyer => keys::buyer_prefix(&actor.user_id),
            Role::Farmer => keys::farmer_prefix(&actor.user_id),
        };
        let bids = self.load_bids(&prefix, &BidQuery::default())?;
        Ok(BidStats::tally(&bids, &self.clock.now()))
    }

    fn load_bids(&self, prefix: &str, query: &BidQuery) -> Result<Vec<Bid>, BidError> {
        let mut bids = Vec::new();
        for bid_id in self.store.bid_ids_under(prefix)? {
            let bid = self.store.bid(&bid_id)?;
            if query.matches(&bid) {
                bids.push(bid);
            }
        }
        bids.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(bids)
    }
}
