//! sled persistence: tree layout, record codec, and the transactional views
//! every state change goes through.
//!
//! Trees:
//! - `products`, `bids`, `orders`: records keyed by their bech32 id
//! - `events`: bid history keyed `{bid}/{seq}`
//! - `index`: secondary keys, see [`keys`]

use chrono::Utc;
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};

use crate::bid::Bid;
use crate::error::{BidError, ValidationError};
use crate::history::{self, BidEvent};
use crate::negotiation::{self, ProductEffect, Transition};
use crate::order::Order;
use crate::product::Product;
use crate::types::{BidId, OrderId, ProductId, TimeStamp};

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, BidError>;

pub(crate) fn abort<T>(err: impl Into<BidError>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

pub(crate) fn lift<T>(result: Result<T, BidError>) -> TxResult<T> {
    result.map_err(ConflictableTransactionError::Abort)
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, BidError> {
    minicbor::to_vec(value).map_err(|e| BidError::Codec(e.to_string()))
}

pub(crate) fn decode<T>(raw: &[u8]) -> Result<T, BidError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(raw).map_err(|e| BidError::Codec(e.to_string()))
}

fn tx_get<T>(tree: &TransactionalTree, key: &str) -> TxResult<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(raw) => lift(decode(&raw)).map(Some),
        None => Ok(None),
    }
}

fn tx_put<T: minicbor::Encode<()>>(tree: &TransactionalTree, key: &str, value: &T) -> TxResult<()> {
    tree.insert(key.as_bytes(), lift(encode(value))?)?;
    Ok(())
}

fn tx_get_str(tree: &TransactionalTree, key: &str) -> TxResult<Option<String>> {
    match tree.get(key.as_bytes())? {
        Some(raw) => match std::str::from_utf8(&raw) {
            Ok(value) => Ok(Some(value.to_owned())),
            Err(e) => abort(BidError::Codec(e.to_string())),
        },
        None => Ok(None),
    }
}

/// Layout of the `index` tree.
pub(crate) mod keys {
    use crate::types::{BidId, ProductId, UserId};

    pub const ACTIVE: &str = "a/";

    /// The one active bid of `buyer` on `product`, if any. Value: bid id.
    pub fn active(buyer: &UserId, product: &ProductId) -> String {
        format!("{ACTIVE}{buyer}/{product}")
    }
    pub fn product_prefix(product: &ProductId) -> String {
        format!("p/{product}/")
    }
    pub fn buyer_prefix(buyer: &UserId) -> String {
        format!("b/{buyer}/")
    }
    pub fn farmer_prefix(farmer: &UserId) -> String {
        format!("f/{farmer}/")
    }
    /// The order materialised for a bid. Value: order id.
    pub fn order_of(bid: &BidId) -> String {
        format!("o/{bid}")
    }
}

pub struct Store {
    products: sled::Tree,
    bids: sled::Tree,
    orders: sled::Tree,
    events: sled::Tree,
    index: sled::Tree,
}

impl Store {
    pub fn open(db: &sled::Db) -> Result<Self, BidError> {
        Ok(Self {
            products: db.open_tree("products")?,
            bids: db.open_tree("bids")?,
            orders: db.open_tree("orders")?,
            events: db.open_tree("events")?,
            index: db.open_tree("index")?,
        })
    }

    pub fn product(&self, id: &ProductId) -> Result<Product, BidError> {
        match self.products.get(id.as_str().as_bytes())? {
            Some(raw) => decode(&raw),
            None => Err(BidError::not_found("product", id)),
        }
    }

    pub fn bid(&self, id: &BidId) -> Result<Bid, BidError> {
        match self.bids.get(id.as_str().as_bytes())? {
            Some(raw) => decode(&raw),
            None => Err(BidError::not_found("bid", id)),
        }
    }

    pub fn order(&self, id: &OrderId) -> Result<Order, BidError> {
        match self.orders.get(id.as_str().as_bytes())? {
            Some(raw) => decode(&raw),
            None => Err(BidError::not_found("order", id)),
        }
    }

    pub fn order_id_for_bid(&self, bid_id: &BidId) -> Result<Option<OrderId>, BidError> {
        match self.index.get(keys::order_of(bid_id).as_bytes())? {
            Some(raw) => Ok(Some(parse_stored(&raw, OrderId::parse)?)),
            None => Ok(None),
        }
    }

    pub fn insert_product(&self, product: &Product) -> Result<(), BidError> {
        self.products
            .insert(product.id.as_str().as_bytes(), encode(product)?)?;
        Ok(())
    }

    /// Full history of a bid in sequence order.
    pub fn events(&self, bid_id: &BidId) -> Result<Vec<BidEvent>, BidError> {
        self.events
            .scan_prefix(history::event_prefix(bid_id).as_bytes())
            .map(|entry| {
                let (_, raw) = entry?;
                decode(&raw)
            })
            .collect()
    }

    /// Bid ids listed under an index prefix such as [`keys::buyer_prefix`].
    pub fn bid_ids_under(&self, prefix: &str) -> Result<Vec<BidId>, BidError> {
        self.index
            .scan_prefix(prefix.as_bytes())
            .map(|entry| {
                let (key, _) = entry?;
                parse_stored(&key[prefix.len()..], BidId::parse)
            })
            .collect()
    }

    /// Every bid currently in PLACED or COUNTERED.
    pub fn active_bid_ids(&self) -> Result<Vec<BidId>, BidError> {
        self.index
            .scan_prefix(keys::ACTIVE.as_bytes())
            .map(|entry| {
                let (_, value) = entry?;
                parse_stored(&value, BidId::parse)
            })
            .collect()
    }

    /// Run `f` atomically over products, bids, index and events. sled retries
    /// the closure on conflicting concurrent access, so it must not have side
    /// effects outside the transaction.
    pub(crate) fn negotiate<A>(
        &self,
        f: impl Fn(&NegotiationTx<'_>) -> TxResult<A>,
    ) -> Result<A, BidError> {
        let result = (&self.bids, &self.products, &self.index, &self.events).transaction(
            |(bids, products, index, events)| {
                f(&NegotiationTx {
                    bids,
                    products,
                    index,
                    events,
                })
            },
        );
        Ok(result?)
    }

    pub(crate) fn settle<A>(
        &self,
        f: impl Fn(&SettlementTx<'_>) -> TxResult<A>,
    ) -> Result<A, BidError> {
        let result = (&self.bids, &self.orders, &self.index)
            .transaction(|(bids, orders, index)| f(&SettlementTx { bids, orders, index }));
        Ok(result?)
    }

    /// Read-modify-write of a single product record.
    pub(crate) fn update_product<A>(
        &self,
        f: impl Fn(&TransactionalTree) -> TxResult<A>,
    ) -> Result<A, BidError> {
        Ok(self.products.transaction(|products| f(products))?)
    }
}

fn parse_stored<T>(
    raw: &[u8],
    parse: fn(&str) -> Result<T, ValidationError>,
) -> Result<T, BidError> {
    let text = std::str::from_utf8(raw).map_err(|e| BidError::Codec(e.to_string()))?;
    parse(text).map_err(|e| BidError::Codec(e.to_string()))
}

pub(crate) fn tx_product(products: &TransactionalTree, id: &ProductId) -> TxResult<Product> {
    match tx_get(products, id.as_str())? {
        Some(product) => Ok(product),
        None => abort(BidError::not_found("product", id)),
    }
}

pub(crate) fn tx_put_product(products: &TransactionalTree, product: &Product) -> TxResult<()> {
    tx_put(products, product.id.as_str(), product)
}

pub(crate) struct NegotiationTx<'a> {
    bids: &'a TransactionalTree,
    products: &'a TransactionalTree,
    index: &'a TransactionalTree,
    events: &'a TransactionalTree,
}

impl NegotiationTx<'_> {
    pub fn bid(&self, id: &BidId) -> TxResult<Bid> {
        match tx_get(self.bids, id.as_str())? {
            Some(bid) => Ok(bid),
            None => abort(BidError::not_found("bid", id)),
        }
    }

    pub fn product(&self, id: &ProductId) -> TxResult<Product> {
        tx_product(self.products, id)
    }

    pub fn put_product(&self, product: &Product) -> TxResult<()> {
        tx_put_product(self.products, product)
    }

    pub fn active_bid_for(&self, key: &str) -> TxResult<Option<BidId>> {
        match tx_get_str(self.index, key)? {
            Some(raw) => {
                lift(BidId::parse(&raw).map_err(|e| BidError::Codec(e.to_string()))).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Persist a newly placed bid with its opening event and index entries.
    pub fn insert_placed(&self, bid: &Bid, event: &BidEvent) -> TxResult<()> {
        let id = bid.id.as_str().as_bytes();
        tx_put(self.bids, bid.id.as_str(), bid)?;
        tx_put(self.events, &event.storage_key(), event)?;

        self.index
            .insert(keys::active(&bid.buyer_id, &bid.product_id).as_bytes(), id)?;
        for prefix in [
            keys::product_prefix(&bid.product_id),
            keys::buyer_prefix(&bid.buyer_id),
            keys::farmer_prefix(&bid.farmer_id),
        ] {
            self.index
                .insert(format!("{prefix}{}", bid.id).as_bytes(), Vec::<u8>::new())?;
        }
        Ok(())
    }

    /// Write a transition: the product side effect, the bid, its event, and
    /// release of the active-pair index once the bid is terminal.
    pub fn commit(&self, transition: &Transition, now: &TimeStamp<Utc>) -> TxResult<()> {
        let bid = &transition.bid;

        if transition.effect != ProductEffect::Keep {
            let mut product = self.product(&bid.product_id)?;
            let changed = match transition.effect {
                ProductEffect::Unlock => product.unlock(&bid.id),
                ProductEffect::MarkSold => {
                    lift(product.mark_sold(&bid.id, bid.price))?;
                    true
                }
                ProductEffect::Keep => false,
            };
            if changed {
                product.updated_at = now.clone();
                self.put_product(&product)?;
            }
        }

        if bid.status.is_terminal() {
            self.index
                .remove(keys::active(&bid.buyer_id, &bid.product_id).as_bytes())?;
        }
        tx_put(self.bids, bid.id.as_str(), bid)?;
        tx_put(self.events, &transition.event.storage_key(), &transition.event)?;
        Ok(())
    }

    /// Expire `id` if it has lapsed, committing the transition. `None` when
    /// the bid is still live or already closed.
    pub fn expire_lapsed(&self, id: &BidId, now: &TimeStamp<Utc>) -> TxResult<Option<Transition>> {
        let bid = self.bid(id)?;
        match lift(negotiation::expire(&bid, now))? {
            Some(transition) => {
                self.commit(&transition, now)?;
                Ok(Some(transition))
            }
            None => Ok(None),
        }
    }
}

pub(crate) struct SettlementTx<'a> {
    bids: &'a TransactionalTree,
    orders: &'a TransactionalTree,
    index: &'a TransactionalTree,
}

impl SettlementTx<'_> {
    pub fn bid(&self, id: &BidId) -> TxResult<Bid> {
        match tx_get(self.bids, id.as_str())? {
            Some(bid) => Ok(bid),
            None => abort(BidError::not_found("bid", id)),
        }
    }

    pub fn order_for(&self, bid_id: &BidId) -> TxResult<Option<Order>> {
        let Some(order_id) = tx_get_str(self.index, &keys::order_of(bid_id))? else {
            return Ok(None);
        };
        match tx_get(self.orders, &order_id)? {
            Some(order) => Ok(Some(order)),
            None => abort(BidError::Codec(format!(
                "order index for bid {bid_id} points at missing order {order_id}"
            ))),
        }
    }

    pub fn insert_order(&self, order: &Order) -> TxResult<()> {
        tx_put(self.orders, order.id.as_str(), order)?;
        self.index.insert(
            keys::order_of(&order.bid_id).as_bytes(),
            order.id.as_str().as_bytes(),
        )?;
        Ok(())
    }
}
