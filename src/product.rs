//! Product listings and the availability gate driven by bid lifecycle events.
//!
//! A product's *stage* is its listing lifecycle, owned by the farmer. Its
//! *availability* is owned by the negotiation engine: `Open`, `Locked` by
//! exactly one active bid, or `Sold` to an accepted bid. The two never share
//! a field, so "not yet published" and "locked for negotiation" cannot be
//! confused.
use chrono::Utc;

use crate::error::{BidError, ConflictReason, ValidationError};
use crate::types::{Amount, BidId, ProductId, TimeStamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ProductStage {
    #[n(0)]
    Draft,
    #[n(1)]
    Published,
    #[n(2)]
    Withdrawn,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum Availability {
    #[n(0)]
    Open,
    #[n(1)]
    Locked {
        #[n(0)]
        bid_id: BidId,
    },
    #[n(2)]
    Sold {
        #[n(0)]
        bid_id: BidId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Product {
    #[n(0)]
    pub id: ProductId,
    #[n(1)]
    pub farmer_id: UserId, // owner, immutable
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub stage: ProductStage,
    #[n(4)]
    pub availability: Availability,
    #[n(5)]
    pub available_for_browse: bool,
    #[n(6)]
    pub available_quantity: Amount,
    #[n(7)]
    pub expected_price: Option<Amount>,
    #[n(8)]
    pub final_price: Option<Amount>, // set once sold
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub updated_at: TimeStamp<Utc>,
}

impl Product {
    pub fn is_biddable(&self) -> bool {
        self.stage == ProductStage::Published
            && self.availability == Availability::Open
            && self.available_for_browse
            && self.available_quantity.is_positive()
    }

    pub fn locked_by(&self) -> Option<&BidId> {
        match &self.availability {
            Availability::Locked { bid_id } => Some(bid_id),
            _ => None,
        }
    }

    /// Take the product off the market for the duration of `bid_id`'s negotiation.
    pub fn lock(&mut self, bid_id: &BidId) -> Result<(), BidError> {
        match &self.availability {
            Availability::Locked { .. } => Err(ConflictReason::ProductLocked.into()),
            Availability::Sold { .. } => Err(ConflictReason::ProductNotBiddable.into()),
            Availability::Open if !self.is_biddable() => {
                Err(ConflictReason::ProductNotBiddable.into())
            }
            Availability::Open => {
                self.availability = Availability::Locked {
                    bid_id: bid_id.clone(),
                };
                Ok(())
            }
        }
    }

    /// Reopen the product if `bid_id` holds the lock. Returns whether anything
    /// changed; releasing an open product, or one held by a different bid, is a
    /// no-op so concurrent reject/expire paths can both call it.
    pub fn unlock(&mut self, bid_id: &BidId) -> bool {
        if self.locked_by() == Some(bid_id) {
            self.availability = Availability::Open;
            return true;
        }
        false
    }

    pub fn mark_sold(&mut self, bid_id: &BidId, price: Amount) -> Result<(), BidError> {
        match &self.availability {
            Availability::Locked { bid_id: holder } if holder == bid_id => {
                self.availability = Availability::Sold {
                    bid_id: bid_id.clone(),
                };
                self.final_price = Some(price);
                Ok(())
            }
            _ => Err(ConflictReason::ProductUnavailable.into()),
        }
    }

    pub fn publish(&mut self) -> Result<(), BidError> {
        match self.stage {
            ProductStage::Withdrawn => Err(ConflictReason::ProductNotBiddable.into()),
            _ => {
                self.stage = ProductStage::Published;
                Ok(())
            }
        }
    }

    /// Farmers cannot pull a listing out from under an active negotiation.
    pub fn withdraw(&mut self) -> Result<(), BidError> {
        match self.availability {
            Availability::Locked { .. } => Err(ConflictReason::ProductLocked.into()),
            Availability::Sold { .. } => Err(ConflictReason::ProductUnavailable.into()),
            Availability::Open => {
                self.stage = ProductStage::Withdrawn;
                Ok(())
            }
        }
    }
}

/// Draft of a new listing, finalised into a [`Product`] by the service.
#[derive(Debug, Default, Clone)]
pub struct ProductListing {
    name: Option<String>,
    quantity: Amount,
    expected_price: Option<Amount>,
    publish: bool,
    browsable: bool,
}

impl ProductListing {
    pub fn new() -> Self {
        Self {
            browsable: true,
            ..Self::default()
        }
    }
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }
    pub fn set_quantity(mut self, quantity: Amount) -> Self {
        self.quantity = quantity;
        self
    }
    pub fn set_expected_price(mut self, price: Amount) -> Self {
        self.expected_price = Some(price);
        self
    }
    pub fn published(mut self) -> Self {
        self.publish = true;
        self
    }
    pub fn set_browsable(mut self, browsable: bool) -> Self {
        self.browsable = browsable;
        self
    }

    pub fn validate_and_finalise(
        &self,
        id: ProductId,
        farmer_id: UserId,
        now: &TimeStamp<Utc>,
    ) -> Result<Product, ValidationError> {
        let name = match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => return Err(ValidationError::MissingName),
        };
        if !self.quantity.is_positive() {
            return Err(ValidationError::NonPositiveQuantity);
        }
        if self.expected_price.is_some_and(|price| !price.is_positive()) {
            return Err(ValidationError::NonPositivePrice);
        }

        Ok(Product {
            id,
            farmer_id,
            name,
            stage: if self.publish {
                ProductStage::Published
            } else {
                ProductStage::Draft
            },
            availability: Availability::Open,
            available_for_browse: self.browsable,
            available_quantity: self.quantity,
            expected_price: self.expected_price,
            final_price: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_product() -> Product {
        ProductListing::new()
            .set_name("Sharbati wheat")
            .set_quantity(Amount::from(50))
            .published()
            .validate_and_finalise(
                ProductId::generate().unwrap(),
                UserId::generate().unwrap(),
                &TimeStamp::new(),
            )
            .unwrap()
    }

    #[test]
    fn lock_then_unlock_restores_biddability() {
        let mut product = open_product();
        let bid = BidId::generate().unwrap();
        assert!(product.is_biddable());

        product.lock(&bid).unwrap();
        assert!(!product.is_biddable());
        assert_eq!(product.locked_by(), Some(&bid));

        assert!(product.unlock(&bid));
        assert!(product.is_biddable());
        // second release is a no-op
        assert!(!product.unlock(&bid));
    }

    #[test]
    fn second_lock_conflicts() {
        let mut product = open_product();
        product.lock(&BidId::generate().unwrap()).unwrap();

        let err = product.lock(&BidId::generate().unwrap()).unwrap_err();
        assert!(matches!(err, BidError::Conflict(ConflictReason::ProductLocked)));
    }

    #[test]
    fn foreign_unlock_leaves_lock_in_place() {
        let mut product = open_product();
        let holder = BidId::generate().unwrap();
        product.lock(&holder).unwrap();

        assert!(!product.unlock(&BidId::generate().unwrap()));
        assert_eq!(product.locked_by(), Some(&holder));
    }

    #[test]
    fn sold_requires_the_lock_holder() {
        let mut product = open_product();
        let holder = BidId::generate().unwrap();
        product.lock(&holder).unwrap();

        assert!(product
            .mark_sold(&BidId::generate().unwrap(), Amount::from(10))
            .is_err());
        product.mark_sold(&holder, Amount::from(10)).unwrap();
        assert!(!product.unlock(&holder));
        assert!(!product.is_biddable());
    }

    #[test]
    fn draft_and_hidden_products_are_not_biddable() {
        let mut product = open_product();
        product.stage = ProductStage::Draft;
        assert!(!product.is_biddable());

        product.stage = ProductStage::Published;
        product.available_for_browse = false;
        assert!(!product.is_biddable());
    }

    #[test]
    fn withdraw_refused_while_locked() {
        let mut product = open_product();
        product.lock(&BidId::generate().unwrap()).unwrap();
        assert!(product.withdraw().is_err());
    }

    #[test]
    fn listing_requires_name_and_quantity() {
        let now = TimeStamp::new();
        let missing_name = ProductListing::new().set_quantity(Amount::from(1));
        assert_eq!(
            missing_name.validate_and_finalise(
                ProductId::generate().unwrap(),
                UserId::generate().unwrap(),
                &now
            ),
            Err(ValidationError::MissingName)
        );

        let zero = ProductListing::new().set_name("Onion");
        assert_eq!(
            zero.validate_and_finalise(
                ProductId::generate().unwrap(),
                UserId::generate().unwrap(),
                &now
            ),
            Err(ValidationError::NonPositiveQuantity)
        );
    }
}
