//! Bid records and the inputs that create or revise them
use std::fmt;

use chrono::Utc;

use crate::error::ValidationError;
use crate::types::{Amount, BidId, ProductId, Role, TimeStamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum BidStatus {
    #[n(0)]
    Placed,
    #[n(1)]
    Countered,
    #[n(2)]
    Accepted,
    #[n(3)]
    Rejected,
    #[n(4)]
    Expired,
}

impl BidStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Expired)
    }
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Placed => "PLACED",
            Self::Countered => "COUNTERED",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        })
    }
}

/// One negotiation thread between a buyer and the farmer owning a product.
///
/// `price` and `quantity` always hold the terms currently on the table; the
/// per-round history lives in the bid's event chain.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Bid {
    #[n(0)]
    pub id: BidId,
    #[n(1)]
    pub product_id: ProductId,
    #[n(2)]
    pub buyer_id: UserId,
    #[n(3)]
    pub farmer_id: UserId, // product owner at placement time, immutable
    #[n(4)]
    pub price: Amount,
    #[n(5)]
    pub quantity: Amount,
    #[n(6)]
    pub status: BidStatus,
    #[n(7)]
    pub negotiation_round: u32,
    #[n(8)]
    pub last_offer_by: Role,
    #[n(9)]
    pub message: Option<String>,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub updated_at: TimeStamp<Utc>,
    #[n(12)]
    pub expires_at: TimeStamp<Utc>,
    #[n(13)]
    pub version: u64,
    #[n(14)]
    pub last_event_hash: Option<String>,
}

impl Bid {
    pub fn new_placed(
        id: BidId,
        terms: ValidBid,
        buyer_id: UserId,
        farmer_id: UserId,
        now: &TimeStamp<Utc>,
        ttl_secs: u64,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id,
            product_id: terms.product_id,
            buyer_id,
            farmer_id,
            price: terms.price,
            quantity: terms.quantity,
            status: BidStatus::Placed,
            negotiation_round: 1,
            last_offer_by: Role::Buyer,
            message: terms.message,
            created_at: now.clone(),
            updated_at: now.clone(),
            expires_at: now.plus_secs(ttl_secs)?,
            version: 1,
            last_event_hash: None,
        })
    }

    /// The party expected to respond next.
    pub fn awaiting(&self) -> Role {
        self.last_offer_by.other()
    }

    /// True once an active bid has outlived its window, whether or not the
    /// sweeper has flipped its stored status yet.
    pub fn is_expired_at(&self, now: &TimeStamp<Utc>) -> bool {
        self.status.is_active() && *now > self.expires_at
    }

    pub fn party(&self, user_id: &UserId) -> Option<Role> {
        if *user_id == self.buyer_id {
            Some(Role::Buyer)
        } else if *user_id == self.farmer_id {
            Some(Role::Farmer)
        } else {
            None
        }
    }

    pub fn line_total(&self) -> Option<Amount> {
        self.price.checked_mul(&self.quantity)
    }
}

pub(crate) fn check_message(message: Option<&str>, max: usize) -> Result<(), ValidationError> {
    match message {
        Some(text) if text.chars().count() > max => Err(ValidationError::MessageTooLong { max }),
        _ => Ok(()),
    }
}

/// Buyer's opening offer, validated before it reaches the state machine.
#[derive(Debug, Default, Clone)]
pub struct BidDraft {
    product_id: Option<ProductId>,
    price: Amount,
    quantity: Amount,
    message: Option<String>,
}

/// Terms of a [`BidDraft`] that passed field validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidBid {
    pub product_id: ProductId,
    pub price: Amount,
    pub quantity: Amount,
    pub message: Option<String>,
}

impl BidDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_product(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }
    pub fn set_price(mut self, price: Amount) -> Self {
        self.price = price;
        self
    }
    pub fn set_quantity(mut self, quantity: Amount) -> Self {
        self.quantity = quantity;
        self
    }
    pub fn set_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_owned());
        self
    }

    pub fn validate(&self, max_message_len: usize) -> Result<ValidBid, ValidationError> {
        let Some(product_id) = self.product_id.clone() else {
            return Err(ValidationError::MissingProduct);
        };
        if !self.price.is_positive() {
            return Err(ValidationError::NonPositivePrice);
        }
        if !self.quantity.is_positive() {
            return Err(ValidationError::NonPositiveQuantity);
        }
        check_message(self.message.as_deref(), max_message_len)?;

        Ok(ValidBid {
            product_id,
            price: self.price,
            quantity: self.quantity,
            message: self.message.clone(),
        })
    }
}

/// Revised terms proposed by whichever party is due to respond.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterOffer {
    pub price: Amount,
    pub quantity: Option<Amount>, // None keeps the current quantity
    pub message: Option<String>,
}

impl CounterOffer {
    pub fn new(price: Amount) -> Self {
        Self {
            price,
            quantity: None,
            message: None,
        }
    }
    pub fn with_quantity(mut self, quantity: Amount) -> Self {
        self.quantity = Some(quantity);
        self
    }
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_owned());
        self
    }

    pub fn validate(&self, max_message_len: usize) -> Result<(), ValidationError> {
        if !self.price.is_positive() {
            return Err(ValidationError::NonPositivePrice);
        }
        if self.quantity.is_some_and(|q| !q.is_positive()) {
            return Err(ValidationError::NonPositiveQuantity);
        }
        check_message(self.message.as_deref(), max_message_len)
    }
}
