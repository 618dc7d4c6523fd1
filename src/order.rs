//! Orders materialised from accepted, paid bids
use chrono::Utc;

use crate::bid::{Bid, BidStatus};
use crate::error::{BidError, ConflictReason, ValidationError};
use crate::types::{Amount, BidId, OrderId, ProductId, TimeStamp, UserId};
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum OrderStatus {
    #[n(0)]
    Confirmed,
    #[n(1)]
    Fulfilled,
    #[n(2)]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum PaymentStatus {
    #[n(0)]
    Paid,
    #[n(1)]
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct OrderItem {
    #[n(0)]
    pub product_id: ProductId,
    #[n(1)]
    pub quantity: Amount,
    #[n(2)]
    pub unit_price: Amount,
    #[n(3)]
    pub line_total: Amount, // fixed at creation
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Order {
    #[n(0)]
    pub id: OrderId,
    #[n(1)]
    pub order_number: String,
    #[n(2)]
    pub bid_id: BidId,
    #[n(3)]
    pub buyer_id: UserId,
    #[n(4)]
    pub farmer_id: UserId,
    #[n(5)]
    pub status: OrderStatus,
    #[n(6)]
    pub payment_status: PaymentStatus,
    #[n(7)]
    pub payment_reference: String,
    #[n(8)]
    pub paid_amount: Amount,
    #[n(9)]
    pub item: OrderItem,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
}

/// "Payment confirmed" event handed in by the payment collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub bid_id: BidId,
    pub amount: Amount,
    pub reference: String,
}

impl PaymentConfirmation {
    pub fn new(bid_id: BidId, amount: Amount, reference: &str) -> Self {
        Self {
            bid_id,
            amount,
            reference: reference.trim().to_owned(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.reference.is_empty() {
            return Err(ValidationError::MissingPaymentReference);
        }
        if !self.amount.is_positive() {
            return Err(ValidationError::NonPositivePrice);
        }
        Ok(())
    }
}

impl Order {
    /// Build the single order for an accepted bid. Quantity and unit price are
    /// the bid's final agreed terms; the paid amount must match their product.
    pub fn from_accepted_bid(
        id: OrderId,
        bid: &Bid,
        payment: &PaymentConfirmation,
        number_prefix: &str,
        now: &TimeStamp<Utc>,
    ) -> Result<Self, BidError> {
        if bid.status != BidStatus::Accepted {
            return Err(ConflictReason::NotAccepted(bid.status).into());
        }
        let line_total = bid.line_total().ok_or(ValidationError::Overflow)?;
        if payment.amount != line_total {
            return Err(ValidationError::PaymentMismatch {
                paid: payment.amount.to_string(),
                expected: line_total.to_string(),
            }
            .into());
        }

        Ok(Self {
            id,
            order_number: utils::order_number(number_prefix, now, &bid.id),
            bid_id: bid.id.clone(),
            buyer_id: bid.buyer_id.clone(),
            farmer_id: bid.farmer_id.clone(),
            status: OrderStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            payment_reference: payment.reference.clone(),
            paid_amount: payment.amount,
            item: OrderItem {
                product_id: bid.product_id.clone(),
                quantity: bid.quantity,
                unit_price: bid.price,
                line_total,
            },
            created_at: now.clone(),
        })
    }
}
