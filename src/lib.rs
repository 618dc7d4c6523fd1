//! Bid and offer negotiation engine for a farm produce marketplace.
//!
//! Buyers place bids on published products, farmers and buyers trade counter
//! offers within a bounded number of rounds, and an accepted bid becomes an
//! order once payment is confirmed. State lives in sled; every transition is
//! one multi-tree transaction that also appends to the bid's hash-chained
//! history.

pub mod bid;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod listener;
pub mod negotiation;
pub mod order;
pub mod product;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod utils;
pub mod views;

pub use bid::{Bid, BidDraft, BidStatus, CounterOffer};
pub use error::{BidError, ConflictReason, ErrorKind, ValidationError};
pub use service::{BidService, Materialized};
pub use types::{Actor, Amount, BidId, OrderId, ProductId, Role, TimeStamp, UserId};
