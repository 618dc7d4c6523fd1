//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use bid_negotiation::clock::ManualClock;
use bid_negotiation::config::NegotiationConfig;
use bid_negotiation::product::{Product, ProductListing};
use bid_negotiation::{Actor, Amount, BidDraft, BidService, TimeStamp, UserId};
use tempfile::{TempDir, tempdir};

pub const TTL_SECS: u64 = 7 * 24 * 60 * 60;

pub struct Market {
    pub service: Arc<BidService>,
    pub clock: Arc<ManualClock>,
    pub farmer: Actor,
    pub db: Arc<sled::Db>,
    _dir: TempDir, // dropped last, removes the db
}

pub fn market(name: &str) -> anyhow::Result<Market> {
    market_with(name, NegotiationConfig::default())
}

pub fn market_with(name: &str, rules: NegotiationConfig) -> anyhow::Result<Market> {
    // Sled uses file-based locking, so each test gets its own database
    // under a temp dir for simplified cleanup.
    let dir = tempdir()?;
    let db = Arc::new(sled::open(dir.path().join(name))?);
    db.clear()?;

    let clock = Arc::new(ManualClock::new(TimeStamp::new_with(2026, 5, 1, 9, 0, 0)));
    let service = BidService::new(db.clone())?
        .with_config(rules)?
        .with_clock(clock.clone());

    Ok(Market {
        service: Arc::new(service),
        clock,
        farmer: Actor::farmer(UserId::generate()?),
        db,
        _dir: dir,
    })
}

pub fn new_buyer() -> anyhow::Result<Actor> {
    Ok(Actor::buyer(UserId::generate()?))
}

impl Market {
    /// A published, browsable listing owned by the market's farmer.
    pub fn tomatoes(&self, quantity: u64) -> anyhow::Result<Product> {
        let listing = ProductListing::new()
            .set_name("Roma tomatoes")
            .set_quantity(Amount::from(quantity))
            .set_expected_price(Amount::from(2100))
            .published();
        Ok(self.service.list_product(&self.farmer, listing)?)
    }
}

pub fn bid_on(product: &Product, price: u64, quantity: u64) -> BidDraft {
    BidDraft::new()
        .set_product(product.id.clone())
        .set_price(Amount::from(price))
        .set_quantity(Amount::from(quantity))
}
