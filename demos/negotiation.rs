//! Walks one negotiation end to end against a throwaway sled database.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example negotiation
//! ```
use std::sync::Arc;

use bid_negotiation::clock::ManualClock;
use bid_negotiation::config::Config;
use bid_negotiation::order::PaymentConfirmation;
use bid_negotiation::product::ProductListing;
use bid_negotiation::sweeper::ExpirySweeper;
use bid_negotiation::{Actor, Amount, BidDraft, BidService, CounterOffer, TimeStamp, UserId};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
[negotiation]
max_negotiation_rounds = 3
bid_ttl_secs = 86400

[sweeper]
interval_secs = 60
"#;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_toml(CONFIG)?;
    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join(&config.storage.path))?);

    let clock = Arc::new(ManualClock::new(TimeStamp::new()));
    let service = BidService::new(db)?
        .with_config(config.negotiation.clone())?
        .with_clock(clock.clone());

    let farmer = Actor::farmer(UserId::generate()?);
    let buyer = Actor::buyer(UserId::generate()?);

    let wheat = service.list_product(
        &farmer,
        ProductListing::new()
            .set_name("Durum wheat (quintal)")
            .set_quantity(Amount::from(40))
            .set_expected_price(Amount::from(2400))
            .published(),
    )?;

    // three rounds: placement, farmer counter, buyer counter
    let bid = service.place_bid(
        &buyer,
        BidDraft::new()
            .set_product(wheat.id.clone())
            .set_price(Amount::from(2150))
            .set_quantity(Amount::from(25))
            .set_message("pickup from the mandi on Monday"),
    )?;
    let bid = service.counter_bid(&bid.id, &farmer, CounterOffer::new(Amount::from(2350)))?;
    let bid = service.counter_bid(
        &bid.id,
        &buyer,
        CounterOffer::new(Amount::from(2300)).with_quantity(Amount::from(30)),
    )?;

    // a fourth round is over the limit
    if let Err(err) = service.counter_bid(&bid.id, &farmer, CounterOffer::new(Amount::from(2320))) {
        println!("farmer counter refused: {err}");
    }

    let bid = service.accept_bid(&bid.id, &farmer)?;
    let total = bid.line_total().unwrap_or_default();
    let paid =
        service.confirm_payment(PaymentConfirmation::new(bid.id.clone(), total, "neft-0042"))?;
    println!(
        "order {} for {} x {} = {}",
        paid.order.order_number, paid.order.item.quantity, paid.order.item.unit_price, total
    );

    for event in service.bid_history(&bid.id, &buyer)? {
        println!(
            "  #{} {:?} at {} ({} x {})",
            event.seq, event.kind, event.at, event.quantity, event.price
        );
    }

    // a second listing whose bid is left to lapse
    let rice = service.list_product(
        &farmer,
        ProductListing::new()
            .set_name("Sona masoori rice (quintal)")
            .set_quantity(Amount::from(10))
            .published(),
    )?;
    service.place_bid(
        &buyer,
        BidDraft::new()
            .set_product(rice.id.clone())
            .set_price(Amount::from(4100))
            .set_quantity(Amount::from(10)),
    )?;

    clock.advance_secs(config.negotiation.bid_ttl_secs as i64 + 1);
    let service = Arc::new(service);
    let sweeper = ExpirySweeper::new(
        service.clone(),
        std::time::Duration::from_secs(config.sweeper.interval_secs),
    );
    let report = sweeper.sweep_once()?;
    println!(
        "sweep: {} scanned, {} expired; rice biddable again: {}",
        report.scanned,
        report.expired,
        service.is_biddable(&rice.id)?
    );

    Ok(())
}
