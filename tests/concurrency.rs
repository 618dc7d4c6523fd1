//! Racing callers against one sled database. Every transition runs in one
//! serializable transaction, so racers either win outright or observe the
//! winner's committed state and are refused.
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use bid_negotiation::config::NegotiationConfig;
use bid_negotiation::sweeper::ExpirySweeper;
use bid_negotiation::{Amount, BidError, BidStatus, ConflictReason, CounterOffer, Role};

mod common;
use common::{TTL_SECS, bid_on, market, market_with, new_buyer};

#[test]
fn racing_accepts_yield_exactly_one_success() -> anyhow::Result<()> {
    let market = market("test_race_accept.db")?;
    let product = market.tomatoes(50)?;
    let buyer = new_buyer()?;
    let bid = market.service.place_bid(&buyer, bid_on(&product, 2000, 10))?;

    let racers = 4;
    let barrier = Barrier::new(racers);
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..racers)
            .map(|_| {
                let barrier = &barrier;
                let market = &market;
                let bid_id = &bid.id;
                s.spawn(move || {
                    barrier.wait();
                    market.service.accept_bid(bid_id, &market.farmer)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(BidError::Conflict(ConflictReason::AlreadyClosed(BidStatus::Accepted)))
        ));
    }

    let stored = market.service.get_bid(&bid.id, &buyer)?.bid;
    assert_eq!(stored.version, bid.version + 1);
    assert_eq!(market.service.bid_history(&bid.id, &buyer)?.len(), 2);

    Ok(())
}

#[test]
fn racing_placements_lock_the_product_once() -> anyhow::Result<()> {
    let market = market("test_race_place.db")?;
    let product = market.tomatoes(50)?;

    let racers = 6;
    let buyers = (0..racers).map(|_| new_buyer()).collect::<anyhow::Result<Vec<_>>>()?;
    let barrier = Barrier::new(racers);
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = buyers
            .iter()
            .map(|buyer| {
                let draft = bid_on(&product, 2000, 10);
                let barrier = &barrier;
                let service = &market.service;
                s.spawn(move || {
                    barrier.wait();
                    service.place_bid(buyer, draft)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let placed: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(placed.len(), 1);
    assert_eq!(
        market.service.get_product(&product.id)?.locked_by(),
        Some(&placed[0].id)
    );
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(BidError::Conflict(ConflictReason::ProductNotBiddable))
        ));
    }

    Ok(())
}

#[test]
fn racing_counters_on_a_placed_bid_advance_one_round() -> anyhow::Result<()> {
    let rules = NegotiationConfig {
        max_negotiation_rounds: 5,
        ..NegotiationConfig::default()
    };
    let market = market_with("test_race_counter.db", rules)?;
    let product = market.tomatoes(50)?;
    let buyer = new_buyer()?;
    let bid = market.service.place_bid(&buyer, bid_on(&product, 2000, 10))?;

    let barrier = Barrier::new(2);
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = [2100u64, 2200]
            .into_iter()
            .map(|price| {
                let barrier = &barrier;
                let market = &market;
                let bid_id = &bid.id;
                s.spawn(move || {
                    barrier.wait();
                    market.service.counter_bid(
                        bid_id,
                        &market.farmer,
                        CounterOffer::new(Amount::from(price)),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // the loser finds the turn has passed to the buyer
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let stored = market.service.get_bid(&bid.id, &buyer)?.bid;
    assert_eq!(stored.negotiation_round, 2);
    assert_eq!(stored.version, 2);

    Ok(())
}

#[test]
fn racing_counters_on_a_countered_bid_advance_one_round() -> anyhow::Result<()> {
    let rules = NegotiationConfig {
        max_negotiation_rounds: 4,
        ..NegotiationConfig::default()
    };
    let market = market_with("test_race_countered.db", rules)?;
    let product = market.tomatoes(50)?;
    let buyer = new_buyer()?;
    let bid = market.service.place_bid(&buyer, bid_on(&product, 2000, 10))?;
    let bid = market
        .service
        .counter_bid(&bid.id, &market.farmer, CounterOffer::new(Amount::from(2400)))?;
    assert_eq!(bid.status, BidStatus::Countered);
    assert_eq!(bid.negotiation_round, 2);

    let racers = 3;
    let barrier = Barrier::new(racers);
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..racers as u64)
            .map(|i| {
                let barrier = &barrier;
                let service = &market.service;
                let buyer = &buyer;
                let bid_id = &bid.id;
                s.spawn(move || {
                    barrier.wait();
                    service.counter_bid(bid_id, buyer, CounterOffer::new(Amount::from(2200 + i)))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(BidError::Conflict(ConflictReason::NotYourTurn {
                awaiting: Role::Farmer,
                ..
            }))
        ));
    }

    let stored = market.service.get_bid(&bid.id, &buyer)?.bid;
    assert_eq!(stored.negotiation_round, 3);
    assert_eq!(stored.version, bid.version + 1);
    assert_eq!(stored.price, winners[0].price);
    assert_eq!(market.service.bid_history(&bid.id, &buyer)?.len(), 3);

    Ok(())
}

#[test]
fn background_sweeper_reopens_lapsed_products() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let market = market("test_sweeper.db")?;
    let product = market.tomatoes(50)?;
    let buyer = new_buyer()?;
    let bid = market.service.place_bid(&buyer, bid_on(&product, 2000, 10))?;

    let sweeper = ExpirySweeper::new(market.service.clone(), Duration::from_millis(10));
    assert_eq!(sweeper.sweep_once()?.expired, 0);
    let handle = sweeper.spawn()?;

    market.clock.advance_secs(TTL_SECS as i64 + 1);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !market.service.is_biddable(&product.id)? {
        assert!(Instant::now() < deadline, "sweeper never expired the bid");
        thread::sleep(Duration::from_millis(10));
    }
    handle.shutdown();

    assert_eq!(
        market.service.get_bid(&bid.id, &buyer)?.bid.status,
        BidStatus::Expired
    );

    Ok(())
}
