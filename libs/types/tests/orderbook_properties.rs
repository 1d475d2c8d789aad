//! Order Book Property Tests
//!
//! Level uniqueness and ordering hold after any batch of deltas, and the book
//! always agrees with a naive last-write-wins model.

use std::collections::BTreeMap;

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use types::{BookSnapshot, Level, OrderBook, Side};

fn delta() -> impl Strategy<Value = (u32, u32)> {
    // Price ticks 1..=40, amount 0 (removal) .. 5
    (1u32..=40, 0u32..=5)
}

proptest! {
    #[test]
    fn book_matches_last_write_wins_model(deltas in prop::collection::vec(delta(), 0..200)) {
        let mut book = OrderBook::new("BTC/USDT", None);
        let mut model: BTreeMap<Decimal, Decimal> = BTreeMap::new();

        for (tick, amount) in &deltas {
            let price = Decimal::from(*tick) / dec!(10);
            let amount = Decimal::from(*amount);
            book.store_delta(Side::Bid, price, amount).unwrap();
            if amount.is_zero() {
                model.remove(&price);
            } else {
                model.insert(price, amount);
            }
        }

        let expected: Vec<Level> = model
            .iter()
            .rev()
            .map(|(p, a)| Level::new(*p, *a))
            .collect();
        prop_assert_eq!(book.limit(None).bids, expected);
    }

    #[test]
    fn sides_sorted_and_unique(
        bids in prop::collection::vec(delta(), 0..100),
        asks in prop::collection::vec(delta(), 0..100),
        n in 0usize..50,
    ) {
        let to_levels = |raw: &[(u32, u32)]| -> Vec<Level> {
            raw.iter()
                .map(|(t, a)| Level::new(Decimal::from(*t), Decimal::from(*a)))
                .collect()
        };

        let mut book = OrderBook::new("ETH/USDT", None);
        book.reset(BookSnapshot::default()).unwrap();
        book.store_deltas(Side::Bid, to_levels(&bids)).unwrap();
        book.store_deltas(Side::Ask, to_levels(&asks)).unwrap();

        let view = book.limit(Some(n));
        prop_assert!(view.bids.len() <= n && view.asks.len() <= n);
        for pair in view.bids.windows(2) {
            prop_assert!(pair[0].price > pair[1].price);
        }
        for pair in view.asks.windows(2) {
            prop_assert!(pair[0].price < pair[1].price);
        }
        prop_assert!(view.bids.iter().chain(view.asks.iter()).all(|l| !l.amount.is_zero()));
    }
}

#[test]
fn test_scientific_and_plain_prices_share_a_level() {
    let mut book = OrderBook::new("BTC/USDT", None);
    book.store_deltas(
        Side::Ask,
        [
            Level::parse("0.00001", "3").unwrap(),
            Level::parse("1e-5", "7").unwrap(),
        ],
    )
    .unwrap();

    assert_eq!(book.asks().len(), 1);
    assert_eq!(book.best_ask(), Some(Level::new(dec!(0.00001), dec!(7))));
}
