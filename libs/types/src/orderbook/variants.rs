//! Book sides that carry more than an amount per level
//!
//! [`CountedBookSide`] keeps the number of resting orders at each price (feeds
//! that publish `[price, size, count]`). [`IndexedBookSide`] is an L3 side
//! keyed by order id, where several orders may rest at one price.
//!
//! Both store entries under a sort key that is the price for asks and the
//! negated price for bids, so ascending iteration is always best first.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::side::{validate, Side};
use crate::error::BookError;

fn sort_key(side: Side, price: Decimal) -> Decimal {
    match side {
        Side::Bid => -price,
        Side::Ask => price,
    }
}

/// Price level with its resting order count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedLevel {
    /// Level price, normalized
    pub price: Decimal,
    /// Resting amount at this price
    pub amount: Decimal,
    /// Number of orders making up the amount
    pub count: u32,
}

impl CountedLevel {
    /// Build a level, normalizing both numbers
    pub fn new(price: Decimal, amount: Decimal, count: u32) -> Self {
        Self {
            price: price.normalize(),
            amount: amount.normalize(),
            count,
        }
    }
}

/// One side of an order-count book
///
/// A zero amount or a zero count removes the level.
#[derive(Debug, Clone, PartialEq)]
pub struct CountedBookSide {
    side: Side,
    levels: BTreeMap<Decimal, CountedLevel>,
    depth: Option<usize>,
}

impl CountedBookSide {
    /// Create an empty side with an optional depth limit
    pub fn new(side: Side, depth: Option<usize>) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            depth,
        }
    }

    /// Which side this is
    pub fn side(&self) -> Side {
        self.side
    }

    /// Upsert one level
    pub fn store(&mut self, price: Decimal, amount: Decimal, count: u32) -> Result<(), BookError> {
        self.store_all([CountedLevel::new(price, amount, count)])
    }

    /// Apply a batch in received order; nothing is applied if any entry is invalid
    pub fn store_all<I>(&mut self, deltas: I) -> Result<(), BookError>
    where
        I: IntoIterator<Item = CountedLevel>,
    {
        let validated = validate_counted(deltas)?;
        for level in validated {
            self.apply(level);
        }
        self.trim();
        Ok(())
    }

    /// Replace every level of this side
    pub fn replace<I>(&mut self, levels: I) -> Result<(), BookError>
    where
        I: IntoIterator<Item = CountedLevel>,
    {
        let validated = validate_counted(levels)?;
        self.levels.clear();
        for level in validated {
            self.apply(level);
        }
        self.trim();
        Ok(())
    }

    /// Top of book for this side
    pub fn best(&self) -> Option<CountedLevel> {
        self.levels.values().next().copied()
    }

    /// At most `n` levels from best to worst
    pub fn limit(&self, n: Option<usize>) -> Vec<CountedLevel> {
        self.levels
            .values()
            .take(n.unwrap_or(usize::MAX))
            .copied()
            .collect()
    }

    /// Number of stored levels
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// True when the side holds no levels
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Remove every level
    pub fn clear(&mut self) {
        self.levels.clear();
    }

    fn apply(&mut self, level: CountedLevel) {
        let key = sort_key(self.side, level.price);
        if level.amount.is_zero() || level.count == 0 {
            self.levels.remove(&key);
        } else {
            self.levels.insert(key, level);
        }
    }

    fn trim(&mut self) {
        if let Some(depth) = self.depth {
            while self.levels.len() > depth {
                self.levels.pop_last();
            }
        }
    }
}

fn validate_counted<I>(levels: I) -> Result<Vec<CountedLevel>, BookError>
where
    I: IntoIterator<Item = CountedLevel>,
{
    levels
        .into_iter()
        .map(|level| {
            validate(level.price, level.amount)
                .map(|checked| CountedLevel::new(checked.price, checked.amount, level.count))
        })
        .collect()
}

/// One resting order of an L3 book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedLevel {
    /// Order price, normalized
    pub price: Decimal,
    /// Remaining order size
    pub amount: Decimal,
    /// Exchange order id
    pub id: String,
}

/// One side of an L3 book keyed by order id
///
/// Orders at the same price keep arrival order. A store without a price
/// resizes the order at its current price; a zero amount removes the order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedBookSide {
    side: Side,
    /// (sort key, arrival) → order id
    ordered: BTreeMap<(Decimal, u64), String>,
    /// order id → ((sort key, arrival), order)
    orders: HashMap<String, ((Decimal, u64), IndexedLevel)>,
    depth: Option<usize>,
    arrivals: u64,
}

impl IndexedBookSide {
    /// Create an empty side with an optional depth limit (counted in orders)
    pub fn new(side: Side, depth: Option<usize>) -> Self {
        Self {
            side,
            ordered: BTreeMap::new(),
            orders: HashMap::new(),
            depth,
            arrivals: 0,
        }
    }

    /// Which side this is
    pub fn side(&self) -> Side {
        self.side
    }

    /// Insert, move, resize or remove order `id`
    ///
    /// A zero amount removes the order (no-op if absent) and needs no price.
    pub fn store(
        &mut self,
        price: Option<Decimal>,
        amount: Decimal,
        id: &str,
    ) -> Result<(), BookError> {
        if amount.is_zero() && price.is_none() {
            self.remove(id);
            return Ok(());
        }
        let level = self.resolve(price, amount, id)?;
        self.apply(level);
        self.trim();
        Ok(())
    }

    /// Remove order `id`; true if it was resting
    pub fn remove(&mut self, id: &str) -> bool {
        match self.orders.remove(id) {
            Some((key, _)) => {
                self.ordered.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Apply a batch in received order; nothing is applied if any entry is invalid
    pub fn store_all<I>(&mut self, deltas: I) -> Result<(), BookError>
    where
        I: IntoIterator<Item = (Option<Decimal>, Decimal, String)>,
    {
        let deltas: Vec<_> = deltas.into_iter().collect();
        // Prices as the batch leaves them; None marks an order removed by it.
        let mut known: HashMap<&str, Option<Decimal>> = HashMap::new();
        for (price, amount, id) in &deltas {
            match price {
                Some(price) => {
                    validate(*price, *amount)?;
                    known.insert(id.as_str(), (!amount.is_zero()).then_some(*price));
                }
                None if amount.is_zero() => {
                    known.insert(id.as_str(), None);
                }
                None => {
                    let current = match known.get(id.as_str()) {
                        Some(price) => *price,
                        None => self.price_of(id),
                    }
                    .ok_or(BookError::MissingField { field: "price" })?;
                    validate(current, *amount)?;
                }
            }
        }

        for (price, amount, id) in deltas {
            if amount.is_zero() && price.is_none() {
                self.remove(&id);
                continue;
            }
            let level = self.resolve(price, amount, &id)?;
            self.apply(level);
        }
        self.trim();
        Ok(())
    }

    /// Replace every order of this side
    pub fn replace<I>(&mut self, orders: I) -> Result<(), BookError>
    where
        I: IntoIterator<Item = IndexedLevel>,
    {
        let orders = orders
            .into_iter()
            .map(|order| {
                validate(order.price, order.amount).map(|checked| IndexedLevel {
                    price: checked.price,
                    amount: checked.amount,
                    id: order.id,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.clear();
        for order in orders {
            self.apply(order);
        }
        self.trim();
        Ok(())
    }

    /// Current price of order `id`
    pub fn price_of(&self, id: &str) -> Option<Decimal> {
        self.orders.get(id).map(|(_, order)| order.price)
    }

    /// Best resting order
    pub fn best(&self) -> Option<&IndexedLevel> {
        self.iter().next()
    }

    /// Orders from best to worst price, arrival order within a price
    pub fn iter(&self) -> impl Iterator<Item = &IndexedLevel> + '_ {
        self.ordered
            .values()
            .filter_map(|id| self.orders.get(id).map(|(_, order)| order))
    }

    /// At most `n` orders from best to worst
    pub fn limit(&self, n: Option<usize>) -> Vec<IndexedLevel> {
        self.iter().take(n.unwrap_or(usize::MAX)).cloned().collect()
    }

    /// Number of resting orders
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// True when the side holds no orders
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Remove every order
    pub fn clear(&mut self) {
        self.ordered.clear();
        self.orders.clear();
    }

    fn resolve(
        &self,
        price: Option<Decimal>,
        amount: Decimal,
        id: &str,
    ) -> Result<IndexedLevel, BookError> {
        let price = price
            .or_else(|| self.price_of(id))
            .ok_or(BookError::MissingField { field: "price" })?;
        let checked = validate(price, amount)?;
        Ok(IndexedLevel {
            price: checked.price,
            amount: checked.amount,
            id: id.to_string(),
        })
    }

    fn apply(&mut self, order: IndexedLevel) {
        let previous = self.orders.remove(&order.id).map(|(key, _)| key);
        if let Some(key) = previous {
            self.ordered.remove(&key);
        }
        if order.amount.is_zero() {
            return;
        }

        let sort = sort_key(self.side, order.price);
        let key = match previous {
            // A resize keeps its place in the queue.
            Some(key) if key.0 == sort => key,
            _ => {
                self.arrivals += 1;
                (sort, self.arrivals)
            }
        };
        self.ordered.insert(key, order.id.clone());
        self.orders.insert(order.id.clone(), (key, order));
    }

    fn trim(&mut self) {
        let Some(depth) = self.depth else {
            return;
        };
        while self.orders.len() > depth {
            match self.ordered.pop_last() {
                Some((_, id)) => {
                    self.orders.remove(&id);
                }
                None => break,
            }
        }
    }
}
