use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BookError;

/// Which half of the book a level belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy interest, best = highest price
    Bid,
    /// Sell interest, best = lowest price
    Ask,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

/// One price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Level price, normalized
    pub price: Decimal,
    /// Resting amount at this price
    pub amount: Decimal,
}

impl Level {
    /// Build a level, normalizing both numbers
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self {
            price: price.normalize(),
            amount: amount.normalize(),
        }
    }

    /// Parse a level from the textual pair most feeds send
    pub fn parse(price: &str, amount: &str) -> Result<Self, BookError> {
        Ok(Self::new(parse_decimal(price)?, parse_decimal(amount)?))
    }
}

impl From<(Decimal, Decimal)> for Level {
    fn from((price, amount): (Decimal, Decimal)) -> Self {
        Self::new(price, amount)
    }
}

/// Parse a wire decimal, accepting plain and scientific notation
pub fn parse_decimal(input: &str) -> Result<Decimal, BookError> {
    let trimmed = input.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map(|d| d.normalize())
        .map_err(|_| BookError::InvalidDecimal {
            input: input.to_string(),
        })
}

/// One side of an order book: price → amount, unique per price
///
/// Stored ascending; bids are read back to front so the first level yielded is
/// always top of book. With a depth limit the worst levels past the limit are
/// discarded on every store.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSide {
    side: Side,
    levels: BTreeMap<Decimal, Decimal>,
    depth: Option<usize>,
}

impl BookSide {
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

    /// Configured depth limit
    pub fn limit_depth(&self) -> Option<usize> {
        self.depth
    }

    /// Upsert one level; amount 0 removes it (no-op if absent)
    pub fn store(&mut self, price: Decimal, amount: Decimal) -> Result<(), BookError> {
        let level = validate(price, amount)?;
        self.apply(level);
        self.trim();
        Ok(())
    }

    /// Apply a batch in received order, last write wins on duplicate prices
    ///
    /// The batch is validated up front; if any entry is invalid nothing is
    /// applied.
    pub fn store_all<I>(&mut self, deltas: I) -> Result<(), BookError>
    where
        I: IntoIterator<Item = Level>,
    {
        let validated = deltas
            .into_iter()
            .map(|level| validate(level.price, level.amount))
            .collect::<Result<Vec<_>, _>>()?;

        for level in validated {
            self.apply(level);
        }
        self.trim();
        Ok(())
    }

    /// Replace every level of this side
    pub fn replace<I>(&mut self, levels: I) -> Result<(), BookError>
    where
        I: IntoIterator<Item = Level>,
    {
        let validated = levels
            .into_iter()
            .map(|level| validate(level.price, level.amount))
            .collect::<Result<Vec<_>, _>>()?;

        self.levels.clear();
        for level in validated {
            self.apply(level);
        }
        self.trim();
        Ok(())
    }

    /// Top of book for this side
    pub fn best(&self) -> Option<Level> {
        self.iter().next()
    }

    /// Amount resting at `price`, if any
    pub fn amount_at(&self, price: Decimal) -> Option<Decimal> {
        self.levels.get(&price.normalize()).copied()
    }

    /// Levels from best to worst
    pub fn iter(&self) -> Levels<'_> {
        Levels {
            inner: self.levels.iter(),
            side: self.side,
        }
    }

    /// At most `n` levels from best to worst (bounded by the depth limit)
    pub fn limit(&self, n: Option<usize>) -> Vec<Level> {
        let cap = match (n, self.depth) {
            (Some(n), Some(depth)) => n.min(depth),
            (Some(n), None) => n,
            (None, Some(depth)) => depth,
            (None, None) => usize::MAX,
        };
        self.iter().take(cap).collect()
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

    fn apply(&mut self, level: Level) {
        if level.amount.is_zero() {
            self.levels.remove(&level.price);
        } else {
            self.levels.insert(level.price, level.amount);
        }
    }

    fn trim(&mut self) {
        let Some(depth) = self.depth else {
            return;
        };
        while self.levels.len() > depth {
            match self.side {
                Side::Bid => self.levels.pop_first(),
                Side::Ask => self.levels.pop_last(),
            };
        }
    }
}

pub(crate) fn validate_levels(levels: &[Level]) -> Result<(), BookError> {
    levels
        .iter()
        .try_for_each(|level| validate(level.price, level.amount).map(drop))
}

pub(crate) fn validate(price: Decimal, amount: Decimal) -> Result<Level, BookError> {
    if price <= Decimal::ZERO {
        return Err(BookError::InvalidPrice { price });
    }
    if amount < Decimal::ZERO {
        return Err(BookError::NegativeAmount { price, amount });
    }
    Ok(Level::new(price, amount))
}

/// Best-first iterator over a [`BookSide`]
pub struct Levels<'a> {
    inner: std::collections::btree_map::Iter<'a, Decimal, Decimal>,
    side: Side,
}

impl Iterator for Levels<'_> {
    type Item = Level;

    fn next(&mut self) -> Option<Level> {
        let (price, amount) = match self.side {
            Side::Bid => self.inner.next_back()?,
            Side::Ask => self.inner.next()?,
        };
        Some(Level {
            price: *price,
            amount: *amount,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
