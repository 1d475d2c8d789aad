//! Error types for order book reconstruction

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while applying snapshots or deltas to an order book
///
/// A failing batch is rejected as a whole: no level of it is applied.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BookError {
    /// Level amount below zero (zero is a removal, never an error)
    #[error("Negative amount {amount} at price {price}")]
    NegativeAmount {
        /// Price of the offending level
        price: Decimal,
        /// The negative amount received
        amount: Decimal,
    },

    /// Price that cannot rest in a book (zero or negative)
    #[error("Invalid price: {price}")]
    InvalidPrice {
        /// The rejected price
        price: Decimal,
    },

    /// Textual number that is not a decimal
    #[error("Invalid decimal string: '{input}'")]
    InvalidDecimal {
        /// The raw input as received on the wire
        input: String,
    },

    /// Delta entry without a price or amount
    #[error("Missing field in book level: {field}")]
    MissingField {
        /// Name of the missing field
        field: &'static str,
    },
}
