//! The fee catalog: an explicit, immutable pricing object.
//!
//! Carried in [`crate::config::Config`] and passed into the calculator and
//! the dues engine, so per-college pricing is a parameter rather than a code
//! change.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{Currency, FeeCategory};

#[derive(Debug, Clone)]
pub struct FeeCatalog {
    currency: Currency,
    prices: Vec<(FeeCategory, Decimal)>,
}

impl FeeCatalog {
    pub fn new(currency: Currency, prices: Vec<(FeeCategory, Decimal)>) -> Self {
        Self { currency, prices }
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Catalog price for a category, `None` when the category is not priced.
    pub fn price(&self, category: FeeCategory) -> Option<Decimal> {
        self.prices
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, price)| *price)
    }

    /// All priced categories in catalog order.
    pub fn entries(&self) -> impl Iterator<Item = (FeeCategory, Decimal)> + '_ {
        self.prices.iter().copied()
    }
}

impl Default for FeeCatalog {
    fn default() -> Self {
        Self::new(
            Currency::Inr,
            vec![
                (FeeCategory::Tuition, dec!(50000)),
                (FeeCategory::Exam, dec!(2000)),
                (FeeCategory::Hostel, dec!(10000)),
            ],
        )
    }
}
