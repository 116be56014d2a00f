//! Installment and surcharge arithmetic.
//!
//! Pure functions over [`Decimal`]. The split rule: every slice except the
//! last gets `floor(total / n)`, the last slice absorbs the rounding
//! remainder, so the slices always sum back to the total exactly.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{FeeCatalog, FeeCategory, FeeLineItem};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeeError {
    #[error("fee type {0} is not priced in the catalog")]
    UnknownFeeType(FeeCategory),

    #[error("fee type {0} listed more than once")]
    DuplicateFeeType(FeeCategory),

    #[error("no fee types selected")]
    EmptyFeeSelection,

    #[error("installment count must be at least 1, got {0}")]
    InvalidInstallmentCount(u32),

    #[error("installment index {index} outside 1..={count}")]
    InvalidInstallmentIndex { index: u32, count: u32 },

    #[error("completed installment count {completed} outside 0..={count}")]
    InvalidCompletedCount { completed: u32, count: u32 },
}

/// Sum of catalog prices for the selected categories.
///
/// Duplicates are rejected: double-listing a category must not double-bill.
pub fn total_for_fee_types(
    catalog: &FeeCatalog,
    types: &[FeeCategory],
) -> Result<Decimal, FeeError> {
    if types.is_empty() {
        return Err(FeeError::EmptyFeeSelection);
    }

    let mut total = Decimal::ZERO;
    let mut seen: Vec<FeeCategory> = Vec::with_capacity(types.len());
    for &category in types {
        if seen.contains(&category) {
            return Err(FeeError::DuplicateFeeType(category));
        }
        seen.push(category);
        total += catalog
            .price(category)
            .ok_or(FeeError::UnknownFeeType(category))?;
    }
    Ok(total)
}

/// Amount and post-slice remainder for installment `index` of `count`.
///
/// The last slice is `total - base * (count - 1)` so the per-slice amounts
/// always sum to `total` exactly.
pub fn installment_amount(
    total: Decimal,
    count: u32,
    index: u32,
) -> Result<(Decimal, Decimal), FeeError> {
    if count < 1 {
        return Err(FeeError::InvalidInstallmentCount(count));
    }
    if index < 1 || index > count {
        return Err(FeeError::InvalidInstallmentIndex { index, count });
    }
    if count == 1 {
        return Ok((total, Decimal::ZERO));
    }

    let base = (total / Decimal::from(count)).floor();
    if index == count {
        Ok((total - base * Decimal::from(count - 1), Decimal::ZERO))
    } else {
        Ok((base, total - base * Decimal::from(index)))
    }
}

/// Amount still owed after `completed` of `count` installments have settled.
pub fn remaining_after(total: Decimal, count: u32, completed: u32) -> Result<Decimal, FeeError> {
    if count < 1 {
        return Err(FeeError::InvalidInstallmentCount(count));
    }
    if completed > count {
        return Err(FeeError::InvalidCompletedCount { completed, count });
    }
    if completed == count {
        return Ok(Decimal::ZERO);
    }

    let base = (total / Decimal::from(count)).floor();
    Ok(total - base * Decimal::from(completed))
}

/// Total actually charged when paying in `count` installments: the plain
/// total for a single payment, inflated by the surcharge percentage when
/// splitting.
pub fn surcharged_total(total: Decimal, count: u32, surcharge_pct: Decimal) -> Decimal {
    if count > 1 {
        total * (Decimal::ONE + surcharge_pct / Decimal::from(100u32))
    } else {
        total
    }
}

/// Pro-rata per-category breakdown of `amount_to_pay`.
///
/// Each line is `catalog_price * amount_to_pay / base_total` (the
/// *un-inflated* total), rounded to two decimal places; the last line is
/// adjusted so the breakdown sums to `amount_to_pay` exactly, mirroring the
/// last-slice rule above.
pub fn allocate_fee_details(
    catalog: &FeeCatalog,
    types: &[FeeCategory],
    amount_to_pay: Decimal,
    base_total: Decimal,
) -> Result<Vec<FeeLineItem>, FeeError> {
    if types.is_empty() {
        return Err(FeeError::EmptyFeeSelection);
    }

    let mut lines = Vec::with_capacity(types.len());
    let mut allocated = Decimal::ZERO;
    for (position, &category) in types.iter().enumerate() {
        let price = catalog
            .price(category)
            .ok_or(FeeError::UnknownFeeType(category))?;
        let amount = if position + 1 == types.len() {
            amount_to_pay - allocated
        } else if base_total.is_zero() {
            Decimal::ZERO
        } else {
            (price * amount_to_pay / base_total).round_dp(2)
        };
        allocated += amount;
        lines.push(FeeLineItem {
            fee_type: category,
            amount,
        });
    }
    Ok(lines)
}
