//! Read-side dues and arrears derivation.
//!
//! Works exclusively off `Completed` payment records. A category counts as
//! settled once a completed record covers it in full: a non-installment
//! payment, or the final slice of an installment plan.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::models::{FeeCatalog, FeeCategory, PaymentRecord};
use crate::services::orchestrator::PaymentError;
use crate::services::repository::PaymentStore;

/// A catalog entry the student still owes.
#[derive(Debug, Clone, PartialEq)]
pub struct DueEntry {
    pub fee_type: FeeCategory,
    pub amount: Decimal,
    pub due_date: DateTime<Utc>,
}

/// An installment plan with slices still outstanding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInstallments {
    pub fee_types: Vec<FeeCategory>,
    pub total_installments: u32,
    pub completed_installments: u32,
    pub next_installment: u32,
    pub remaining_amount: Decimal,
}

#[derive(Clone)]
pub struct DuesService {
    store: Arc<dyn PaymentStore>,
    catalog: FeeCatalog,
}

impl DuesService {
    pub fn new(store: Arc<dyn PaymentStore>, catalog: FeeCatalog) -> Self {
        Self { store, catalog }
    }

    /// Catalog categories not yet settled for the student, each with a
    /// rolling due date 30 days out from evaluation time.
    pub async fn outstanding_dues(
        &self,
        student_id: &str,
    ) -> Result<Vec<DueEntry>, PaymentError> {
        let completed = self
            .store
            .find_completed_by_student(student_id)
            .await
            .map_err(PaymentError::Storage)?;

        let mut settled: HashSet<FeeCategory> = HashSet::new();
        for record in &completed {
            if Self::settles_its_categories(record) {
                settled.extend(record.fee_details.iter().map(|line| line.fee_type));
            }
        }

        let due_date = Utc::now() + Duration::days(30);
        Ok(self
            .catalog
            .entries()
            .filter(|(category, _)| !settled.contains(category))
            .map(|(fee_type, amount)| DueEntry {
                fee_type,
                amount,
                due_date,
            })
            .collect())
    }

    /// Open installment plans, grouped by the category set they cover. A
    /// group with completed slices below its plan total reports the next
    /// slice number and the last known remaining amount.
    pub async fn pending_installments(
        &self,
        student_id: &str,
    ) -> Result<Vec<PendingInstallments>, PaymentError> {
        let completed = self
            .store
            .find_completed_by_student(student_id)
            .await
            .map_err(PaymentError::Storage)?;

        struct Group {
            fee_types: Vec<FeeCategory>,
            total: u32,
            max_number: u32,
            remaining: Decimal,
        }

        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        for record in &completed {
            let Some(plan) = &record.installment else {
                continue;
            };
            let mut categories = record.fee_types();
            categories.sort();
            categories.dedup();
            let key = categories
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join("+");

            let group = groups.entry(key).or_insert(Group {
                fee_types: categories,
                total: plan.total,
                max_number: 0,
                remaining: Decimal::ZERO,
            });
            if plan.number > group.max_number {
                group.max_number = plan.number;
                group.total = plan.total;
                group.remaining = plan.remaining_amount;
            }
        }

        Ok(groups
            .into_values()
            .filter(|group| group.max_number < group.total)
            .map(|group| PendingInstallments {
                fee_types: group.fee_types,
                total_installments: group.total,
                completed_installments: group.max_number,
                next_installment: group.max_number + 1,
                remaining_amount: group.remaining,
            })
            .collect())
    }

    fn settles_its_categories(record: &PaymentRecord) -> bool {
        match &record.installment {
            None => true,
            Some(plan) => plan.number == plan.total,
        }
    }
}
