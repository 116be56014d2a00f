//! Payment record persistence.
//!
//! Every state transition goes through [`PaymentStore::apply_if_status`]: an
//! atomic conditional update guarded by the expected current status. A failed
//! precondition returns `None` and the caller decides what that means; the
//! store never fixes up state on its own.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, DateTime, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{FailureReason, PaymentMethod, PaymentRecord, PaymentStatus};

/// One guarded mutation. Only the populated fields change; everything else
/// on the record is left untouched.
#[derive(Debug, Default, Clone)]
pub struct RecordPatch {
    pub status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub transaction_id: Option<String>,
    pub increment_attempts: bool,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, record: PaymentRecord) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<PaymentRecord>>;

    /// All records for a student, newest first.
    async fn find_by_student(&self, student_id: &str) -> Result<Vec<PaymentRecord>>;

    /// Completed records only; the read side of the dues engine.
    async fn find_completed_by_student(&self, student_id: &str) -> Result<Vec<PaymentRecord>>;

    /// Applies `patch` iff the record's current status is `expected`.
    /// Returns the updated record, or `None` when the precondition no longer
    /// holds (or the record does not exist).
    async fn apply_if_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        patch: RecordPatch,
    ) -> Result<Option<PaymentRecord>>;

    /// Best-effort receipt bookkeeping, the one write allowed on a terminal
    /// record.
    async fn set_receipt(
        &self,
        id: Uuid,
        receipt_path: Option<String>,
        receipt_sent: bool,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct MongoPaymentRepository {
    payments: Collection<PaymentRecord>,
}

impl MongoPaymentRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            payments: db.collection("payments"),
        }
    }

    /// Index setup: the transaction-id uniqueness invariant lives here, plus
    /// the student-scoped query paths.
    pub async fn init_indexes(&self) -> Result<()> {
        let transaction_idx = IndexModel::builder()
            .keys(doc! { "transaction_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("unique_transaction_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        let student_status_idx = IndexModel::builder()
            .keys(doc! { "student_id": 1, "payment_status": 1 })
            .options(
                IndexOptions::builder()
                    .name("student_status_idx".to_string())
                    .build(),
            )
            .build();

        let student_created_idx = IndexModel::builder()
            .keys(doc! { "student_id": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("student_created_idx".to_string())
                    .build(),
            )
            .build();

        self.payments
            .create_indexes(
                [transaction_idx, student_status_idx, student_created_idx],
                None,
            )
            .await?;

        tracing::info!("payment collection indexes initialized");
        Ok(())
    }

    fn patch_update(patch: &RecordPatch) -> Result<Document> {
        let mut set = doc! { "updated_at": DateTime::now() };
        if let Some(status) = patch.status {
            set.insert("payment_status", to_bson(&status)?);
        }
        if let Some(method) = patch.payment_method {
            set.insert("payment_method", to_bson(&method)?);
        }
        if let Some(ref reference) = patch.gateway_reference {
            set.insert("gateway_reference", reference.clone());
        }
        if let Some(reason) = patch.failure_reason {
            set.insert("failure_reason", to_bson(&reason)?);
        }
        if let Some(ref transaction_id) = patch.transaction_id {
            set.insert("transaction_id", transaction_id.clone());
        }

        let mut update = doc! { "$set": set };
        if patch.increment_attempts {
            update.insert("$inc", doc! { "payment_attempts": 1 });
        }
        Ok(update)
    }
}

#[async_trait]
impl PaymentStore for MongoPaymentRepository {
    async fn insert(&self, record: PaymentRecord) -> Result<()> {
        self.payments.insert_one(record, None).await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<PaymentRecord>> {
        let record = self
            .payments
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(record)
    }

    async fn find_by_student(&self, student_id: &str) -> Result<Vec<PaymentRecord>> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let cursor = self
            .payments
            .find(doc! { "student_id": student_id }, Some(options))
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_completed_by_student(&self, student_id: &str) -> Result<Vec<PaymentRecord>> {
        let filter = doc! {
            "student_id": student_id,
            "payment_status": to_bson(&PaymentStatus::Completed)?,
        };
        let cursor = self.payments.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn apply_if_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        patch: RecordPatch,
    ) -> Result<Option<PaymentRecord>> {
        let filter = doc! {
            "_id": id.to_string(),
            "payment_status": to_bson(&expected)?,
        };
        let update = Self::patch_update(&patch)?;
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .payments
            .find_one_and_update(filter, update, Some(options))
            .await?;
        Ok(updated)
    }

    async fn set_receipt(
        &self,
        id: Uuid,
        receipt_path: Option<String>,
        receipt_sent: bool,
    ) -> Result<()> {
        let mut set = doc! {
            "receipt_sent": receipt_sent,
            "updated_at": DateTime::now(),
        };
        if let Some(path) = receipt_path {
            set.insert("receipt_path", path);
        }
        self.payments
            .update_one(doc! { "_id": id.to_string() }, doc! { "$set": set }, None)
            .await?;
        Ok(())
    }
}

/// RwLock-map store with the same guarded-apply semantics as the Mongo
/// repository. Backs tests and database-less dev environments.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    records: Arc<RwLock<HashMap<Uuid, PaymentRecord>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(record: &mut PaymentRecord, patch: RecordPatch) {
        if let Some(status) = patch.status {
            record.payment_status = status;
        }
        if let Some(method) = patch.payment_method {
            record.payment_method = Some(method);
        }
        if let Some(reference) = patch.gateway_reference {
            record.gateway_reference = Some(reference);
        }
        if let Some(reason) = patch.failure_reason {
            record.failure_reason = Some(reason);
        }
        if let Some(transaction_id) = patch.transaction_id {
            record.transaction_id = transaction_id;
        }
        if patch.increment_attempts {
            record.payment_attempts += 1;
        }
        record.updated_at = DateTime::now();
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, record: PaymentRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            bail!("duplicate payment id {}", record.id);
        }
        if records
            .values()
            .any(|existing| existing.transaction_id == record.transaction_id)
        {
            bail!("duplicate transaction id {}", record.transaction_id);
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<PaymentRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn find_by_student(&self, student_id: &str) -> Result<Vec<PaymentRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<PaymentRecord> = records
            .values()
            .filter(|record| record.student_id == student_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn find_completed_by_student(&self, student_id: &str) -> Result<Vec<PaymentRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|record| {
                record.student_id == student_id
                    && record.payment_status == PaymentStatus::Completed
            })
            .cloned()
            .collect())
    }

    async fn apply_if_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        patch: RecordPatch,
    ) -> Result<Option<PaymentRecord>> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(record) if record.payment_status == expected => {
                Self::apply(record, patch);
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_receipt(
        &self,
        id: Uuid,
        receipt_path: Option<String>,
        receipt_sent: bool,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&id) {
            if receipt_path.is_some() {
                record.receipt_path = receipt_path;
            }
            record.receipt_sent = receipt_sent;
            record.updated_at = DateTime::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Currency, FeeCategory, FeeLineItem};
    use rust_decimal_macros::dec;

    fn record(student_id: &str, status: PaymentStatus) -> PaymentRecord {
        let now = DateTime::now();
        PaymentRecord {
            id: Uuid::new_v4(),
            student_id: student_id.to_string(),
            college_id: "clg-1".to_string(),
            department_id: "dep-1".to_string(),
            student_name: None,
            student_email: None,
            fee_details: vec![FeeLineItem {
                fee_type: FeeCategory::Exam,
                amount: dec!(2000),
            }],
            amount_paid: dec!(2000),
            currency: Currency::Inr,
            transaction_id: format!("TXN-{}", Uuid::new_v4().simple()),
            payment_status: status,
            installment: None,
            payment_method: None,
            gateway_reference: None,
            payment_attempts: 0,
            failure_reason: None,
            receipt_path: None,
            receipt_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn guarded_apply_rejects_a_stale_expectation() {
        let store = InMemoryPaymentStore::new();
        let rec = record("stu-1", PaymentStatus::Processing);
        let id = rec.id;
        store.insert(rec).await.unwrap();

        let refused = store
            .apply_if_status(
                id,
                PaymentStatus::Pending,
                RecordPatch {
                    status: Some(PaymentStatus::Failed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(refused.is_none());

        let untouched = store.find(id).await.unwrap().unwrap();
        assert_eq!(untouched.payment_status, PaymentStatus::Processing);
    }

    #[tokio::test]
    async fn guarded_apply_mutates_and_returns_the_updated_record() {
        let store = InMemoryPaymentStore::new();
        let rec = record("stu-1", PaymentStatus::Pending);
        let id = rec.id;
        store.insert(rec).await.unwrap();

        let updated = store
            .apply_if_status(
                id,
                PaymentStatus::Pending,
                RecordPatch {
                    payment_method: Some(PaymentMethod::Card),
                    increment_attempts: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.payment_attempts, 1);
        assert_eq!(updated.payment_method, Some(PaymentMethod::Card));
        assert_eq!(updated.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn transaction_ids_must_be_unique() {
        let store = InMemoryPaymentStore::new();
        let first = record("stu-1", PaymentStatus::Pending);
        let mut second = record("stu-1", PaymentStatus::Pending);
        second.transaction_id = first.transaction_id.clone();

        store.insert(first).await.unwrap();
        assert!(store.insert(second).await.is_err());
    }

    #[tokio::test]
    async fn completed_lookup_filters_by_student_and_status() {
        let store = InMemoryPaymentStore::new();
        store
            .insert(record("stu-1", PaymentStatus::Completed))
            .await
            .unwrap();
        store
            .insert(record("stu-1", PaymentStatus::Failed))
            .await
            .unwrap();
        store
            .insert(record("stu-2", PaymentStatus::Completed))
            .await
            .unwrap();

        let completed = store.find_completed_by_student("stu-1").await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].payment_status, PaymentStatus::Completed);
    }
}
