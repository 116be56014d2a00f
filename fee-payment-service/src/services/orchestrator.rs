//! The payment state machine.
//!
//! Each operation is one independent request/response step; the persisted
//! record is the only state carried between steps. Transitions move forward
//! only — `Pending -> Processing -> {Completed, Failed}`, or straight to
//! `Failed` — and every transition is a guarded conditional update, so a
//! concurrent retry loses the race instead of double-driving the gateway.

use anyhow::Error as AnyError;
use mongodb::bson::DateTime;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use service_core::error::AppError;

use crate::config::FeeSettings;
use crate::models::{
    FailureReason, FeeCatalog, FeeCategory, InstallmentPlan, PaymentMethod, PaymentRecord,
    PaymentStatus,
};
use crate::services::fees::{self, FeeError};
use crate::services::gateway::{AuthorizationStatus, PaymentGateway};
use crate::services::receipts::{NotificationSender, ReceiptRenderer};
use crate::services::repository::{PaymentStore, RecordPatch};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error(transparent)]
    Fees(#[from] FeeError),

    #[error("installment option {0} not offered (choose 1..={1})")]
    UnsupportedInstallmentOption(u32, u32),

    #[error("OTP must be exactly 6 digits")]
    MalformedOtp,

    #[error("payment {0} not found")]
    NotFound(Uuid),

    #[error("payment {id} is {actual}, operation requires {expected}")]
    StateConflict {
        id: Uuid,
        expected: PaymentStatus,
        actual: PaymentStatus,
    },

    #[error("payment {0} has no authorization in progress")]
    NoAuthorizationInFlight(Uuid),

    #[error("gateway unavailable: {0}")]
    Gateway(#[source] AnyError),

    #[error("storage failure: {0}")]
    Storage(#[source] AnyError),
}

impl PaymentError {
    /// Technical errors trigger the fail-safe force-transition; client
    /// errors (validation, not-found, wrong-state) never touch the record.
    fn is_technical(&self) -> bool {
        matches!(self, PaymentError::Gateway(_) | PaymentError::Storage(_))
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        use PaymentError::*;
        match err {
            e @ (Fees(_) | UnsupportedInstallmentOption(..) | MalformedOtp) => {
                AppError::BadRequest(AnyError::new(e))
            }
            e @ NotFound(_) => AppError::NotFound(AnyError::new(e)),
            e @ (StateConflict { .. } | NoAuthorizationInFlight(_)) => {
                AppError::Conflict(AnyError::new(e))
            }
            e @ (Gateway(_) | Storage(_)) => AppError::InternalError(AnyError::new(e)),
        }
    }
}

/// Inputs to [`PaymentService::initiate`].
#[derive(Debug, Clone)]
pub struct InitiatePayment {
    pub student_id: String,
    pub college_id: String,
    pub department_id: String,
    pub student_name: Option<String>,
    pub student_email: Option<String>,
    pub fee_types: Vec<FeeCategory>,
    pub installment_option: u32,
    pub current_installment: u32,
}

/// Result of the `process` step. `requires_otp` is a transient signal: the
/// record itself stays `Pending` while the OTP is outstanding.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub record: PaymentRecord,
    pub requires_otp: bool,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    receipts: Arc<dyn ReceiptRenderer>,
    notifier: Arc<dyn NotificationSender>,
    catalog: FeeCatalog,
    fees: FeeSettings,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        receipts: Arc<dyn ReceiptRenderer>,
        notifier: Arc<dyn NotificationSender>,
        catalog: FeeCatalog,
        fees: FeeSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            receipts,
            notifier,
            catalog,
            fees,
        }
    }

    /// Computes the amount for the selected fees and installment slice and
    /// persists a `Pending` record. No gateway interaction yet.
    pub async fn initiate(&self, request: InitiatePayment) -> Result<PaymentRecord, PaymentError> {
        let n = request.installment_option;
        let k = request.current_installment;
        if n > self.fees.max_installments {
            return Err(PaymentError::UnsupportedInstallmentOption(
                n,
                self.fees.max_installments,
            ));
        }

        let total = fees::total_for_fee_types(&self.catalog, &request.fee_types)?;
        let (amount, installment) = if n > 1 {
            let charged = fees::surcharged_total(total, n, self.fees.surcharge_pct);
            let (amount, remaining) = fees::installment_amount(charged, n, k)?;
            (
                amount,
                Some(InstallmentPlan {
                    number: k,
                    total: n,
                    remaining_amount: remaining,
                }),
            )
        } else {
            let (amount, _) = fees::installment_amount(total, n, k)?;
            (amount, None)
        };
        let fee_details =
            fees::allocate_fee_details(&self.catalog, &request.fee_types, amount, total)?;

        let now = DateTime::now();
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            student_id: request.student_id,
            college_id: request.college_id,
            department_id: request.department_id,
            student_name: request.student_name,
            student_email: request.student_email,
            fee_details,
            amount_paid: amount,
            currency: self.catalog.currency(),
            transaction_id: format!("TXN-{}", Uuid::new_v4().simple()),
            payment_status: PaymentStatus::Pending,
            installment,
            payment_method: None,
            gateway_reference: None,
            payment_attempts: 0,
            failure_reason: None,
            receipt_path: None,
            receipt_sent: false,
            created_at: now,
            updated_at: now,
        };

        self.store
            .insert(record.clone())
            .await
            .map_err(PaymentError::Storage)?;

        tracing::info!(
            payment_id = %record.id,
            student_id = %record.student_id,
            amount = %record.amount_paid,
            installments = n,
            "payment initiated"
        );
        Ok(record)
    }

    /// Drives the authorization step. Requires a `Pending` record.
    pub async fn process(
        &self,
        id: Uuid,
        method: PaymentMethod,
        details: &serde_json::Value,
    ) -> Result<ProcessOutcome, PaymentError> {
        let result = self.process_inner(id, method, details).await;
        self.fail_safe(id, result).await
    }

    async fn process_inner(
        &self,
        id: Uuid,
        method: PaymentMethod,
        details: &serde_json::Value,
    ) -> Result<ProcessOutcome, PaymentError> {
        let record = self.load(id).await?;

        // Claim the attempt while still Pending: method recorded, attempt
        // counted exactly once per authorize call.
        let claim = RecordPatch {
            payment_method: Some(method),
            increment_attempts: true,
            ..Default::default()
        };
        let record = self
            .store
            .apply_if_status(id, PaymentStatus::Pending, claim)
            .await
            .map_err(PaymentError::Storage)?
            .ok_or(PaymentError::StateConflict {
                id,
                expected: PaymentStatus::Pending,
                actual: record.payment_status,
            })?;

        let auth = self
            .gateway
            .authorize(record.amount_paid, method, details)
            .await
            .map_err(PaymentError::Gateway)?;

        match auth.status {
            AuthorizationStatus::RequiresOtp => {
                let updated = self
                    .transition(
                        id,
                        PaymentStatus::Pending,
                        RecordPatch {
                            gateway_reference: Some(auth.gateway_reference),
                            ..Default::default()
                        },
                    )
                    .await?;
                tracing::info!(payment_id = %id, "authorization pending OTP");
                Ok(ProcessOutcome {
                    record: updated,
                    requires_otp: true,
                })
            }
            AuthorizationStatus::Processing => {
                let updated = self
                    .transition(
                        id,
                        PaymentStatus::Pending,
                        RecordPatch {
                            status: Some(PaymentStatus::Processing),
                            gateway_reference: Some(auth.gateway_reference),
                            ..Default::default()
                        },
                    )
                    .await?;
                tracing::info!(payment_id = %id, "authorization accepted");
                Ok(ProcessOutcome {
                    record: updated,
                    requires_otp: false,
                })
            }
            AuthorizationStatus::Failed => {
                let reason = auth
                    .failure_reason
                    .unwrap_or(FailureReason::GatewayError);
                let updated = self
                    .transition(
                        id,
                        PaymentStatus::Pending,
                        RecordPatch {
                            status: Some(PaymentStatus::Failed),
                            gateway_reference: Some(auth.gateway_reference),
                            failure_reason: Some(reason),
                            ..Default::default()
                        },
                    )
                    .await?;
                tracing::info!(payment_id = %id, reason = %reason, "authorization declined");
                Ok(ProcessOutcome {
                    record: updated,
                    requires_otp: false,
                })
            }
        }
    }

    /// Confirms the second factor for an authorization awaiting OTP.
    pub async fn verify_otp(&self, id: Uuid, otp: &str) -> Result<PaymentRecord, PaymentError> {
        // Rejected before any state mutation.
        if otp.len() != 6 || !otp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PaymentError::MalformedOtp);
        }
        let result = self.verify_otp_inner(id, otp).await;
        self.fail_safe(id, result).await
    }

    async fn verify_otp_inner(
        &self,
        id: Uuid,
        otp: &str,
    ) -> Result<PaymentRecord, PaymentError> {
        let record = self.load(id).await?;
        if record.payment_status != PaymentStatus::Pending {
            return Err(PaymentError::StateConflict {
                id,
                expected: PaymentStatus::Pending,
                actual: record.payment_status,
            });
        }
        let reference = record
            .gateway_reference
            .clone()
            .ok_or(PaymentError::NoAuthorizationInFlight(id))?;

        let response = self
            .gateway
            .verify_otp(&reference, otp)
            .await
            .map_err(PaymentError::Gateway)?;

        if response.approved {
            tracing::info!(payment_id = %id, "OTP verified");
            self.transition(
                id,
                PaymentStatus::Pending,
                RecordPatch {
                    status: Some(PaymentStatus::Processing),
                    ..Default::default()
                },
            )
            .await
        } else {
            let reason = response
                .failure_reason
                .unwrap_or(FailureReason::AuthenticationFailed);
            tracing::info!(payment_id = %id, reason = %reason, "OTP rejected");
            self.transition(
                id,
                PaymentStatus::Pending,
                RecordPatch {
                    status: Some(PaymentStatus::Failed),
                    failure_reason: Some(reason),
                    ..Default::default()
                },
            )
            .await
        }
    }

    /// Settles an authorized payment. Requires the record to be exactly
    /// `Processing`; a retried or concurrent call loses the guarded update
    /// and gets a conflict instead of a second settlement.
    pub async fn complete(&self, id: Uuid) -> Result<PaymentRecord, PaymentError> {
        let result = self.complete_inner(id).await;
        self.fail_safe(id, result).await
    }

    async fn complete_inner(&self, id: Uuid) -> Result<PaymentRecord, PaymentError> {
        let record = self.load(id).await?;
        if record.payment_status != PaymentStatus::Processing {
            return Err(PaymentError::StateConflict {
                id,
                expected: PaymentStatus::Processing,
                actual: record.payment_status,
            });
        }
        let reference = record
            .gateway_reference
            .clone()
            .ok_or(PaymentError::NoAuthorizationInFlight(id))?;

        let settle = self
            .gateway
            .settle(&reference)
            .await
            .map_err(PaymentError::Gateway)?;

        if settle.success {
            let gateway_txn = settle
                .transaction_id
                .unwrap_or_else(|| record.transaction_id.clone());
            let updated = self
                .transition(
                    id,
                    PaymentStatus::Processing,
                    RecordPatch {
                        status: Some(PaymentStatus::Completed),
                        transaction_id: Some(gateway_txn),
                        ..Default::default()
                    },
                )
                .await?;
            tracing::info!(
                payment_id = %id,
                transaction_id = %updated.transaction_id,
                "payment completed"
            );
            Ok(self.issue_receipt(updated).await)
        } else {
            let reason = settle
                .failure_reason
                .unwrap_or(FailureReason::GatewayError);
            tracing::info!(payment_id = %id, reason = %reason, "settlement failed");
            self.transition(
                id,
                PaymentStatus::Processing,
                RecordPatch {
                    status: Some(PaymentStatus::Failed),
                    failure_reason: Some(reason),
                    ..Default::default()
                },
            )
            .await
        }
    }

    pub async fn status(&self, id: Uuid) -> Result<PaymentRecord, PaymentError> {
        self.load(id).await
    }

    pub async fn history(&self, student_id: &str) -> Result<Vec<PaymentRecord>, PaymentError> {
        self.store
            .find_by_student(student_id)
            .await
            .map_err(PaymentError::Storage)
    }

    async fn load(&self, id: Uuid) -> Result<PaymentRecord, PaymentError> {
        self.store
            .find(id)
            .await
            .map_err(PaymentError::Storage)?
            .ok_or(PaymentError::NotFound(id))
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        patch: RecordPatch,
    ) -> Result<PaymentRecord, PaymentError> {
        match self
            .store
            .apply_if_status(id, expected, patch)
            .await
            .map_err(PaymentError::Storage)?
        {
            Some(record) => Ok(record),
            None => {
                let actual = self.load(id).await?.payment_status;
                Err(PaymentError::StateConflict {
                    id,
                    expected,
                    actual,
                })
            }
        }
    }

    /// Receipt generation and delivery, both best-effort. Neither outcome
    /// can move the record out of `Completed`.
    async fn issue_receipt(&self, mut record: PaymentRecord) -> PaymentRecord {
        match self.receipts.render(&record).await {
            Ok(path) => {
                let sent = self.notifier.send_receipt(&record, &path).await;
                if !sent {
                    tracing::warn!(payment_id = %record.id, "receipt email not delivered");
                }
                match self
                    .store
                    .set_receipt(record.id, Some(path.clone()), sent)
                    .await
                {
                    Ok(()) => {
                        record.receipt_path = Some(path);
                        record.receipt_sent = sent;
                    }
                    Err(err) => {
                        tracing::error!(
                            payment_id = %record.id,
                            error = %err,
                            "failed to persist receipt details"
                        );
                    }
                }
            }
            Err(err) => {
                tracing::error!(payment_id = %record.id, error = %err, "receipt rendering failed");
            }
        }
        record
    }

    /// The fail-safe rule: a technical error mid-step force-fails the record
    /// before the error propagates, so the ledger never shows an ambiguous
    /// state.
    async fn fail_safe<T>(
        &self,
        id: Uuid,
        result: Result<T, PaymentError>,
    ) -> Result<T, PaymentError> {
        if let Err(err) = &result {
            if err.is_technical() {
                let patch = RecordPatch {
                    status: Some(PaymentStatus::Failed),
                    failure_reason: Some(FailureReason::TechnicalFailure),
                    ..Default::default()
                };
                for state in [PaymentStatus::Pending, PaymentStatus::Processing] {
                    match self.store.apply_if_status(id, state, patch.clone()).await {
                        Ok(Some(_)) => {
                            tracing::error!(
                                payment_id = %id,
                                error = %err,
                                "payment force-failed after technical error"
                            );
                            break;
                        }
                        Ok(None) => {}
                        Err(store_err) => {
                            tracing::error!(
                                payment_id = %id,
                                error = %store_err,
                                "unable to force-fail payment"
                            );
                            break;
                        }
                    }
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::{AuthorizeResponse, OtpResponse, SettleResponse};
    use crate::services::repository::InMemoryPaymentStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Gateway stub returning pre-scripted responses.
    struct ScriptedGateway {
        authorize: Mutex<Option<anyhow::Result<AuthorizeResponse>>>,
        otp: Mutex<Option<OtpResponse>>,
        settle: Mutex<Option<SettleResponse>>,
    }

    impl ScriptedGateway {
        fn new() -> Self {
            Self {
                authorize: Mutex::new(None),
                otp: Mutex::new(None),
                settle: Mutex::new(None),
            }
        }

        fn authorize_ok(self, status: AuthorizationStatus, reason: Option<FailureReason>) -> Self {
            *self.authorize.lock().unwrap() = Some(Ok(AuthorizeResponse {
                status,
                gateway_reference: "gw_ref_test".to_string(),
                failure_reason: reason,
            }));
            self
        }

        fn authorize_err(self) -> Self {
            *self.authorize.lock().unwrap() = Some(Err(anyhow::anyhow!("connection reset")));
            self
        }

        fn otp(self, approved: bool) -> Self {
            *self.otp.lock().unwrap() = Some(OtpResponse {
                approved,
                failure_reason: (!approved).then_some(FailureReason::AuthenticationFailed),
            });
            self
        }

        fn settle(self, success: bool) -> Self {
            *self.settle.lock().unwrap() = Some(SettleResponse {
                success,
                transaction_id: success.then(|| "GTXN-abc123".to_string()),
                failure_reason: (!success).then_some(FailureReason::PaymentTimedOut),
            });
            self
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        async fn authorize(
            &self,
            _amount: rust_decimal::Decimal,
            _method: PaymentMethod,
            _details: &serde_json::Value,
        ) -> anyhow::Result<AuthorizeResponse> {
            self.authorize
                .lock()
                .unwrap()
                .take()
                .expect("no scripted authorize response")
        }

        async fn verify_otp(
            &self,
            _reference: &str,
            _otp: &str,
        ) -> anyhow::Result<OtpResponse> {
            Ok(self
                .otp
                .lock()
                .unwrap()
                .clone()
                .expect("no scripted otp response"))
        }

        async fn settle(&self, _reference: &str) -> anyhow::Result<SettleResponse> {
            Ok(self
                .settle
                .lock()
                .unwrap()
                .clone()
                .expect("no scripted settle response"))
        }
    }

    struct StubRenderer;

    #[async_trait]
    impl ReceiptRenderer for StubRenderer {
        async fn render(&self, record: &PaymentRecord) -> anyhow::Result<String> {
            Ok(format!("receipts/receipt_{}.txt", record.transaction_id))
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl NotificationSender for FailingNotifier {
        async fn send_receipt(&self, _record: &PaymentRecord, _receipt_ref: &str) -> bool {
            false
        }
    }

    fn settings() -> FeeSettings {
        FeeSettings {
            surcharge_pct: dec!(5),
            max_installments: 4,
        }
    }

    fn service(gateway: ScriptedGateway) -> (PaymentService, Arc<InMemoryPaymentStore>) {
        service_with_notifier(
            gateway,
            Arc::new(crate::services::receipts::MockNotifier::default()),
        )
    }

    fn service_with_notifier(
        gateway: ScriptedGateway,
        notifier: Arc<dyn NotificationSender>,
    ) -> (PaymentService, Arc<InMemoryPaymentStore>) {
        let store = Arc::new(InMemoryPaymentStore::new());
        let service = PaymentService::new(
            store.clone(),
            Arc::new(gateway),
            Arc::new(StubRenderer),
            notifier,
            FeeCatalog::default(),
            settings(),
        );
        (service, store)
    }

    fn initiate_request(fee_types: Vec<FeeCategory>, n: u32, k: u32) -> InitiatePayment {
        InitiatePayment {
            student_id: "stu-1".to_string(),
            college_id: "clg-1".to_string(),
            department_id: "dep-1".to_string(),
            student_name: Some("Asha Rao".to_string()),
            student_email: Some("asha@campus.example".to_string()),
            fee_types,
            installment_option: n,
            current_installment: k,
        }
    }

    #[tokio::test]
    async fn initiate_builds_a_pending_record() {
        let (service, _) = service(ScriptedGateway::new());
        let record = service
            .initiate(initiate_request(vec![FeeCategory::Tuition], 1, 1))
            .await
            .unwrap();

        assert_eq!(record.payment_status, PaymentStatus::Pending);
        assert_eq!(record.amount_paid, dec!(50000));
        assert_eq!(record.payment_attempts, 0);
        assert!(record.installment.is_none());
        assert!(record.transaction_id.starts_with("TXN-"));
    }

    #[tokio::test]
    async fn initiate_applies_surcharge_and_slice_rules() {
        let (service, _) = service(ScriptedGateway::new());
        let record = service
            .initiate(initiate_request(
                vec![FeeCategory::Tuition, FeeCategory::Exam],
                3,
                1,
            ))
            .await
            .unwrap();

        assert_eq!(record.amount_paid, dec!(18200));
        let plan = record.installment.as_ref().unwrap();
        assert_eq!(plan.number, 1);
        assert_eq!(plan.total, 3);
        assert_eq!(plan.remaining_amount, dec!(36400));

        let line_sum: rust_decimal::Decimal =
            record.fee_details.iter().map(|line| line.amount).sum();
        assert_eq!(line_sum, record.amount_paid);
    }

    #[tokio::test]
    async fn initiate_rejects_out_of_range_options() {
        let (service, _) = service(ScriptedGateway::new());
        let err = service
            .initiate(initiate_request(vec![FeeCategory::Exam], 5, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::UnsupportedInstallmentOption(5, 4)));

        let err = service
            .initiate(initiate_request(vec![FeeCategory::Exam], 3, 4))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::Fees(FeeError::InvalidInstallmentIndex { index: 4, count: 3 })
        ));
    }

    #[tokio::test]
    async fn straight_through_flow_completes_and_issues_receipt() {
        let gateway = ScriptedGateway::new()
            .authorize_ok(AuthorizationStatus::Processing, None)
            .settle(true);
        let (service, _) = service(gateway);

        let record = service
            .initiate(initiate_request(vec![FeeCategory::Tuition], 1, 1))
            .await
            .unwrap();
        let initiated_txn = record.transaction_id.clone();

        let outcome = service
            .process(record.id, PaymentMethod::Upi, &serde_json::Value::Null)
            .await
            .unwrap();
        assert!(!outcome.requires_otp);
        assert_eq!(outcome.record.payment_status, PaymentStatus::Processing);
        assert_eq!(outcome.record.payment_attempts, 1);
        assert!(outcome.record.gateway_reference.is_some());

        let completed = service.complete(record.id).await.unwrap();
        assert_eq!(completed.payment_status, PaymentStatus::Completed);
        assert_eq!(completed.transaction_id, "GTXN-abc123");
        assert_ne!(completed.transaction_id, initiated_txn);
        assert!(completed.receipt_path.is_some());
        assert!(completed.receipt_sent);
    }

    #[tokio::test]
    async fn card_otp_flow_keeps_the_record_pending_until_verified() {
        let gateway = ScriptedGateway::new()
            .authorize_ok(AuthorizationStatus::RequiresOtp, None)
            .otp(true);
        let (service, store) = service(gateway);

        let record = service
            .initiate(initiate_request(vec![FeeCategory::Tuition], 1, 1))
            .await
            .unwrap();

        let outcome = service
            .process(record.id, PaymentMethod::Card, &serde_json::Value::Null)
            .await
            .unwrap();
        assert!(outcome.requires_otp);
        assert_eq!(outcome.record.payment_status, PaymentStatus::Pending);
        assert!(outcome.record.gateway_reference.is_some());

        let stored = store.find(record.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);

        let verified = service.verify_otp(record.id, "123456").await.unwrap();
        assert_eq!(verified.payment_status, PaymentStatus::Processing);
    }

    #[tokio::test]
    async fn rejected_otp_fails_with_authentication_failed() {
        let gateway = ScriptedGateway::new()
            .authorize_ok(AuthorizationStatus::RequiresOtp, None)
            .otp(false);
        let (service, _) = service(gateway);

        let record = service
            .initiate(initiate_request(vec![FeeCategory::Exam], 1, 1))
            .await
            .unwrap();
        service
            .process(record.id, PaymentMethod::Card, &serde_json::Value::Null)
            .await
            .unwrap();

        let failed = service.verify_otp(record.id, "000000").await.unwrap();
        assert_eq!(failed.payment_status, PaymentStatus::Failed);
        assert_eq!(
            failed.failure_reason,
            Some(FailureReason::AuthenticationFailed)
        );
    }

    #[tokio::test]
    async fn malformed_otp_is_rejected_before_any_mutation() {
        let gateway = ScriptedGateway::new().authorize_ok(AuthorizationStatus::RequiresOtp, None);
        let (service, store) = service(gateway);

        let record = service
            .initiate(initiate_request(vec![FeeCategory::Exam], 1, 1))
            .await
            .unwrap();
        service
            .process(record.id, PaymentMethod::Card, &serde_json::Value::Null)
            .await
            .unwrap();

        for otp in ["12345", "1234567", "12a456", ""] {
            let err = service.verify_otp(record.id, otp).await.unwrap_err();
            assert!(matches!(err, PaymentError::MalformedOtp));
        }

        let stored = store.find(record.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(stored.payment_attempts, 1);
    }

    #[tokio::test]
    async fn declined_authorization_persists_the_reason() {
        let gateway = ScriptedGateway::new().authorize_ok(
            AuthorizationStatus::Failed,
            Some(FailureReason::InsufficientFunds),
        );
        let (service, store) = service(gateway);

        let record = service
            .initiate(initiate_request(vec![FeeCategory::Tuition], 1, 1))
            .await
            .unwrap();
        let outcome = service
            .process(record.id, PaymentMethod::Card, &serde_json::Value::Null)
            .await
            .unwrap();

        assert_eq!(outcome.record.payment_status, PaymentStatus::Failed);
        assert_eq!(
            outcome.record.failure_reason,
            Some(FailureReason::InsufficientFunds)
        );

        let stored = store.find(record.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
        assert_eq!(stored.payment_attempts, 1);
    }

    #[tokio::test]
    async fn process_requires_a_pending_record() {
        let gateway = ScriptedGateway::new().authorize_ok(AuthorizationStatus::Processing, None);
        let (service, store) = service(gateway);

        let record = service
            .initiate(initiate_request(vec![FeeCategory::Exam], 1, 1))
            .await
            .unwrap();
        service
            .process(record.id, PaymentMethod::Upi, &serde_json::Value::Null)
            .await
            .unwrap();

        let before = store.find(record.id).await.unwrap().unwrap();
        let err = service
            .process(record.id, PaymentMethod::Upi, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::StateConflict {
                expected: PaymentStatus::Pending,
                actual: PaymentStatus::Processing,
                ..
            }
        ));

        // The rejected call must leave the record unmodified.
        let after = store.find(record.id).await.unwrap().unwrap();
        assert_eq!(after.payment_attempts, before.payment_attempts);
        assert_eq!(after.payment_status, before.payment_status);
    }

    #[tokio::test]
    async fn complete_requires_a_processing_record() {
        let (service, _) = service(ScriptedGateway::new());
        let record = service
            .initiate(initiate_request(vec![FeeCategory::Exam], 1, 1))
            .await
            .unwrap();

        let err = service.complete(record.id).await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::StateConflict {
                expected: PaymentStatus::Processing,
                actual: PaymentStatus::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_settlement_moves_the_record_to_failed() {
        let gateway = ScriptedGateway::new()
            .authorize_ok(AuthorizationStatus::Processing, None)
            .settle(false);
        let (service, _) = service(gateway);

        let record = service
            .initiate(initiate_request(vec![FeeCategory::Tuition], 1, 1))
            .await
            .unwrap();
        service
            .process(record.id, PaymentMethod::NetBanking, &serde_json::Value::Null)
            .await
            .unwrap();

        let failed = service.complete(record.id).await.unwrap();
        assert_eq!(failed.payment_status, PaymentStatus::Failed);
        assert_eq!(
            failed.failure_reason,
            Some(FailureReason::PaymentTimedOut)
        );
        assert!(failed.receipt_path.is_none());
    }

    #[tokio::test]
    async fn notifier_failure_never_reverses_completion() {
        let gateway = ScriptedGateway::new()
            .authorize_ok(AuthorizationStatus::Processing, None)
            .settle(true);
        let (service, store) = service_with_notifier(gateway, Arc::new(FailingNotifier));

        let record = service
            .initiate(initiate_request(vec![FeeCategory::Exam], 1, 1))
            .await
            .unwrap();
        service
            .process(record.id, PaymentMethod::Upi, &serde_json::Value::Null)
            .await
            .unwrap();

        let completed = service.complete(record.id).await.unwrap();
        assert_eq!(completed.payment_status, PaymentStatus::Completed);
        assert!(completed.receipt_path.is_some());
        assert!(!completed.receipt_sent);

        let stored = store.find(record.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Completed);
        assert!(!stored.receipt_sent);
    }

    #[tokio::test]
    async fn gateway_outage_force_fails_the_record() {
        let gateway = ScriptedGateway::new().authorize_err();
        let (service, store) = service(gateway);

        let record = service
            .initiate(initiate_request(vec![FeeCategory::Tuition], 1, 1))
            .await
            .unwrap();
        let err = service
            .process(record.id, PaymentMethod::Card, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Gateway(_)));

        let stored = store.find(record.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
        assert_eq!(
            stored.failure_reason,
            Some(FailureReason::TechnicalFailure)
        );
        assert_eq!(stored.payment_attempts, 1);
    }

    #[tokio::test]
    async fn unknown_payment_id_is_not_found() {
        let (service, _) = service(ScriptedGateway::new());
        let err = service
            .process(Uuid::new_v4(), PaymentMethod::Upi, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
    }
}
