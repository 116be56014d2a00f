//! Request/response shapes consumed by the surrounding CRUD layer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    FailureReason, FeeCategory, FeeLineItem, InstallmentPlan, PaymentMethod, PaymentRecord,
    PaymentStatus,
};
use crate::services::dues::{DueEntry, PendingInstallments};
use crate::services::orchestrator::{InitiatePayment, ProcessOutcome};

#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    #[validate(length(min = 1))]
    pub student_id: String,
    #[validate(length(min = 1))]
    pub college_id: String,
    #[validate(length(min = 1))]
    pub department_id: String,
    pub student_name: Option<String>,
    #[validate(email)]
    pub student_email: Option<String>,
    #[validate(length(min = 1))]
    pub fee_types: Vec<FeeCategory>,
    #[serde(default = "default_installment")]
    pub installment_option: u32,
    #[serde(default = "default_installment")]
    pub current_installment: u32,
}

fn default_installment() -> u32 {
    1
}

impl From<InitiatePaymentRequest> for InitiatePayment {
    fn from(request: InitiatePaymentRequest) -> Self {
        Self {
            student_id: request.student_id,
            college_id: request.college_id,
            department_id: request.department_id,
            student_name: request.student_name,
            student_email: request.student_email,
            fee_types: request.fee_types,
            installment_option: request.installment_option,
            current_installment: request.current_installment,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProcessPaymentRequest {
    pub payment_method: PaymentMethod,
    /// Opaque method details forwarded to the gateway (card token, VPA, ...).
    #[serde(default)]
    pub payment_details: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentRecordSummary {
    pub id: Uuid,
    pub student_id: String,
    pub college_id: String,
    pub department_id: String,
    pub fee_details: Vec<FeeLineItem>,
    pub amount_paid: Decimal,
    pub currency: String,
    pub transaction_id: String,
    pub payment_status: PaymentStatus,
    pub installment: Option<InstallmentPlan>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_attempts: u32,
    pub failure_reason: Option<FailureReason>,
    pub receipt_path: Option<String>,
    pub receipt_sent: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<PaymentRecord> for PaymentRecordSummary {
    fn from(record: PaymentRecord) -> Self {
        Self {
            id: record.id,
            student_id: record.student_id,
            college_id: record.college_id,
            department_id: record.department_id,
            fee_details: record.fee_details,
            amount_paid: record.amount_paid,
            currency: record.currency.to_string(),
            transaction_id: record.transaction_id,
            payment_status: record.payment_status,
            installment: record.installment,
            payment_method: record.payment_method,
            payment_attempts: record.payment_attempts,
            failure_reason: record.failure_reason,
            receipt_path: record.receipt_path,
            receipt_sent: record.receipt_sent,
            created_at: record.created_at.to_string(),
            updated_at: record.updated_at.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessPaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    /// Transient signal: the record stays `PENDING` while the OTP is
    /// outstanding.
    pub requires_otp: bool,
    pub failure_reason: Option<FailureReason>,
}

impl From<ProcessOutcome> for ProcessPaymentResponse {
    fn from(outcome: ProcessOutcome) -> Self {
        Self {
            payment_id: outcome.record.id,
            status: outcome.record.payment_status,
            requires_otp: outcome.requires_otp,
            failure_reason: outcome.record.failure_reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub failure_reason: Option<FailureReason>,
}

#[derive(Debug, Serialize)]
pub struct CompletePaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub receipt_path: Option<String>,
    pub receipt_sent: bool,
    pub failure_reason: Option<FailureReason>,
}

impl From<PaymentRecord> for CompletePaymentResponse {
    fn from(record: PaymentRecord) -> Self {
        let transaction_id = (record.payment_status == PaymentStatus::Completed)
            .then(|| record.transaction_id.clone());
        Self {
            payment_id: record.id,
            status: record.payment_status,
            transaction_id,
            receipt_path: record.receipt_path,
            receipt_sent: record.receipt_sent,
            failure_reason: record.failure_reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DueEntryResponse {
    pub fee_type: FeeCategory,
    pub amount: Decimal,
    pub currency: String,
    pub due_date: DateTime<Utc>,
}

impl DueEntryResponse {
    pub fn from_entry(entry: DueEntry, currency: &str) -> Self {
        Self {
            fee_type: entry.fee_type,
            amount: entry.amount,
            currency: currency.to_string(),
            due_date: entry.due_date,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PendingInstallmentsResponse {
    pub fee_types: Vec<FeeCategory>,
    pub total_installments: u32,
    pub completed_installments: u32,
    pub next_installment: u32,
    pub remaining_amount: Decimal,
}

impl From<PendingInstallments> for PendingInstallmentsResponse {
    fn from(pending: PendingInstallments) -> Self {
        Self {
            fee_types: pending.fee_types,
            total_installments: pending.total_installments,
            completed_installments: pending.completed_installments,
            next_installment: pending.next_installment,
            remaining_amount: pending.remaining_amount,
        }
    }
}
