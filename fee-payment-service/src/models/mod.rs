//! Persisted entities and the closed domain vocabulary of the fee subsystem.

use mongodb::bson::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod catalog;

pub use catalog::FeeCatalog;

/// A billable item with a catalog price.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeCategory {
    Tuition,
    Exam,
    Hostel,
}

impl FeeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeCategory::Tuition => "TUITION",
            FeeCategory::Exam => "EXAM",
            FeeCategory::Hostel => "HOSTEL",
        }
    }
}

impl fmt::Display for FeeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single supported settlement currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "INR")]
    Inr,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("INR")
    }
}

/// Lifecycle of one payment attempt. Transitions only move forward:
/// `Pending -> Processing -> {Completed, Failed}` or `Pending -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    Upi,
    NetBanking,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::Upi => "UPI",
            PaymentMethod::NetBanking => "NET_BANKING",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of decline reasons reported by the gateway (plus the internal
/// reason used when an operation dies mid-flight).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    InsufficientFunds,
    AuthenticationFailed,
    PaymentTimedOut,
    GatewayError,
    CardDeclined,
    TechnicalFailure,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InsufficientFunds => "INSUFFICIENT_FUNDS",
            FailureReason::AuthenticationFailed => "AUTHENTICATION_FAILED",
            FailureReason::PaymentTimedOut => "PAYMENT_TIMED_OUT",
            FailureReason::GatewayError => "GATEWAY_ERROR",
            FailureReason::CardDeclined => "CARD_DECLINED",
            FailureReason::TechnicalFailure => "TECHNICAL_FAILURE",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the per-category breakdown carried on a payment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeLineItem {
    pub fee_type: FeeCategory,
    pub amount: Decimal,
}

/// Installment bookkeeping, present as a coherent group only on installment
/// payments. `1 <= number <= total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub number: u32,
    pub total: u32,
    pub remaining_amount: Decimal,
}

/// The permanent ledger entry for one payment attempt (or one installment
/// slice). Mutated exclusively through guarded status transitions; never
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub student_id: String,
    pub college_id: String,
    pub department_id: String,
    pub student_name: Option<String>,
    pub student_email: Option<String>,
    pub fee_details: Vec<FeeLineItem>,
    pub amount_paid: Decimal,
    pub currency: Currency,
    /// Globally unique. Assigned at creation, replaced by the gateway-issued
    /// id on successful settlement.
    pub transaction_id: String,
    pub payment_status: PaymentStatus,
    pub installment: Option<InstallmentPlan>,
    pub payment_method: Option<PaymentMethod>,
    pub gateway_reference: Option<String>,
    pub payment_attempts: u32,
    pub failure_reason: Option<FailureReason>,
    pub receipt_path: Option<String>,
    pub receipt_sent: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl PaymentRecord {
    /// Fee categories covered by this record, in breakdown order.
    pub fn fee_types(&self) -> Vec<FeeCategory> {
        self.fee_details.iter().map(|line| line.fee_type).collect()
    }
}
