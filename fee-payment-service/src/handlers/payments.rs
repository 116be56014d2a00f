//! Payment operation handlers.
//!
//! Thin adapters: validate the DTO, call the orchestrator, map the record
//! back out. Gateway declines come back as structured data, not errors.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        CompletePaymentResponse, InitiatePaymentRequest, PaymentRecordSummary,
        ProcessPaymentRequest, ProcessPaymentResponse, VerifyOtpRequest, VerifyOtpResponse,
    },
    services::metrics,
    AppState,
};

/// Create a `PENDING` payment for the selected fees. No gateway call yet.
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentRecordSummary>), AppError> {
    payload.validate()?;

    tracing::info!(
        student_id = %payload.student_id,
        fee_types = ?payload.fee_types,
        installment_option = payload.installment_option,
        "initiating payment"
    );

    let record = state.payments.initiate(payload.into()).await?;
    metrics::record_payment(record.payment_status.as_str());

    Ok((StatusCode::CREATED, Json(record.into())))
}

/// Drive the authorization step for a pending payment.
pub async fn process_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<ProcessPaymentRequest>,
) -> Result<Json<ProcessPaymentResponse>, AppError> {
    tracing::info!(
        %payment_id,
        method = %payload.payment_method,
        "processing payment"
    );

    let outcome = state
        .payments
        .process(payment_id, payload.payment_method, &payload.payment_details)
        .await?;
    metrics::record_payment(outcome.record.payment_status.as_str());

    Ok(Json(outcome.into()))
}

/// Confirm the OTP for an authorization awaiting a second factor.
pub async fn verify_otp(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<VerifyOtpResponse>, AppError> {
    tracing::info!(%payment_id, "verifying OTP");

    let record = state.payments.verify_otp(payment_id, &payload.otp).await?;
    metrics::record_payment(record.payment_status.as_str());

    Ok(Json(VerifyOtpResponse {
        payment_id: record.id,
        status: record.payment_status,
        failure_reason: record.failure_reason,
    }))
}

/// Settle an authorized payment and issue its receipt.
pub async fn complete_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<CompletePaymentResponse>, AppError> {
    tracing::info!(%payment_id, "completing payment");

    let record = state.payments.complete(payment_id).await?;
    metrics::record_payment(record.payment_status.as_str());
    if record.payment_status == crate::models::PaymentStatus::Completed {
        use rust_decimal::prelude::ToPrimitive;
        let paise = (record.amount_paid * rust_decimal::Decimal::from(100u32)).round();
        if let Some(paise) = paise.to_u64() {
            metrics::record_settled_amount(&record.currency.to_string(), paise);
        }
    }

    Ok(Json(record.into()))
}

/// Current snapshot of one payment.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentRecordSummary>, AppError> {
    let record = state.payments.status(payment_id).await?;
    Ok(Json(record.into()))
}

/// All payments for a student, newest first.
pub async fn payment_history(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Result<Json<Vec<PaymentRecordSummary>>, AppError> {
    let records = state.payments.history(&student_id).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}
