//! Dues and arrears handlers: the read side over completed payments.

use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{DueEntryResponse, PendingInstallmentsResponse},
    AppState,
};

/// Catalog categories the student still owes, with rolling due dates.
pub async fn outstanding_dues(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Result<Json<Vec<DueEntryResponse>>, AppError> {
    tracing::debug!(%student_id, "deriving outstanding dues");

    let currency = state.config.catalog.currency().to_string();
    let entries = state.dues.outstanding_dues(&student_id).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|entry| DueEntryResponse::from_entry(entry, &currency))
            .collect(),
    ))
}

/// Installment plans with slices still outstanding.
pub async fn pending_installments(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Result<Json<Vec<PendingInstallmentsResponse>>, AppError> {
    tracing::debug!(%student_id, "deriving pending installments");

    let pending = state.dues.pending_installments(&student_id).await?;
    Ok(Json(pending.into_iter().map(Into::into).collect()))
}
