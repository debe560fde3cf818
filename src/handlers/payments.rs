use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    handlers::AppState,
    services::{
        payment_sessions::{CreateSessionRequest, PaymentSession},
        payment_webhooks::WebhookOutcome,
    },
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompletePlaceholderRequest {
    pub invoice_id: Uuid,
}

/// Start a hosted payment for an open invoice
#[utoipa::path(
    post,
    path = "/api/v1/payments/session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = PaymentSession),
        (status = 400, description = "Amount or currency mismatch", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown invoice", body = crate::errors::ErrorResponse),
        (status = 409, description = "Invoice is not payable", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway failure", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<Json<PaymentSession>, ServiceError> {
    let session = state.services.payment_sessions.create_session(payload).await?;
    Ok(Json(session))
}

/// Settle a placeholder session as paid (non-production only)
#[utoipa::path(
    post,
    path = "/api/v1/payments/placeholder/complete",
    request_body = CompletePlaceholderRequest,
    responses(
        (status = 200, description = "Invoice settled", body = WebhookOutcome),
        (status = 400, description = "Invoice has no placeholder session", body = crate::errors::ErrorResponse),
        (status = 403, description = "Disabled in production", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown invoice", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn complete_placeholder(
    State(state): State<AppState>,
    Json(payload): Json<CompletePlaceholderRequest>,
) -> Result<Json<WebhookOutcome>, ServiceError> {
    let outcome = state
        .services
        .webhooks
        .complete_placeholder_payment(payload.invoice_id)
        .await?;
    Ok(Json(outcome))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/session", post(create_session))
        .route("/placeholder/complete", post(complete_placeholder))
        .merge(super::payment_webhooks::webhook_routes())
}
