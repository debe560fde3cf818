use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::post,
    Router,
};
use bytes::Bytes;
use tracing::info;

use crate::{
    errors::ServiceError,
    handlers::AppState,
    services::{payment_gateway::GatewayKind, payment_webhooks::WebhookOutcome},
};

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookOutcome),
        (status = 400, description = "Invalid or mismatched payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown invoice", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ServiceError> {
    handle(&state, None, &headers, &body).await
}

// POST /api/v1/payments/webhook/:gateway
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook/{gateway}",
    params(
        ("gateway" = String, Path, description = "generic, stripe or paymob")
    ),
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookOutcome),
        (status = 400, description = "Invalid payload or unknown gateway", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown invoice", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn gateway_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ServiceError> {
    let gateway = GatewayKind::from_path(&gateway)?;
    handle(&state, Some(gateway), &headers, &body).await
}

async fn handle(
    state: &AppState,
    gateway: Option<GatewayKind>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Json<WebhookOutcome>, ServiceError> {
    let outcome = state.services.webhooks.process(gateway, headers, body).await?;
    info!(
        invoice_id = %outcome.invoice_id,
        status = %outcome.status,
        duplicate = outcome.duplicate,
        "payment webhook handled"
    );
    Ok(Json(outcome))
}

/// Webhook routes carry no auth layer; callbacks are authenticated by signature.
pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(payment_webhook))
        .route("/webhook/:gateway", post(gateway_webhook))
}
