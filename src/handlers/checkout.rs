use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    errors::ServiceError,
    handlers::AppState,
    services::checkout::{CheckoutRequest, CheckoutResponse, QuoteRequestResponse},
};

/// Failure body for the checkout form: `{type: "error", message}`
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Checkout errors keep the form's `{type, message}` shape instead of the
/// generic error body.
pub struct CheckoutError(ServiceError);

impl From<ServiceError> for CheckoutError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "checkout failed");
        } else {
            warn!(error = %self.0, "checkout rejected");
        }
        let missing_fields = match &self.0 {
            ServiceError::MissingFields(fields) => fields.clone(),
            _ => Vec::new(),
        };
        let body = CheckoutErrorBody {
            kind: "error".to_string(),
            message: self.0.response_message(),
            missing_fields,
            request_id: crate::tracing::current_request_id().map(|r| r.as_str().to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// Submit a checkout form
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Application submitted and invoiced", body = CheckoutResponse),
        (status = 400, description = "Missing or invalid fields", body = CheckoutErrorBody),
        (status = 404, description = "Unknown or quote-only service", body = CheckoutErrorBody),
        (status = 500, description = "Internal error", body = CheckoutErrorBody)
    ),
    tag = "Checkout"
)]
pub async fn submit_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), CheckoutError> {
    let response = state.services.checkout.submit(payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Submit a request for a staff quote
#[utoipa::path(
    post,
    path = "/api/v1/checkout/quote-request",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Application submitted for quoting", body = QuoteRequestResponse),
        (status = 400, description = "Missing or invalid fields", body = CheckoutErrorBody),
        (status = 404, description = "Unknown service", body = CheckoutErrorBody)
    ),
    tag = "Checkout"
)]
pub async fn submit_quote_request(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<QuoteRequestResponse>), CheckoutError> {
    let response = state.services.checkout.submit_quote_request(payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_checkout))
        .route("/quote-request", post(submit_quote_request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    #[tokio::test]
    async fn errors_use_the_form_shape() {
        let response =
            CheckoutError(ServiceError::MissingFields(vec!["name".into(), "phone".into()]))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "Missing fields: name, phone");
        assert_eq!(json["missingFields"][1], "phone");
    }

    #[tokio::test]
    async fn internal_detail_is_not_leaked() {
        let response = CheckoutError(ServiceError::InternalError("pool exhausted".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Internal server error");
    }
}
