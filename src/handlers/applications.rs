use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        application::{self, ApplicationStatus},
        invoice::{self, InvoiceKind, InvoiceStatus},
    },
    handlers::{actor_from, AppState},
    services::{
        invoices::IssueQuoteRequest,
        lifecycle::{ApplicationDetail, CreateDraftRequest, StatusChangeRequest},
    },
    ApiResponse, ApiResult,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct ApplicationSummary {
    pub id: Uuid,
    pub service_slug: String,
    pub status: ApplicationStatus,
    pub order_number: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<application::Model> for ApplicationSummary {
    fn from(model: application::Model) -> Self {
        Self {
            id: model.id,
            service_slug: model.service_slug,
            status: model.status,
            order_number: model.order_number,
            submitted_at: model.submitted_at,
            last_event_at: model.last_event_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InvoiceSummary {
    pub id: Uuid,
    pub application_id: Uuid,
    pub invoice_number: String,
    pub kind: InvoiceKind,
    #[schema(value_type = String, example = "450.00")]
    pub amount: Decimal,
    pub currency: String,
    pub status: InvoiceStatus,
    pub due_date: Option<DateTime<Utc>>,
}

impl From<invoice::Model> for InvoiceSummary {
    fn from(model: invoice::Model) -> Self {
        Self {
            id: model.id,
            application_id: model.application_id,
            invoice_number: model.invoice_number,
            kind: model.kind,
            amount: model.amount,
            currency: model.currency,
            status: model.status,
            due_date: model.due_date,
        }
    }
}

/// Create a draft application
#[utoipa::path(
    post,
    path = "/api/v1/applications/drafts",
    request_body = CreateDraftRequest,
    responses(
        (status = 201, description = "Draft created", body = crate::ApiResponse<ApplicationSummary>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown service", body = crate::errors::ErrorResponse)
    ),
    tag = "Applications"
)]
pub async fn create_draft(
    State(state): State<AppState>,
    Json(payload): Json<CreateDraftRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ApplicationSummary>>), crate::errors::ServiceError> {
    let draft = state.services.applications.create_draft(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ApplicationSummary::from(draft))),
    ))
}

/// Application with invoices and audit trail
#[utoipa::path(
    get,
    path = "/api/v1/applications/{id}",
    params(
        ("id" = Uuid, Path, description = "Application ID")
    ),
    responses(
        (status = 200, description = "Application detail", body = crate::ApiResponse<ApplicationDetail>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Applications"
)]
pub async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApplicationDetail> {
    let detail = state.services.applications.get_detail(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// Issue a quote invoice
#[utoipa::path(
    post,
    path = "/api/v1/applications/{id}/quote",
    params(
        ("id" = Uuid, Path, description = "Application ID")
    ),
    request_body = IssueQuoteRequest,
    responses(
        (status = 201, description = "Quote issued", body = crate::ApiResponse<InvoiceSummary>),
        (status = 400, description = "Application cannot be quoted", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Applications"
)]
pub async fn issue_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<IssueQuoteRequest>,
) -> Result<(StatusCode, Json<ApiResponse<InvoiceSummary>>), crate::errors::ServiceError> {
    let actor = actor_from(&headers);
    let quote = state.services.invoices.issue_quote(id, payload, &actor).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(InvoiceSummary::from(quote))),
    ))
}

/// Administrative status change
#[utoipa::path(
    post,
    path = "/api/v1/applications/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Application ID")
    ),
    request_body = StatusChangeRequest,
    responses(
        (status = 200, description = "Status changed", body = crate::ApiResponse<ApplicationSummary>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Changed concurrently", body = crate::errors::ErrorResponse)
    ),
    tag = "Applications"
)]
pub async fn change_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<StatusChangeRequest>,
) -> ApiResult<ApplicationSummary> {
    payload.validate()?;
    let actor = actor_from(&headers);
    let updated = state
        .services
        .applications
        .admin_transition(id, payload.status, payload.notes, &actor)
        .await?;
    Ok(Json(ApiResponse::success(ApplicationSummary::from(updated))))
}

pub fn application_routes() -> Router<AppState> {
    Router::new()
        .route("/drafts", post(create_draft))
        .route("/:id", get(get_application))
        .route("/:id/quote", post(issue_quote))
        .route("/:id/status", post(change_status))
}
