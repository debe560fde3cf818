use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    handlers::AppState,
    services::{
        account_linking::{LinkAccountRequest, LinkAccountResponse, PhoneRegistrationRequest},
        otp::{OtpIssued, OtpRequest, OtpVerifyRequest},
    },
    ApiResponse,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct OtpVerified {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PhoneAccount {
    pub user_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
}

/// Send a verification code by WhatsApp
#[utoipa::path(
    post,
    path = "/api/v1/auth/otp",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "Code sent", body = OtpIssued),
        (status = 400, description = "Invalid phone number", body = crate::errors::ErrorResponse),
        (status = 429, description = "Cooldown or lockout in effect", body = crate::errors::ErrorResponse,
            headers(("Retry-After" = String, description = "Seconds until a new request is allowed")))
    ),
    tag = "Auth"
)]
pub async fn request_otp(
    State(state): State<AppState>,
    Json(payload): Json<OtpRequest>,
) -> Result<Json<OtpIssued>, ServiceError> {
    let issued = state.services.otp.issue(&payload.phone).await?;
    Ok(Json(issued))
}

/// Check and consume a verification code
#[utoipa::path(
    post,
    path = "/api/v1/auth/otp/verify",
    request_body = OtpVerifyRequest,
    responses(
        (status = 200, description = "Code accepted", body = OtpVerified),
        (status = 400, description = "Wrong or expired code", body = crate::errors::ErrorResponse),
        (status = 429, description = "Too many wrong attempts", body = crate::errors::ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<OtpVerifyRequest>,
) -> Result<Json<OtpVerified>, ServiceError> {
    state
        .services
        .otp
        .verify(&payload.phone, &payload.code)
        .await?;
    Ok(Json(OtpVerified {
        success: true,
        message: "Phone number verified".to_string(),
    }))
}

/// Attach email/password credentials to a phone-only account
#[utoipa::path(
    post,
    path = "/api/v1/auth/link-account",
    request_body = LinkAccountRequest,
    responses(
        (status = 200, description = "Link outcome", body = LinkAccountResponse),
        (status = 400, description = "Missing OTP or invalid input", body = crate::errors::ErrorResponse),
        (status = 409, description = "Email already registered", body = crate::errors::ErrorResponse),
        (status = 429, description = "Too many wrong attempts", body = crate::errors::ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn link_account(
    State(state): State<AppState>,
    Json(payload): Json<LinkAccountRequest>,
) -> Result<Json<LinkAccountResponse>, ServiceError> {
    let outcome = state.services.account_linking.link(payload).await?;
    Ok(Json(outcome.into()))
}

/// Register an account identified only by a verified phone number
#[utoipa::path(
    post,
    path = "/api/v1/auth/phone-register",
    request_body = PhoneRegistrationRequest,
    responses(
        (status = 201, description = "Account created", body = crate::ApiResponse<PhoneAccount>),
        (status = 400, description = "Missing OTP or invalid input", body = crate::errors::ErrorResponse),
        (status = 409, description = "Phone already registered", body = crate::errors::ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn register_phone(
    State(state): State<AppState>,
    Json(payload): Json<PhoneRegistrationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PhoneAccount>>), ServiceError> {
    let user = state
        .services
        .account_linking
        .register_phone_account(payload)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(PhoneAccount {
            user_id: user.id,
            email: user.email,
            phone: user.phone,
        })),
    ))
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/otp", post(request_otp))
        .route("/otp/verify", post(verify_otp))
        .route("/link-account", post(link_account))
        .route("/phone-register", post(register_phone))
}
