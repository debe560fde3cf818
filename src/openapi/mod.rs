use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ServiceHub API",
        version = "1.0.0",
        description = r#"
# ServiceHub Service-Request API

Customers submit service requests, receive quotes, pay through an external
gateway and follow their request until it is completed.

## Features

- **Checkout**: priced requests are submitted and invoiced in one call
- **Quotes**: staff price custom requests and issue quote invoices
- **Payments**: hosted gateway sessions and signed gateway callbacks
- **Phone verification**: one-time codes by WhatsApp, rate limited
- **Account linking**: phone-only accounts gain email/password credentials

## Errors

Failures share one body shape; the checkout form keeps `{type, message}`.

```json
{
  "error": "Bad Request",
  "message": "Missing fields: name, phone",
  "details": "name,phone",
  "request_id": "2b1f...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

Rate-limited calls answer `429` with a `Retry-After` header.
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Request submission"),
        (name = "Applications", description = "Request lifecycle and staff actions"),
        (name = "Payments", description = "Payment sessions and gateway callbacks"),
        (name = "Auth", description = "Phone verification and account linking"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Checkout
        crate::handlers::checkout::submit_checkout,
        crate::handlers::checkout::submit_quote_request,

        // Applications
        crate::handlers::applications::create_draft,
        crate::handlers::applications::get_application,
        crate::handlers::applications::issue_quote,
        crate::handlers::applications::change_status,

        // Payments
        crate::handlers::payments::create_session,
        crate::handlers::payments::complete_placeholder,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::payment_webhooks::gateway_webhook,

        // Auth
        crate::handlers::auth::request_otp,
        crate::handlers::auth::verify_otp,
        crate::handlers::auth::link_account,
        crate::handlers::auth::register_phone,

        // Health
        crate::health::health_check,
        crate::health::readiness_check,
    ),
    components(
        schemas(
            crate::entities::application::ApplicationStatus,
            crate::entities::invoice::InvoiceStatus,
            crate::entities::invoice::InvoiceKind,
            crate::services::shipping::ShippingSelection,
            crate::services::lifecycle::AttachmentRef,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_public_route() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("ServiceHub API"));
        for path in [
            "/api/v1/checkout",
            "/api/v1/checkout/quote-request",
            "/api/v1/payments/session",
            "/api/v1/payments/webhook",
            "/api/v1/auth/otp",
            "/api/v1/auth/link-account",
            "/health",
        ] {
            assert!(json.contains(path), "missing {}", path);
        }
    }
}
