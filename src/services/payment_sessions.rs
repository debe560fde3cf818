//! Hosted-checkout session creation.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::PaymentConfig,
    entities::invoice::{self, Entity as Invoice},
    errors::ServiceError,
    services::{
        invoices::find_invoice, payment_gateway::GatewayKind,
        payment_webhooks::AMOUNT_TOLERANCE,
    },
};

/// Session ids issued without a gateway start with this prefix.
pub const PLACEHOLDER_SESSION_PREFIX: &str = "placeholder_";

const STRIPE_API_BASE: &str = "https://api.stripe.com";
const PAYMOB_API_BASE: &str = "https://accept.paymob.com";

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub invoice_id: Uuid,
    #[schema(value_type = String, example = "125.00")]
    pub amount: Decimal,
    #[validate(length(equal = 3))]
    pub currency: String,
    pub order_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub success: bool,
    pub payment_url: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub placeholder: bool,
}

pub fn is_placeholder_session(session_id: &str) -> bool {
    session_id.starts_with(PLACEHOLDER_SESSION_PREFIX)
}

/// Converts a major-unit amount to integer minor units (cents). Half cents
/// round to the even cent.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::PaymentSessionFailed(format!("amount {} out of range", amount)))
}

#[derive(Clone)]
pub struct PaymentSessionService {
    db: Arc<DatabaseConnection>,
    config: PaymentConfig,
    public_base_url: String,
    client: reqwest::Client,
}

impl PaymentSessionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: PaymentConfig,
        public_base_url: String,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("payment client: {}", e)))?;

        Ok(Self {
            db,
            config,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Creates a session for an open invoice and stores its reference on the invoice.
    /// Gateway failures are terminal; nothing is retried here.
    #[instrument(skip_all, fields(invoice_id = %request.invoice_id, gateway = %self.config.gateway))]
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        request.validate()?;
        let db = &*self.db;
        let invoice = find_invoice(db, request.invoice_id).await?;

        if !invoice.status.is_payable() {
            return Err(ServiceError::Conflict(format!(
                "Invoice {} is {}",
                invoice.invoice_number, invoice.status
            )));
        }
        if (invoice.amount - request.amount).abs() > AMOUNT_TOLERANCE {
            return Err(ServiceError::AmountMismatch {
                expected: invoice.amount,
                received: request.amount,
            });
        }
        if !invoice.currency.eq_ignore_ascii_case(&request.currency) {
            return Err(ServiceError::BadRequest(format!(
                "Currency {} does not match invoice currency {}",
                request.currency, invoice.currency
            )));
        }

        let reference = request
            .order_number
            .clone()
            .unwrap_or_else(|| invoice.invoice_number.clone());

        let (session, gateway_name) = if self.config.uses_placeholder() {
            (self.placeholder_session(&invoice), "placeholder")
        } else {
            let session = match self.config.gateway {
                GatewayKind::Stripe => self.stripe_session(&invoice, &reference).await?,
                GatewayKind::Paymob => self.paymob_session(&invoice, &reference).await?,
                GatewayKind::Generic => self.placeholder_session(&invoice),
            };
            (session, self.config.gateway.as_str())
        };

        Invoice::update_many()
            .col_expr(invoice::Column::PaymentSessionId, Expr::value(session.session_id.clone()))
            .col_expr(invoice::Column::PaymentLink, Expr::value(session.payment_url.clone()))
            .col_expr(invoice::Column::Gateway, Expr::value(gateway_name))
            .col_expr(invoice::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(invoice::Column::Id.eq(invoice.id))
            .exec(db)
            .await?;

        info!(
            session_id = %session.session_id,
            placeholder = session.placeholder,
            "payment session created"
        );
        Ok(session)
    }

    fn placeholder_session(&self, invoice: &invoice::Model) -> PaymentSession {
        let session_id = format!("{}{}", PLACEHOLDER_SESSION_PREFIX, Uuid::new_v4().simple());
        PaymentSession {
            success: true,
            payment_url: format!(
                "{}/payments/placeholder?invoice={}&session={}",
                self.public_base_url, invoice.id, session_id
            ),
            session_id,
            placeholder: true,
        }
    }

    fn api_base(&self, default: &str) -> String {
        self.config
            .api_base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    fn api_key(&self) -> Result<&str, ServiceError> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ServiceError::PaymentSessionFailed("gateway api key missing".into()))
    }

    async fn stripe_session(
        &self,
        invoice: &invoice::Model,
        reference: &str,
    ) -> Result<PaymentSession, ServiceError> {
        let cents = to_minor_units(invoice.amount)?.to_string();
        let invoice_id = invoice.id.to_string();
        let success_url = format!(
            "{}/payments/success?invoice={}",
            self.public_base_url, invoice.id
        );
        let cancel_url = format!(
            "{}/payments/cancelled?invoice={}",
            self.public_base_url, invoice.id
        );
        let currency = invoice.currency.to_ascii_lowercase();
        let form = [
            ("mode", "payment"),
            ("client_reference_id", invoice_id.as_str()),
            ("metadata[invoice_id]", invoice_id.as_str()),
            ("payment_intent_data[metadata][invoice_id]", invoice_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", currency.as_str()),
            ("line_items[0][price_data][unit_amount]", cents.as_str()),
            ("line_items[0][price_data][product_data][name]", reference),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
        ];

        let url = format!("{}/v1/checkout/sessions", self.api_base(STRIPE_API_BASE));
        let body = self
            .send(self.client.post(url).bearer_auth(self.api_key()?).form(&form))
            .await?;

        let session_id = string_field(&body, "/id")?;
        let payment_url = string_field(&body, "/url")?;
        Ok(PaymentSession {
            success: true,
            payment_url,
            session_id,
            placeholder: false,
        })
    }

    async fn paymob_session(
        &self,
        invoice: &invoice::Model,
        reference: &str,
    ) -> Result<PaymentSession, ServiceError> {
        let integration_id = self
            .config
            .integration_id
            .as_deref()
            .and_then(|id| id.trim().parse::<i64>().ok())
            .ok_or_else(|| ServiceError::PaymentSessionFailed("paymob integration id missing".into()))?;
        let public_key = self
            .config
            .public_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ServiceError::PaymentSessionFailed("paymob public key missing".into()))?;

        let cents = to_minor_units(invoice.amount)?;
        let base = self.api_base(PAYMOB_API_BASE);
        let payload = json!({
            "amount": cents,
            "currency": invoice.currency,
            "payment_methods": [integration_id],
            "items": [{
                "name": reference,
                "amount": cents,
                "quantity": 1
            }],
            "special_reference": invoice.id.to_string(),
            "notification_url": format!("{}/api/v1/payments/webhook/paymob", self.public_base_url),
            "redirection_url": format!("{}/payments/success?invoice={}", self.public_base_url, invoice.id),
        });

        let body = self
            .send(
                self.client
                    .post(format!("{}/v1/intention/", base))
                    .header("Authorization", format!("Token {}", self.api_key()?))
                    .json(&payload),
            )
            .await?;

        let client_secret = string_field(&body, "/client_secret")?;
        let session_id = body
            .get("id")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| client_secret.clone());

        Ok(PaymentSession {
            success: true,
            payment_url: format!(
                "{}/unifiedcheckout/?publicKey={}&clientSecret={}",
                base, public_key, client_secret
            ),
            session_id,
            placeholder: false,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ServiceError> {
        let response = request.send().await.map_err(|e| {
            error!(error = %e, timeout = e.is_timeout(), "payment gateway request failed");
            ServiceError::PaymentSessionFailed(if e.is_timeout() {
                "gateway timed out".to_string()
            } else {
                "gateway unreachable".to_string()
            })
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, detail = %detail.chars().take(500).collect::<String>(), "payment gateway rejected session");
            return Err(ServiceError::PaymentSessionFailed(format!(
                "gateway responded {}",
                status
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ServiceError::PaymentSessionFailed(format!("unreadable gateway response: {}", e)))
    }
}

fn string_field(body: &Value, pointer: &str) -> Result<String, ServiceError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ServiceError::PaymentSessionFailed(format!(
                "gateway response missing {}",
                pointer.trim_start_matches('/')
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entities::invoice::InvoiceStatus, test_support};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use wiremock::{
        matchers::{body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn payment_config(gateway: GatewayKind, base: Option<String>) -> PaymentConfig {
        PaymentConfig {
            gateway,
            api_key: Some("sk_test_123".into()),
            public_key: Some("egy_pk_test".into()),
            integration_id: Some("4455".into()),
            api_base_url: base,
            request_timeout_secs: 2,
            ..Default::default()
        }
    }

    fn request(invoice: &invoice::Model) -> CreateSessionRequest {
        CreateSessionRequest {
            invoice_id: invoice.id,
            amount: invoice.amount,
            currency: invoice.currency.clone(),
            order_number: Some("ORD-20240301-001".into()),
        }
    }

    #[test]
    fn minor_units_round_half_cents_to_even() {
        assert_eq!(to_minor_units(dec!(125)).unwrap(), 12500);
        assert_eq!(to_minor_units(dec!(19.99)).unwrap(), 1999);
        assert_eq!(to_minor_units(dec!(0.005)).unwrap(), 0);
        assert_eq!(to_minor_units(dec!(0.015)).unwrap(), 2);
        assert_eq!(to_minor_units(dec!(125.125)).unwrap(), 12512);
        assert_eq!(to_minor_units(dec!(125.1251)).unwrap(), 12513);
    }

    #[tokio::test]
    async fn placeholder_mode_needs_no_gateway() {
        let db = test_support::memory_db().await;
        let invoice = test_support::seed_invoice(&db, dec!(125)).await;
        let service = PaymentSessionService::new(
            db.clone(),
            PaymentConfig::default(),
            "http://localhost:8080".into(),
        )
        .unwrap();

        let session = service.create_session(request(&invoice)).await.unwrap();
        assert!(session.placeholder);
        assert!(is_placeholder_session(&session.session_id));
        assert!(session.payment_url.starts_with("http://localhost:8080/payments/placeholder"));

        let stored = find_invoice(&*db, invoice.id).await.unwrap();
        assert_eq!(stored.payment_session_id, Some(session.session_id));
        assert_eq!(stored.gateway.as_deref(), Some("placeholder"));
    }

    #[tokio::test]
    async fn stripe_session_is_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(body_string_contains("unit_amount%5D=12500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_abc",
                "url": "https://checkout.stripe.com/c/pay/cs_test_abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let db = test_support::memory_db().await;
        let invoice = test_support::seed_invoice(&db, dec!(125)).await;
        let service = PaymentSessionService::new(
            db.clone(),
            payment_config(GatewayKind::Stripe, Some(server.uri())),
            "https://servicehub.example".into(),
        )
        .unwrap();

        let session = service.create_session(request(&invoice)).await.unwrap();
        assert_eq!(session.session_id, "cs_test_abc");
        assert!(!session.placeholder);

        let stored = find_invoice(&*db, invoice.id).await.unwrap();
        assert_eq!(stored.payment_link.as_deref(), Some("https://checkout.stripe.com/c/pay/cs_test_abc"));
        assert_eq!(stored.gateway.as_deref(), Some("stripe"));
    }

    #[tokio::test]
    async fn paymob_session_builds_checkout_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/intention/"))
            .and(header("authorization", "Token sk_test_123"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pi_test_77",
                "client_secret": "egy_csk_test_secret"
            })))
            .mount(&server)
            .await;

        let db = test_support::memory_db().await;
        let invoice = test_support::seed_invoice(&db, dec!(300)).await;
        let service = PaymentSessionService::new(
            db.clone(),
            payment_config(GatewayKind::Paymob, Some(server.uri())),
            "https://servicehub.example".into(),
        )
        .unwrap();

        let session = service.create_session(request(&invoice)).await.unwrap();
        assert_eq!(session.session_id, "pi_test_77");
        assert!(session.payment_url.contains("clientSecret=egy_csk_test_secret"));
        assert!(session.payment_url.contains("publicKey=egy_pk_test"));
    }

    #[tokio::test]
    async fn gateway_failure_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let db = test_support::memory_db().await;
        let invoice = test_support::seed_invoice(&db, dec!(125)).await;
        let service = PaymentSessionService::new(
            db.clone(),
            payment_config(GatewayKind::Stripe, Some(server.uri())),
            "https://servicehub.example".into(),
        )
        .unwrap();

        assert_matches!(
            service.create_session(request(&invoice)).await,
            Err(ServiceError::PaymentSessionFailed(_))
        );
        let stored = find_invoice(&*db, invoice.id).await.unwrap();
        assert!(stored.payment_session_id.is_none());
    }

    #[tokio::test]
    async fn mismatched_amount_and_paid_invoice_are_refused() {
        let db = test_support::memory_db().await;
        let invoice = test_support::seed_invoice(&db, dec!(125)).await;
        let service = PaymentSessionService::new(
            db.clone(),
            PaymentConfig::default(),
            "http://localhost".into(),
        )
        .unwrap();

        let mut wrong = request(&invoice);
        wrong.amount = dec!(99);
        assert_matches!(
            service.create_session(wrong).await,
            Err(ServiceError::AmountMismatch { .. })
        );

        test_support::set_invoice_status(&db, invoice.id, InvoiceStatus::Paid).await;
        assert_matches!(
            service.create_session(request(&invoice)).await,
            Err(ServiceError::Conflict(_))
        );
    }
}
