pub mod applications;
pub mod auth;
pub mod checkout;
pub mod payment_webhooks;
pub mod payments;

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        account_linking::AccountLinkingService,
        checkout::CheckoutService,
        invoices::InvoiceService,
        lifecycle::ApplicationService,
        notifications::Notifier,
        otp::OtpService,
        payment_sessions::PaymentSessionService,
        payment_webhooks::PaymentWebhookProcessor,
        shipping::ShippingCalculator,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Header naming the staff member behind an administrative call
pub const ACTOR_HEADER: &str = "x-actor";

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub applications: Arc<ApplicationService>,
    pub invoices: Arc<InvoiceService>,
    pub payment_sessions: Arc<PaymentSessionService>,
    pub webhooks: Arc<PaymentWebhookProcessor>,
    pub otp: Arc<OtpService>,
    pub account_linking: Arc<AccountLinkingService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        event_sender: EventSender,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ServiceError> {
        let due_days = config.payment.invoice_due_days;
        let currency = config.default_currency.clone();

        let checkout = CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            ShippingCalculator::new(config.shipping.clone()),
            currency.clone(),
            due_days,
        );
        let applications = ApplicationService::new(db_pool.clone(), event_sender.clone());
        let invoices = InvoiceService::new(db_pool.clone(), event_sender.clone(), currency, due_days);
        let payment_sessions = PaymentSessionService::new(
            db_pool.clone(),
            config.payment.clone(),
            config.public_base_url(),
        )?;
        let webhooks = PaymentWebhookProcessor::new(
            db_pool.clone(),
            config.payment.clone(),
            config.is_production(),
            notifier.clone(),
            event_sender.clone(),
        );
        let otp = OtpService::new(db_pool.clone(), config.otp.clone(), notifier);
        let account_linking =
            AccountLinkingService::new(db_pool, otp.clone(), event_sender);

        Ok(Self {
            checkout: Arc::new(checkout),
            applications: Arc::new(applications),
            invoices: Arc::new(invoices),
            payment_sessions: Arc::new(payment_sessions),
            webhooks: Arc::new(webhooks),
            otp: Arc::new(otp),
            account_linking: Arc::new(account_linking),
        })
    }
}

/// Name recorded on audit entries for administrative calls.
pub(crate) fn actor_from(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("admin")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn actor_defaults_to_admin() {
        let mut headers = HeaderMap::new();
        assert_eq!(actor_from(&headers), "admin");
        headers.insert(ACTOR_HEADER, HeaderValue::from_static(" nadia "));
        assert_eq!(actor_from(&headers), "nadia");
    }
}
