//! Best-effort customer notifications.
//!
//! Every send returns a [`NotificationOutcome`] that callers only log. A
//! failed email or WhatsApp message never fails the request that caused it.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    config::NotificationConfig,
    errors::ServiceError,
    tracing::{mask_email, mask_phone},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Sent,
    Failed(String),
    Skipped(String),
}

impl NotificationOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, NotificationOutcome::Sent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhatsAppMessage {
    pub to: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, message: EmailMessage) -> NotificationOutcome;
    async fn send_whatsapp(&self, message: WhatsAppMessage) -> NotificationOutcome;
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, message: EmailMessage) -> NotificationOutcome {
        info!(to = %mask_email(&message.to), subject = %message.subject, "email notification (log only)");
        debug!(body = %message.body, "email body");
        NotificationOutcome::Sent
    }

    async fn send_whatsapp(&self, message: WhatsAppMessage) -> NotificationOutcome {
        info!(to = %mask_phone(&message.to), "whatsapp notification (log only)");
        debug!(body = %message.body, "whatsapp body");
        NotificationOutcome::Sent
    }
}

/// Posts notifications as JSON to relay endpoints. A channel without an
/// endpoint is skipped.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    email_endpoint: Option<Url>,
    whatsapp_endpoint: Option<Url>,
    api_token: Option<String>,
}

impl HttpNotifier {
    pub fn new(config: &NotificationConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("notification client: {}", e)))?;

        Ok(Self {
            client,
            email_endpoint: parse_endpoint(config.email_endpoint.as_deref())?,
            whatsapp_endpoint: parse_endpoint(config.whatsapp_endpoint.as_deref())?,
            api_token: config.api_token.clone().filter(|t| !t.trim().is_empty()),
        })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        endpoint: Option<&Url>,
        channel: &str,
        payload: &T,
    ) -> NotificationOutcome {
        let Some(endpoint) = endpoint else {
            return NotificationOutcome::Skipped(format!("no {} endpoint configured", channel));
        };

        let mut request = self.client.post(endpoint.clone()).json(payload);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => NotificationOutcome::Sent,
            Ok(response) => {
                NotificationOutcome::Failed(format!("relay responded {}", response.status()))
            }
            Err(e) if e.is_timeout() => NotificationOutcome::Failed("relay timed out".to_string()),
            Err(e) => NotificationOutcome::Failed(e.to_string()),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_email(&self, message: EmailMessage) -> NotificationOutcome {
        self.post(self.email_endpoint.as_ref(), "email", &message).await
    }

    async fn send_whatsapp(&self, message: WhatsAppMessage) -> NotificationOutcome {
        self.post(self.whatsapp_endpoint.as_ref(), "whatsapp", &message)
            .await
    }
}

fn parse_endpoint(raw: Option<&str>) -> Result<Option<Url>, ServiceError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => Url::parse(s)
            .map(Some)
            .map_err(|e| ServiceError::ValidationError(format!("invalid notification endpoint '{}': {}", s, e))),
    }
}

/// Picks the HTTP relay when any endpoint is configured, else logs only.
pub fn notifier_from_config(config: &NotificationConfig) -> Result<Arc<dyn Notifier>, ServiceError> {
    if config.email_endpoint.is_some() || config.whatsapp_endpoint.is_some() {
        Ok(Arc::new(HttpNotifier::new(config)?))
    } else {
        Ok(Arc::new(LogNotifier))
    }
}

/// Everything staff need to resend a payment confirmation by hand
#[derive(Debug, Clone)]
pub struct PaymentNotice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub order_number: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub applicant_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl PaymentNotice {
    fn reference(&self) -> &str {
        self.order_number.as_deref().unwrap_or(&self.invoice_number)
    }
}

fn log_outcome(channel: &str, recipient: &str, notice: &PaymentNotice, outcome: &NotificationOutcome) {
    match outcome {
        NotificationOutcome::Sent => info!(
            channel,
            recipient,
            invoice_id = %notice.invoice_id,
            order_number = notice.reference(),
            "payment confirmation sent"
        ),
        NotificationOutcome::Failed(reason) => {
            counter!("servicehub.notifications.failed", 1, "channel" => channel.to_string());
            warn!(
                channel,
                recipient,
                invoice_id = %notice.invoice_id,
                order_number = notice.reference(),
                reason = %reason,
                "payment confirmation failed; resend manually"
            );
        }
        NotificationOutcome::Skipped(reason) => debug!(
            channel,
            invoice_id = %notice.invoice_id,
            reason = %reason,
            "payment confirmation skipped"
        ),
    }
}

/// Sends the email and WhatsApp confirmations independently.
pub async fn notify_payment_received(
    notifier: &dyn Notifier,
    notice: &PaymentNotice,
) -> Vec<(&'static str, NotificationOutcome)> {
    let greeting = notice
        .applicant_name
        .as_deref()
        .map(|n| format!("Hello {},", n))
        .unwrap_or_else(|| "Hello,".to_string());
    let summary = format!(
        "We received your payment of {} {} for order {}. Work on your request has started.",
        notice.amount.round_dp(2),
        notice.currency,
        notice.reference()
    );

    let mut outcomes = Vec::with_capacity(2);

    let email_outcome = match notice.email.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(email) => {
            let outcome = notifier
                .send_email(EmailMessage {
                    to: email.to_string(),
                    subject: format!("Payment received for {}", notice.reference()),
                    body: format!("{}\n\n{}", greeting, summary),
                })
                .await;
            log_outcome("email", &mask_email(email), notice, &outcome);
            outcome
        }
        None => NotificationOutcome::Skipped("no email on file".to_string()),
    };
    outcomes.push(("email", email_outcome));

    if let Some(phone) = notice.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        let outcome = notifier
            .send_whatsapp(WhatsAppMessage {
                to: phone.to_string(),
                body: summary.clone(),
            })
            .await;
        log_outcome("whatsapp", &mask_phone(phone), notice, &outcome);
        outcomes.push(("whatsapp", outcome));
    }

    outcomes
}
