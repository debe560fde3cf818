//! Webhook-driven settlement.
//!
//! Verification, normalization and amount checks happen before anything is
//! written. Settlement itself runs in one transaction keyed on the invoice
//! row, so repeated or concurrent deliveries converge on the same state.

use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveEnum, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::PaymentConfig,
    entities::{
        application::ApplicationStatus,
        application_event::{EVENT_PAYMENT_FAILED, EVENT_PAYMENT_RECEIVED},
        invoice::{self, Entity as Invoice, InvoiceStatus},
        payment::{self, Entity as Payment},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        invoices::find_invoice,
        lifecycle::{self, NewEvent},
        notifications::{notify_payment_received, Notifier, PaymentNotice},
        payment_gateway::{CallbackStatus, GatewayKind, NormalizedCallback},
        payment_sessions::is_placeholder_session,
    },
};

/// Largest tolerated difference between invoice and callback amounts
pub const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

const PLACEHOLDER_GATEWAY: &str = "placeholder";

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WebhookOutcome {
    pub success: bool,
    pub status: InvoiceStatus,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    #[serde(skip)]
    pub invoice_id: Uuid,
}

impl WebhookOutcome {
    fn applied(invoice_id: Uuid, status: InvoiceStatus) -> Self {
        Self {
            success: true,
            status,
            duplicate: false,
            invoice_id,
        }
    }

    fn duplicate(invoice_id: Uuid, status: InvoiceStatus) -> Self {
        Self {
            success: true,
            status,
            duplicate: true,
            invoice_id,
        }
    }
}

fn reject(reason: &'static str, err: ServiceError) -> ServiceError {
    counter!("servicehub.webhook.rejected", 1, "reason" => reason);
    err
}

#[derive(Clone)]
pub struct PaymentWebhookProcessor {
    db: Arc<DatabaseConnection>,
    config: PaymentConfig,
    hardened: bool,
    notifier: Arc<dyn Notifier>,
    event_sender: EventSender,
}

impl PaymentWebhookProcessor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: PaymentConfig,
        hardened: bool,
        notifier: Arc<dyn Notifier>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            config,
            hardened,
            notifier,
            event_sender,
        }
    }

    /// Handles one raw callback. `gateway` overrides the configured type.
    #[instrument(skip_all, fields(gateway = tracing::field::Empty))]
    pub async fn process(
        &self,
        gateway: Option<GatewayKind>,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookOutcome, ServiceError> {
        let gateway = gateway.unwrap_or(self.config.gateway);
        tracing::Span::current().record("gateway", gateway.as_str());
        counter!("servicehub.webhook.received", 1, "gateway" => gateway.as_str());

        match self.config.webhook_secret() {
            Some(secret) => gateway
                .verify_signature(
                    headers,
                    body,
                    secret,
                    self.config.webhook_tolerance_secs,
                    Utc::now().timestamp(),
                )
                .map_err(|e| {
                    warn!(error = %e, "webhook signature rejected");
                    reject("signature", e.into())
                })?,
            None if self.hardened => {
                warn!("webhook secret not configured; refusing unsigned callback");
                return Err(reject(
                    "unsigned",
                    ServiceError::Unauthorized("Webhook signing is not configured".to_string()),
                ));
            }
            None => warn!("accepting unsigned webhook outside production"),
        }

        let raw: Value = serde_json::from_slice(body).map_err(|e| {
            reject("payload", ServiceError::BadRequest(format!("Invalid JSON body: {}", e)))
        })?;
        let callback = gateway
            .normalize(&raw)
            .map_err(|e| reject("payload", e))?;

        self.settle(gateway.as_str(), callback, raw).await
    }

    /// Settles a placeholder session as paid through the same path a
    /// gateway callback takes. Refused in production.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn complete_placeholder_payment(
        &self,
        invoice_id: Uuid,
    ) -> Result<WebhookOutcome, ServiceError> {
        if self.hardened {
            return Err(ServiceError::Forbidden(
                "Placeholder payments are disabled in production".to_string(),
            ));
        }

        let invoice = find_invoice(&*self.db, invoice_id).await?;
        let session_id = invoice
            .payment_session_id
            .clone()
            .filter(|s| is_placeholder_session(s))
            .ok_or_else(|| {
                ServiceError::BadRequest("Invoice has no placeholder payment session".to_string())
            })?;

        let callback = NormalizedCallback {
            invoice_id,
            transaction_id: session_id,
            amount: invoice.amount,
            status: CallbackStatus::Paid,
            currency: None,
        };
        self.settle(PLACEHOLDER_GATEWAY, callback, json!({ "placeholder": true }))
            .await
    }

    async fn settle(
        &self,
        gateway: &str,
        callback: NormalizedCallback,
        raw: Value,
    ) -> Result<WebhookOutcome, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let invoice = Invoice::find_by_id(callback.invoice_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                reject(
                    "unknown_invoice",
                    ServiceError::NotFound(format!("Invoice {} not found", callback.invoice_id)),
                )
            })?;

        if (invoice.amount - callback.amount).abs() > AMOUNT_TOLERANCE {
            warn!(
                invoice_id = %invoice.id,
                expected = %invoice.amount,
                received = %callback.amount,
                "webhook amount mismatch"
            );
            return Err(reject(
                "amount_mismatch",
                ServiceError::AmountMismatch {
                    expected: invoice.amount,
                    received: callback.amount,
                },
            ));
        }
        if let Some(currency) = &callback.currency {
            if !currency.eq_ignore_ascii_case(&invoice.currency) {
                return Err(reject(
                    "currency_mismatch",
                    ServiceError::BadRequest(format!(
                        "Currency {} does not match invoice currency {}",
                        currency, invoice.currency
                    )),
                ));
            }
        }

        // Paid is final; replays and late failures are acknowledged, not applied
        if invoice.status == InvoiceStatus::Paid {
            info!(invoice_id = %invoice.id, transaction_id = %callback.transaction_id, "invoice already paid");
            counter!("servicehub.webhook.duplicate", 1);
            return Ok(WebhookOutcome::duplicate(invoice.id, InvoiceStatus::Paid));
        }
        if invoice.status == InvoiceStatus::Cancelled {
            return Err(reject(
                "cancelled_invoice",
                ServiceError::BadRequest(format!("Invoice {} is cancelled", invoice.invoice_number)),
            ));
        }

        let now = Utc::now();
        let target = match callback.status {
            CallbackStatus::Paid => InvoiceStatus::Paid,
            CallbackStatus::Failed => InvoiceStatus::Failed,
            CallbackStatus::Pending => InvoiceStatus::Pending,
        };
        if invoice.status == target && invoice.transaction_id.as_deref() == Some(callback.transaction_id.as_str()) {
            counter!("servicehub.webhook.duplicate", 1);
            return Ok(WebhookOutcome::duplicate(invoice.id, target));
        }

        let paid_at = (target == InvoiceStatus::Paid).then_some(now);
        let updated = Invoice::update_many()
            .col_expr(invoice::Column::Status, Expr::value(target.to_value()))
            .col_expr(invoice::Column::TransactionId, Expr::value(callback.transaction_id.clone()))
            .col_expr(invoice::Column::Gateway, Expr::value(gateway))
            .col_expr(invoice::Column::PaidAt, Expr::value(paid_at))
            .col_expr(invoice::Column::UpdatedAt, Expr::value(now))
            .filter(invoice::Column::Id.eq(invoice.id))
            .filter(invoice::Column::Status.is_in([
                InvoiceStatus::Pending.to_value(),
                InvoiceStatus::Quote.to_value(),
                InvoiceStatus::Failed.to_value(),
            ]))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            // another delivery won the race between our read and write
            let current = find_invoice(&txn, invoice.id).await?;
            counter!("servicehub.webhook.duplicate", 1);
            return Ok(WebhookOutcome::duplicate(invoice.id, current.status));
        }

        let application = lifecycle::find_application(&txn, invoice.application_id).await?;

        match target {
            InvoiceStatus::Paid => {
                let inserted = Payment::insert(payment::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    invoice_id: Set(invoice.id),
                    gateway: Set(gateway.to_string()),
                    transaction_id: Set(callback.transaction_id.clone()),
                    amount: Set(callback.amount),
                    currency: Set(invoice.currency.clone()),
                    status: Set(CallbackStatus::Paid.to_string()),
                    raw_response: Set(raw),
                    created_at: Set(now),
                })
                .on_conflict(
                    OnConflict::columns([payment::Column::Gateway, payment::Column::TransactionId])
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
                if inserted == 0 {
                    warn!(transaction_id = %callback.transaction_id, "payment row already recorded for transaction");
                }

                let advanced = lifecycle::transition_if(
                    &txn,
                    application.id,
                    &[ApplicationStatus::Submitted, ApplicationStatus::QuoteSent],
                    ApplicationStatus::InProgress,
                )
                .await?;
                if !advanced {
                    warn!(
                        application_id = %application.id,
                        status = %application.status,
                        "payment settled but application not advanced"
                    );
                }

                lifecycle::record_event(
                    &txn,
                    application.id,
                    NewEvent::new(EVENT_PAYMENT_RECEIVED, format!("gateway:{}", gateway)).data(json!({
                        "invoice_id": invoice.id,
                        "invoice_number": invoice.invoice_number,
                        "transaction_id": callback.transaction_id,
                        "amount": callback.amount.to_string(),
                        "gateway": gateway,
                    })),
                )
                .await?;
                txn.commit().await?;

                counter!("servicehub.webhook.settled", 1, "gateway" => gateway.to_string());
                info!(invoice_id = %invoice.id, application_id = %application.id, "payment settled");

                self.event_sender
                    .send_or_log(Event::PaymentSettled {
                        invoice_id: invoice.id,
                        application_id: application.id,
                        transaction_id: callback.transaction_id.clone(),
                        amount: callback.amount,
                        paid_at: now,
                    })
                    .await;

                notify_payment_received(
                    self.notifier.as_ref(),
                    &PaymentNotice {
                        invoice_id: invoice.id,
                        invoice_number: invoice.invoice_number.clone(),
                        order_number: application.order_number.clone(),
                        amount: invoice.amount,
                        currency: invoice.currency.clone(),
                        applicant_name: application.applicant_name.clone(),
                        email: application.applicant_email.clone(),
                        phone: application.applicant_phone.clone(),
                    },
                )
                .await;
            }
            InvoiceStatus::Failed => {
                lifecycle::record_event(
                    &txn,
                    application.id,
                    NewEvent::new(EVENT_PAYMENT_FAILED, format!("gateway:{}", gateway)).data(json!({
                        "invoice_id": invoice.id,
                        "transaction_id": callback.transaction_id,
                    })),
                )
                .await?;
                txn.commit().await?;

                warn!(invoice_id = %invoice.id, "payment failed");
                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        invoice_id: invoice.id,
                        transaction_id: Some(callback.transaction_id),
                    })
                    .await;
            }
            _ => {
                txn.commit().await?;
                info!(invoice_id = %invoice.id, "payment pending");
            }
        }

        Ok(WebhookOutcome::applied(invoice.id, target))
    }
}
