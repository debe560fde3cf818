//! Quote/checkout orchestration: validate, price, submit, invoice.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, DatabaseConnection, IntoActiveModel, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{validate_email, Validate};

use crate::{
    entities::{
        application::{self, ApplicationStatus},
        application_event::EVENT_SUBMITTED,
        invoice::InvoiceKind,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog,
        invoices::{issue_invoice, NewInvoice},
        lifecycle::{self, AttachmentRef, NewEvent},
        sequences::{self, DocumentScope},
        shipping::{ShippingCalculator, ShippingSelection},
    },
};

/// Checkout form as submitted. Required fields are optional here so that
/// every missing one can be reported at once.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    /// Resume this draft instead of creating a new application
    #[serde(alias = "applicationId")]
    pub application_id: Option<Uuid>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Catalog slug
    pub service: Option<String>,
    pub urgency: Option<String>,
    pub details: Option<String>,
    #[serde(default)]
    pub shipping: ShippingSelection,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(alias = "customerId")]
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
struct ValidCheckout {
    name: String,
    email: String,
    phone: String,
    service: String,
    urgency: String,
    details: String,
}

impl CheckoutRequest {
    fn required(&self) -> Result<ValidCheckout, ServiceError> {
        fn present(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        let fields = [
            ("name", present(&self.name)),
            ("email", present(&self.email)),
            ("phone", present(&self.phone)),
            ("service", present(&self.service)),
            ("urgency", present(&self.urgency)),
            ("details", present(&self.details)),
        ];
        let missing: Vec<String> = fields
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::MissingFields(missing));
        }

        let [name, email, phone, service, urgency, details] = fields.map(|(_, v)| v.unwrap_or_default());
        if !validate_email(email.as_str()) {
            return Err(ServiceError::ValidationError(format!("Invalid email '{}'", email)));
        }
        for attachment in &self.attachments {
            attachment.validate()?;
        }

        Ok(ValidCheckout {
            name,
            email,
            phone,
            service,
            urgency,
            details,
        })
    }
}

/// Result of a successful submission. `type` is always `success`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub application_id: Uuid,
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub order_number: String,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: String,
}

/// Result of a quote request. `type` is always `success`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequestResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub application_id: Uuid,
    pub order_number: String,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    calculator: ShippingCalculator,
    currency: String,
    due_days: i64,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        calculator: ShippingCalculator,
        currency: String,
        due_days: i64,
    ) -> Self {
        Self {
            db,
            event_sender,
            calculator,
            currency,
            due_days,
        }
    }

    /// Submits a checkout.
    ///
    /// The application is committed as `submitted` before the invoice is
    /// issued. If invoicing then fails the error is returned but the
    /// submission stands; a quote can be re-issued later.
    #[instrument(skip_all, fields(application_id = ?request.application_id, service = ?request.service))]
    pub async fn submit(&self, request: CheckoutRequest) -> Result<CheckoutResponse, ServiceError> {
        let form = request.required()?;
        let db = &*self.db;

        let (service, service_price) = catalog::resolve_price(db, &form.service).await?;
        let shipping_amount = self.calculator.shipping_amount(&request.shipping)?;
        let total = service_price + shipping_amount;

        let pricing = json!({
            "service_price": service_price.to_string(),
            "shipping_amount": shipping_amount.to_string(),
            "total": total.to_string(),
            "currency": self.currency,
        });
        let application = self
            .persist_submission(&request, &form, &service.slug, Some(pricing))
            .await?;

        let order_number = application.order_number.clone().unwrap_or_default();
        info!(application_id = %application.id, %order_number, %total, "application submitted");

        let invoice = issue_invoice(
            db,
            NewInvoice {
                application_id: application.id,
                kind: InvoiceKind::Checkout,
                amount: total,
                currency: self.currency.clone(),
                due_days: self.due_days,
            },
        )
        .await;

        let event_data = json!({
            "order_number": order_number,
            "total": total.to_string(),
            "invoice_id": invoice.as_ref().ok().map(|i| i.id),
        });
        lifecycle::record_event(
            db,
            application.id,
            NewEvent::new(EVENT_SUBMITTED, "customer").data(event_data),
        )
        .await?;

        let invoice = invoice.map_err(|e| {
            error!(
                application_id = %application.id,
                %order_number,
                error = %e,
                "application submitted but invoice creation failed"
            );
            e
        })?;

        self.event_sender
            .send_or_log(Event::ApplicationSubmitted {
                application_id: application.id,
                order_number: order_number.clone(),
                invoice_id: Some(invoice.id),
            })
            .await;

        Ok(CheckoutResponse {
            kind: "success".to_string(),
            message: format!("Request {} submitted", order_number),
            application_id: application.id,
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number,
            order_number,
            amount: invoice.amount,
            currency: invoice.currency,
        })
    }

    /// Submits a request that staff will price. No invoice is issued; the
    /// application waits in `submitted` for a quote.
    #[instrument(skip_all, fields(application_id = ?request.application_id, service = ?request.service))]
    pub async fn submit_quote_request(
        &self,
        request: CheckoutRequest,
    ) -> Result<QuoteRequestResponse, ServiceError> {
        let form = request.required()?;
        let db = &*self.db;
        let service = catalog::find_active(db, &form.service).await?;

        let application = self
            .persist_submission(&request, &form, &service.slug, None)
            .await?;
        let order_number = application.order_number.clone().unwrap_or_default();
        info!(application_id = %application.id, %order_number, "quote requested");

        lifecycle::record_event(
            db,
            application.id,
            NewEvent::new(EVENT_SUBMITTED, "customer").data(json!({
                "order_number": order_number,
                "quote_requested": true,
                "invoice_id": null,
            })),
        )
        .await?;

        self.event_sender
            .send_or_log(Event::ApplicationSubmitted {
                application_id: application.id,
                order_number: order_number.clone(),
                invoice_id: None,
            })
            .await;

        Ok(QuoteRequestResponse {
            kind: "success".to_string(),
            message: format!("Request {} received; a quote will follow", order_number),
            application_id: application.id,
            order_number,
        })
    }

    /// Moves a resumed draft, or a new row, to `submitted` with the full
    /// payload snapshot and an order number, in one transaction.
    async fn persist_submission(
        &self,
        request: &CheckoutRequest,
        form: &ValidCheckout,
        service_slug: &str,
        pricing: Option<serde_json::Value>,
    ) -> Result<application::Model, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let (existing, mut attachments) = match request.application_id {
            Some(id) => {
                let draft = lifecycle::find_application(&txn, id).await?;
                if draft.status != ApplicationStatus::Draft {
                    return Err(ServiceError::InvalidTransition {
                        from: draft.status.to_string(),
                        to: ApplicationStatus::Submitted.to_string(),
                    });
                }
                let stored: Vec<AttachmentRef> = draft
                    .payload
                    .get("attachments")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()?
                    .unwrap_or_default();
                (Some(draft), stored)
            }
            None => (None, Vec::new()),
        };
        for attachment in &request.attachments {
            if !attachments.contains(attachment) {
                attachments.push(attachment.clone());
            }
        }

        let mut payload = json!({
            "urgency": form.urgency,
            "details": form.details,
            "shipping": request.shipping,
            "attachments": attachments,
        });
        if let Some(pricing) = pricing {
            payload["pricing"] = pricing;
        }

        let application = match existing {
            Some(draft) => {
                let order_number = match draft.order_number.clone() {
                    Some(n) => n,
                    None => sequences::issue_number(&txn, DocumentScope::Order).await?,
                };
                if !lifecycle::transition_if(
                    &txn,
                    draft.id,
                    &[ApplicationStatus::Draft],
                    ApplicationStatus::Submitted,
                )
                .await?
                {
                    return Err(ServiceError::Conflict(format!(
                        "Application {} was already submitted",
                        draft.id
                    )));
                }
                let mut active = draft.into_active_model();
                active.status = Set(ApplicationStatus::Submitted);
                active.service_slug = Set(service_slug.to_string());
                active.applicant_name = Set(Some(form.name.clone()));
                active.applicant_email = Set(Some(form.email.clone()));
                active.applicant_phone = Set(Some(form.phone.clone()));
                active.payload = Set(payload);
                active.order_number = Set(Some(order_number));
                active.submitted_at = Set(Some(now));
                active.updated_at = Set(now);
                if request.customer_id.is_some() {
                    active.customer_id = Set(request.customer_id);
                }
                active.update(&txn).await?
            }
            None => {
                let order_number = sequences::issue_number(&txn, DocumentScope::Order).await?;
                application::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    service_slug: Set(service_slug.to_string()),
                    status: Set(ApplicationStatus::Submitted),
                    applicant_name: Set(Some(form.name.clone())),
                    applicant_email: Set(Some(form.email.clone())),
                    applicant_phone: Set(Some(form.phone.clone())),
                    customer_id: Set(request.customer_id),
                    payload: Set(payload),
                    order_number: Set(Some(order_number)),
                    submitted_at: Set(Some(now)),
                    last_event_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };
        txn.commit().await?;
        Ok(application)
    }
}
