use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        application::ApplicationStatus,
        application_event::EVENT_QUOTE_ISSUED,
        invoice::{self, Entity as Invoice, InvoiceKind, InvoiceStatus},
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    services::{
        lifecycle::{self, NewEvent},
        sequences::{self, DocumentScope},
    },
};

/// Attempts at a fresh invoice number before giving up
const MAX_NUMBER_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub application_id: Uuid,
    pub kind: InvoiceKind,
    pub amount: Decimal,
    pub currency: String,
    pub due_days: i64,
}

/// Inserts an invoice under a freshly issued number.
///
/// Each attempt runs in its own (nested) transaction so a number collision
/// can be retried even when the caller already holds a transaction.
pub async fn issue_invoice<C>(conn: &C, new: NewInvoice) -> Result<invoice::Model, ServiceError>
where
    C: ConnectionTrait + TransactionTrait,
{
    if new.amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "invoice amount must be positive".to_string(),
        ));
    }

    let status = match new.kind {
        InvoiceKind::Checkout => InvoiceStatus::Pending,
        InvoiceKind::Quote => InvoiceStatus::Quote,
    };

    for attempt in 1..=MAX_NUMBER_ATTEMPTS {
        let number = sequences::issue_number(conn, DocumentScope::Invoice).await?;
        let now = Utc::now();
        let model = invoice::ActiveModel {
            id: Set(Uuid::new_v4()),
            application_id: Set(new.application_id),
            invoice_number: Set(number.clone()),
            kind: Set(new.kind),
            amount: Set(new.amount),
            currency: Set(new.currency.clone()),
            status: Set(status),
            due_date: Set(Some(now + Duration::days(new.due_days))),
            payment_session_id: Set(None),
            payment_link: Set(None),
            gateway: Set(None),
            transaction_id: Set(None),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let txn = conn.begin().await?;
        match model.insert(&txn).await {
            Ok(created) => {
                txn.commit().await?;
                info!(invoice_id = %created.id, invoice_number = %number, "invoice issued");
                return Ok(created);
            }
            Err(e) if is_unique_violation(&e) => {
                txn.rollback().await?;
                warn!(invoice_number = %number, attempt, "invoice number collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    error!(application_id = %new.application_id, "could not allocate an invoice number");
    Err(ServiceError::Conflict(
        "Could not allocate a unique invoice number".to_string(),
    ))
}

pub async fn find_invoice<C>(conn: &C, id: Uuid) -> Result<invoice::Model, ServiceError>
where
    C: ConnectionTrait,
{
    Invoice::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", id)))
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct IssueQuoteRequest {
    #[schema(value_type = String, example = "450.00")]
    pub amount: Decimal,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct InvoiceService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    default_currency: String,
    due_days: i64,
}

impl InvoiceService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        default_currency: String,
        due_days: i64,
    ) -> Self {
        Self {
            db,
            event_sender,
            default_currency,
            due_days,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<invoice::Model, ServiceError> {
        find_invoice(&*self.db, id).await
    }

    /// Issues a quote invoice and moves the application to `quote_sent`.
    /// Any open quote from an earlier round is cancelled, not repriced.
    #[instrument(skip(self, request), fields(application_id = %application_id))]
    pub async fn issue_quote(
        &self,
        application_id: Uuid,
        request: IssueQuoteRequest,
        actor: &str,
    ) -> Result<invoice::Model, ServiceError> {
        request.validate()?;
        let currency = request
            .currency
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());

        let db = &*self.db;
        let txn = db.begin().await?;
        let application = lifecycle::find_application(&txn, application_id).await?;
        let quotable = [
            ApplicationStatus::Submitted,
            ApplicationStatus::Scoping,
            ApplicationStatus::QuoteSent,
        ];
        if !quotable.contains(&application.status) {
            return Err(ServiceError::InvalidTransition {
                from: application.status.to_string(),
                to: ApplicationStatus::QuoteSent.to_string(),
            });
        }

        let superseded = Invoice::update_many()
            .col_expr(invoice::Column::Status, Expr::value(InvoiceStatus::Cancelled.to_value()))
            .col_expr(invoice::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(invoice::Column::ApplicationId.eq(application_id))
            .filter(invoice::Column::Status.eq(InvoiceStatus::Quote.to_value()))
            .exec(&txn)
            .await?;

        let quote = issue_invoice(
            &txn,
            NewInvoice {
                application_id,
                kind: InvoiceKind::Quote,
                amount: request.amount,
                currency,
                due_days: self.due_days,
            },
        )
        .await?;

        if !lifecycle::transition_if(&txn, application_id, &quotable, ApplicationStatus::QuoteSent)
            .await?
        {
            return Err(ServiceError::Conflict(format!(
                "Application {} changed concurrently",
                application_id
            )));
        }

        let mut event = NewEvent::new(EVENT_QUOTE_ISSUED, actor).data(json!({
            "invoice_id": quote.id,
            "invoice_number": quote.invoice_number,
            "amount": quote.amount.to_string(),
            "currency": quote.currency,
            "superseded": superseded.rows_affected,
        }));
        if let Some(notes) = request.notes {
            event = event.notes(notes);
        }
        lifecycle::record_event(&txn, application_id, event).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::QuoteIssued {
                application_id,
                invoice_id: quote.id,
                amount: quote.amount,
            })
            .await;

        Ok(quote)
    }
}
