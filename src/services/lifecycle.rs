//! Application state machine and audit trail.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        application::{self, ApplicationStatus, Entity as Application},
        application_event::{self, Entity as ApplicationEvent, EVENT_DRAFT_CREATED, EVENT_STATUS_CHANGED},
        invoice::{self, Entity as Invoice},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog,
};

/// Whether the graph allows `from -> to`.
pub fn is_valid_transition(from: ApplicationStatus, to: ApplicationStatus) -> bool {
    use ApplicationStatus::*;

    match (from, to) {
        (Draft, Submitted) => true,
        (Submitted, Scoping | QuoteSent | InProgress) => true,
        (Scoping, QuoteSent) => true,
        // re-quote
        (QuoteSent, QuoteSent) => true,
        (QuoteSent, InProgress) => true,
        (InProgress, Review) => true,
        (Review, Completed) => true,
        (Completed | Rejected | Cancelled, Archived) => true,
        (from, Rejected | Cancelled | Archived) => !from.is_terminal(),
        _ => false,
    }
}

/// Targets reachable through the administrative endpoint. Submission,
/// quoting and payment each have their own path.
pub fn admin_may_target(to: ApplicationStatus) -> bool {
    use ApplicationStatus::*;
    matches!(
        to,
        Scoping | Review | Completed | Rejected | Cancelled | Archived
    )
}

/// Audit entry to append
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: &'static str,
    pub notes: Option<String>,
    pub data: Option<serde_json::Value>,
    pub actor: String,
}

impl NewEvent {
    pub fn new(event_type: &'static str, actor: impl Into<String>) -> Self {
        Self {
            event_type,
            notes: None,
            data: None,
            actor: actor.into(),
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Appends an audit entry and bumps the application's `last_event_at`.
pub async fn record_event<C>(
    conn: &C,
    application_id: Uuid,
    event: NewEvent,
) -> Result<application_event::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let model = application_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        application_id: Set(application_id),
        event_type: Set(event.event_type.to_string()),
        notes: Set(event.notes),
        data: Set(event.data),
        actor: Set(event.actor),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;

    Application::update_many()
        .col_expr(application::Column::LastEventAt, Expr::value(now))
        .filter(application::Column::Id.eq(application_id))
        .exec(conn)
        .await?;

    Ok(model)
}

/// Compare-and-update of the status column. Returns false when the row was
/// not in any of `allowed_from`, leaving it untouched.
pub async fn transition_if<C>(
    conn: &C,
    application_id: Uuid,
    allowed_from: &[ApplicationStatus],
    to: ApplicationStatus,
) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    debug_assert!(allowed_from.iter().all(|from| is_valid_transition(*from, to)));

    let result = Application::update_many()
        .col_expr(application::Column::Status, Expr::value(to.to_value()))
        .col_expr(application::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(application::Column::Id.eq(application_id))
        .filter(application::Column::Status.is_in(allowed_from.iter().map(|s| s.to_value())))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

pub async fn find_application<C>(conn: &C, id: Uuid) -> Result<application::Model, ServiceError>
where
    C: ConnectionTrait,
{
    Application::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Application {} not found", id)))
}

/// Reference to an already-stored upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct AttachmentRef {
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    #[validate(length(min = 1, max = 1024))]
    pub storage_path: String,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateDraftRequest {
    #[validate(length(min = 1, max = 128))]
    pub service_slug: String,
    pub applicant_name: Option<String>,
    #[validate(email)]
    pub applicant_email: Option<String>,
    pub applicant_phone: Option<String>,
    #[serde(default)]
    #[validate]
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct StatusChangeRequest {
    pub status: ApplicationStatus,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Application with its invoices and audit trail, oldest first
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApplicationDetail {
    #[schema(value_type = Object)]
    pub application: application::Model,
    #[schema(value_type = Vec<Object>)]
    pub invoices: Vec<invoice::Model>,
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<application_event::Model>,
}

#[derive(Clone)]
pub struct ApplicationService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ApplicationService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates a `draft` application, typically on the first file upload.
    #[instrument(skip(self, request), fields(service = %request.service_slug))]
    pub async fn create_draft(
        &self,
        request: CreateDraftRequest,
    ) -> Result<application::Model, ServiceError> {
        request.validate()?;
        let db = &*self.db;
        catalog::find_active(db, &request.service_slug).await?;

        let now = Utc::now();
        let txn = db.begin().await?;
        let draft = application::ActiveModel {
            id: Set(Uuid::new_v4()),
            service_slug: Set(request.service_slug),
            status: Set(ApplicationStatus::Draft),
            applicant_name: Set(request.applicant_name),
            applicant_email: Set(request.applicant_email),
            applicant_phone: Set(request.applicant_phone),
            customer_id: Set(None),
            payload: Set(json!({ "attachments": request.attachments })),
            order_number: Set(None),
            submitted_at: Set(None),
            last_event_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        record_event(&txn, draft.id, NewEvent::new(EVENT_DRAFT_CREATED, "customer")).await?;
        txn.commit().await?;

        info!(application_id = %draft.id, "draft application created");
        find_application(db, draft.id).await
    }

    pub async fn get_detail(&self, id: Uuid) -> Result<ApplicationDetail, ServiceError> {
        let db = &*self.db;
        let application = find_application(db, id).await?;
        let invoices = Invoice::find()
            .filter(invoice::Column::ApplicationId.eq(id))
            .order_by_asc(invoice::Column::CreatedAt)
            .all(db)
            .await?;
        let events = ApplicationEvent::find()
            .filter(application_event::Column::ApplicationId.eq(id))
            .order_by_asc(application_event::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(ApplicationDetail {
            application,
            invoices,
            events,
        })
    }

    /// Administrative transition, validated against the status graph.
    #[instrument(skip_all, fields(application_id = %id, to = %to))]
    pub async fn admin_transition(
        &self,
        id: Uuid,
        to: ApplicationStatus,
        notes: Option<String>,
        actor: &str,
    ) -> Result<application::Model, ServiceError> {
        if !admin_may_target(to) {
            return Err(ServiceError::BadRequest(format!(
                "Status '{}' cannot be set directly",
                to
            )));
        }

        let db = &*self.db;
        let txn = db.begin().await?;
        let current = find_application(&txn, id).await?;
        let from = current.status;
        if !is_valid_transition(from, to) {
            warn!(%from, %to, "rejected status transition");
            return Err(ServiceError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if !transition_if(&txn, id, &[from], to).await? {
            return Err(ServiceError::Conflict(format!(
                "Application {} changed concurrently",
                id
            )));
        }

        let mut event = NewEvent::new(EVENT_STATUS_CHANGED, actor)
            .data(json!({ "from": from.to_string(), "to": to.to_string() }));
        if let Some(notes) = notes {
            event = event.notes(notes);
        }
        record_event(&txn, id, event).await?;
        txn.commit().await?;

        info!(%from, %to, "application status changed");
        self.event_sender
            .send_or_log(Event::ApplicationStatusChanged {
                application_id: id,
                old_status: from.to_string(),
                new_status: to.to_string(),
            })
            .await;

        find_application(db, id).await
    }
}
