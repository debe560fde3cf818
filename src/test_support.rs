//! Fixtures shared by the unit tests.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ActiveValue::Set, ColumnTrait,
    DatabaseConnection, EntityTrait, QueryFilter,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    db::{establish_connection_with_config, run_migrations, DbConfig},
    entities::{
        application::{self, ApplicationStatus},
        auth_user, catalog_service,
        invoice::{self, InvoiceKind, InvoiceStatus},
    },
    services::invoices::{issue_invoice, NewInvoice},
};

/// Migrated in-memory SQLite. A single connection keeps every query on the
/// same database.
pub async fn memory_db() -> Arc<DatabaseConnection> {
    let db = establish_connection_with_config(&DbConfig {
        url: "sqlite::memory:".into(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    })
    .await
    .expect("connect to sqlite");
    run_migrations(&db).await.expect("migrate");
    Arc::new(db)
}

pub async fn seed_service(
    db: &DatabaseConnection,
    slug: &str,
    price: Option<Decimal>,
) -> catalog_service::Model {
    catalog_service::ActiveModel {
        id: Set(Uuid::new_v4()),
        slug: Set(slug.to_string()),
        name: Set(slug.replace('-', " ")),
        price: Set(price),
        quote_only: Set(price.is_none()),
        active: Set(true),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed catalog service")
}

pub async fn seed_application(
    db: &DatabaseConnection,
    status: ApplicationStatus,
) -> application::Model {
    let slug = format!("svc-{}", Uuid::new_v4().simple());
    seed_service(db, &slug, None).await;
    let now = Utc::now();
    application::ActiveModel {
        id: Set(Uuid::new_v4()),
        service_slug: Set(slug),
        status: Set(status),
        applicant_name: Set(Some("Amira Hassan".into())),
        applicant_email: Set(Some("amira@example.com".into())),
        applicant_phone: Set(Some("+201001234567".into())),
        customer_id: Set(None),
        payload: Set(json!({ "urgency": "standard" })),
        order_number: Set(Some(format!("ORD-TEST-{}", Uuid::new_v4().simple()))),
        submitted_at: Set(Some(now)),
        last_event_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed application")
}

/// Submitted application with a pending checkout invoice in EGP.
pub async fn seed_invoice(db: &DatabaseConnection, amount: Decimal) -> invoice::Model {
    let application = seed_application(db, ApplicationStatus::Submitted).await;
    issue_invoice(
        db,
        NewInvoice {
            application_id: application.id,
            kind: InvoiceKind::Checkout,
            amount,
            currency: "EGP".into(),
            due_days: 7,
        },
    )
    .await
    .expect("seed invoice")
}

pub async fn set_invoice_status(db: &DatabaseConnection, id: Uuid, status: InvoiceStatus) {
    invoice::Entity::update_many()
        .col_expr(invoice::Column::Status, Expr::value(status.to_value()))
        .filter(invoice::Column::Id.eq(id))
        .exec(db)
        .await
        .expect("update invoice status");
}

/// Regular email/password account
pub async fn seed_email_user(db: &DatabaseConnection, email: &str) -> auth_user::Model {
    let now = Utc::now();
    auth_user::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set(Some("$argon2id$placeholder".into())),
        phone: Set(None),
        email_confirmed: Set(true),
        metadata: Set(json!({})),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed user")
}
