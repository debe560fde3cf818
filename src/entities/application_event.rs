use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const EVENT_DRAFT_CREATED: &str = "draft_created";
pub const EVENT_SUBMITTED: &str = "submitted";
pub const EVENT_QUOTE_ISSUED: &str = "quote_issued";
pub const EVENT_PAYMENT_RECEIVED: &str = "payment_received";
pub const EVENT_PAYMENT_FAILED: &str = "payment_failed";
pub const EVENT_STATUS_CHANGED: &str = "status_changed";

/// Append-only audit trail entry
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "application_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub application_id: Uuid,
    pub event_type: String,
    pub notes: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub data: Option<Json>,
    pub actor: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::application::Entity",
        from = "Column::ApplicationId",
        to = "super::application::Column::Id"
    )]
    Application,
}

impl Related<super::application::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Application.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
