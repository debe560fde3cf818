use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per phone number, holding the single live code
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "otp_codes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub phone: String,
    pub code: String,
    pub expires_at: DateTimeUtc,
    pub created_at: DateTimeUtc,
    pub attempts: i32,
    pub blocked_until: Option<DateTimeUtc>,
    pub last_sent_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
