//! Queued pipe entity
//!
//! Rows are claimed by setting `locked_at` and finished by setting
//! `synced_at`.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pipes_queue")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub workspace_id: i64,

    pub service_id: String,

    pub pipe_id: String,

    /// Higher values are claimed first
    pub priority: i32,

    pub queued_at: DateTimeWithTimeZone,

    pub locked_at: Option<DateTimeWithTimeZone>,

    pub synced_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
