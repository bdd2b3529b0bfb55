//! Pipe entity
//!
//! One row per workspace and `"<vendor>:<pipe>"` key.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pipes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub workspace_id: i64,

    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    /// Vendor id, e.g. `asana`
    pub service_id: String,

    /// Pipe id, e.g. `projects`
    pub pipe_id: String,

    pub configured: bool,

    /// Included in the autosync loop when set
    pub automatic: bool,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub service_params: Option<JsonValue>,

    /// Start time of the last error-free run
    pub last_sync: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
