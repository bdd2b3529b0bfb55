//! Import entity
//!
//! Append-only staging rows. Readers only look at the newest row per key.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "imports")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub workspace_id: i64,

    /// Adapter key, e.g. `asana:users`
    pub key: String,

    /// A serialized staged batch: `{items, error}`
    #[sea_orm(column_type = "JsonBinary")]
    pub data: JsonValue,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
