//! Authorization entity
//!
//! One row per workspace and vendor. `data` is the sealed token blob; see
//! [`crate::crypto::seal_authorization`].

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "authorizations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub workspace_id: i64,

    #[sea_orm(primary_key, auto_increment = false)]
    pub service_id: String,

    /// Platform API token of the workspace that authorized the vendor
    pub workspace_token: String,

    pub data: Vec<u8>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
