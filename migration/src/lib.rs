//! Database migrations for the pipes sync service.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_000001_create_pipes;
mod m2026_01_10_000002_create_authorizations;
mod m2026_01_10_000003_create_id_mappings;
mod m2026_01_10_000004_create_imports;
mod m2026_01_10_000005_create_pipes_queue;
mod m2026_01_10_000006_add_pipes_queue_pending_guard;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_10_000001_create_pipes::Migration),
            Box::new(m2026_01_10_000002_create_authorizations::Migration),
            Box::new(m2026_01_10_000003_create_id_mappings::Migration),
            Box::new(m2026_01_10_000004_create_imports::Migration),
            Box::new(m2026_01_10_000005_create_pipes_queue::Migration),
            Box::new(m2026_01_10_000006_add_pipes_queue_pending_guard::Migration),
        ]
    }
}
