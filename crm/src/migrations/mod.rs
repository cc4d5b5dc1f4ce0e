//! Schema migrations for the application
//!
//! One migrator covers both the engine-owned tables and the CRM-side ones,
//! so a single migration history drives the whole database.

pub mod m20250301_000002_create_crm_tables;

use cadence_engine::migrations::m20250301_000001_create_automation_tables;
use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_automation_tables::Migration),
            Box::new(m20250301_000002_create_crm_tables::Migration),
        ]
    }
}
