//! Application bootstrap
//!
//! Connects the database and assembles the automation engine with the
//! CRM-side collaborator implementations.

use std::sync::Arc;

use cadence_engine::{
    AutomationConfig, AutomationEngine, DatabaseConfig, DbConnection, EngineResult,
};

use crate::contacts::ContactStore;
use crate::mailer::OutboxMailer;

/// The wired application
pub struct App {
    pub db: DbConnection,
    pub engine: AutomationEngine,
    pub config: AutomationConfig,
}

/// Build the application from environment configuration
pub async fn bootstrap() -> EngineResult<App> {
    let db = DbConnection::connect(&DatabaseConfig::from_env()).await?;
    let config = AutomationConfig::from_env();

    let engine = AutomationEngine::new(
        db.clone(),
        Arc::new(ContactStore::new(db.clone())),
        Arc::new(OutboxMailer::new(db.clone())),
        &config,
    );

    Ok(App { db, engine, config })
}
