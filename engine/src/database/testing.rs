//! Database test harness
//!
//! Gives every test its own in-memory SQLite database with migrations
//! applied, so tests can run in parallel without sharing state.

use sea_orm_migration::MigratorTrait;

use super::{DatabaseConfig, DbConnection};
use crate::error::{EngineError, EngineResult};

/// An isolated, migrated, in-memory database for tests
///
/// # Example
///
/// ```rust,ignore
/// use cadence_engine::database::testing::TestDatabase;
/// use cadence_engine::migrations::Migrator;
///
/// let db = TestDatabase::fresh::<Migrator>().await.unwrap();
/// let conn = db.conn();
/// ```
pub struct TestDatabase {
    conn: DbConnection,
}

impl TestDatabase {
    /// Create a fresh in-memory database and run the given migrator
    pub async fn fresh<M: MigratorTrait>() -> EngineResult<Self> {
        let conn = DbConnection::connect(&DatabaseConfig::in_memory()).await?;

        M::up(conn.inner(), None)
            .await
            .map_err(|e| EngineError::database(e.to_string()))?;

        Ok(Self { conn })
    }

    /// Get a handle to the database connection
    pub fn conn(&self) -> DbConnection {
        self.conn.clone()
    }
}
