//! Message dispatch via an outbox table
//!
//! The engine hands messages off here and moves on; a delivery worker (out
//! of scope for this crate) drains the outbox and talks to the provider.

use async_trait::async_trait;
use cadence_engine::{DbConnection, EngineError, EngineResult, MessageDispatcher};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use tracing::debug;

pub mod message_outbox {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "message_outbox")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub contact_id: i64,
        pub template_id: i64,
        pub status: String,
        pub queued_at: chrono::NaiveDateTime,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Queues messages into the outbox table
#[derive(Clone)]
pub struct OutboxMailer {
    db: DbConnection,
}

impl OutboxMailer {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageDispatcher for OutboxMailer {
    async fn enqueue(&self, entity_id: i64, template_id: i64) -> EngineResult<i64> {
        let row = message_outbox::ActiveModel {
            contact_id: Set(entity_id),
            template_id: Set(template_id),
            status: Set("queued".to_string()),
            queued_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        }
        .insert(self.db.inner())
        .await
        .map_err(|e| EngineError::dispatch(e.to_string()))?;

        debug!(
            dispatch_id = row.id,
            contact_id = entity_id,
            template_id,
            "message queued"
        );
        Ok(row.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::Migrator;
    use cadence_engine::database::testing::TestDatabase;
    use pretty_assertions::assert_eq;
    use sea_orm::EntityTrait;

    #[tokio::test]
    async fn enqueue_writes_an_outbox_row() {
        let db = TestDatabase::fresh::<Migrator>().await.unwrap();
        let conn = db.conn();
        let mailer = OutboxMailer::new(conn.clone());

        let dispatch_id = mailer.enqueue(1, 9).await.unwrap();

        let row = message_outbox::Entity::find_by_id(dispatch_id)
            .one(conn.inner())
            .await
            .unwrap()
            .expect("outbox row");
        assert_eq!(row.contact_id, 1);
        assert_eq!(row.template_id, 9);
        assert_eq!(row.status, "queued");
    }
}
