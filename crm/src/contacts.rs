//! Contacts model and the entity-store bridge into the engine
//!
//! Tags live in a single comma-separated column on the contact row; the
//! store splits and joins at the boundary so the engine only ever sees a
//! tag list.

use async_trait::async_trait;
use cadence_engine::{DbConnection, EngineError, EngineResult, Entity, EntityStore};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

pub mod contacts {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "contacts")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub first_name: String,
        pub last_name: String,
        pub email: String,
        pub phone: Option<String>,
        pub status: String,
        /// Comma-separated tags
        pub tags: String,
        pub owner_id: Option<i64>,
        pub created_at: chrono::NaiveDateTime,
        pub updated_at: chrono::NaiveDateTime,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl Model {
        pub fn full_name(&self) -> String {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

pub mod owners {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "owners")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub name: String,
        pub email: String,
        pub created_at: chrono::NaiveDateTime,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Split a comma-separated tag column into a list
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join a tag list back into the column form
pub fn join_tags(tags: &[String]) -> String {
    tags.join(",")
}

/// Contact-table implementation of the engine's entity store
#[derive(Clone)]
pub struct ContactStore {
    db: DbConnection,
}

impl ContactStore {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    async fn load(&self, id: i64) -> EngineResult<contacts::Model> {
        contacts::Entity::find_by_id(id)
            .one(self.db.inner())
            .await
            .map_err(|e| EngineError::database(e.to_string()))?
            .ok_or(EngineError::EntityNotFound(id))
    }

    async fn save<F>(&self, id: i64, apply: F) -> EngineResult<()>
    where
        F: FnOnce(&mut contacts::ActiveModel),
    {
        let model = self.load(id).await?;
        let mut active: contacts::ActiveModel = model.into();
        apply(&mut active);
        active.updated_at = Set(Utc::now().naive_utc());
        active
            .update(self.db.inner())
            .await
            .map_err(|e| EngineError::database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for ContactStore {
    async fn get_entity(&self, id: i64) -> EngineResult<Entity> {
        let contact = self.load(id).await?;
        Ok(Entity {
            id: contact.id,
            status: contact.status,
            owner_id: contact.owner_id,
            tags: split_tags(&contact.tags),
        })
    }

    async fn set_tags(&self, id: i64, tags: Vec<String>) -> EngineResult<()> {
        self.save(id, |active| active.tags = Set(join_tags(&tags)))
            .await
    }

    async fn set_status(&self, id: i64, status: &str) -> EngineResult<()> {
        let status = status.to_string();
        self.save(id, |active| active.status = Set(status)).await
    }

    async fn set_owner(&self, id: i64, owner_id: i64) -> EngineResult<()> {
        let owner = owners::Entity::find_by_id(owner_id)
            .one(self.db.inner())
            .await
            .map_err(|e| EngineError::database(e.to_string()))?;
        if owner.is_none() {
            return Err(EngineError::OwnerNotFound(owner_id));
        }

        self.save(id, |active| active.owner_id = Set(Some(owner_id)))
            .await
    }
}
