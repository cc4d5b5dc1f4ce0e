//! External collaborator interfaces
//!
//! The engine mutates CRM data and sends messages only through these traits.
//! Implementations must persist before returning; the engine never holds an
//! in-process lock across a call.
//!
//! In-memory implementations ship here for tests and examples; the embedding
//! application provides the database-backed ones.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::error::{EngineError, EngineResult};

/// A CRM entity as the engine sees it: the handful of fields actions touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: i64,
    pub status: String,
    pub owner_id: Option<i64>,
    pub tags: Vec<String>,
}

impl Entity {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            status: "lead".to_string(),
            owner_id: None,
            tags: Vec::new(),
        }
    }
}

/// Read and mutate entities in the external entity store
///
/// Each setter persists immediately and is durable on return.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Load an entity; `EntityNotFound` if missing
    async fn get_entity(&self, id: i64) -> EngineResult<Entity>;

    /// Replace the entity's tag set
    async fn set_tags(&self, id: i64, tags: Vec<String>) -> EngineResult<()>;

    /// Set the entity's status field
    async fn set_status(&self, id: i64, status: &str) -> EngineResult<()>;

    /// Set the entity's owner; `OwnerNotFound` for an unknown owner
    async fn set_owner(&self, id: i64, owner_id: i64) -> EngineResult<()>;
}

/// Hand a message off to the delivery subsystem
///
/// Fire-and-forget: the returned dispatch id acknowledges the hand-off, not
/// delivery.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn enqueue(&self, entity_id: i64, template_id: i64) -> EngineResult<i64>;
}

/// Merge a tag into an existing tag set, deduplicating
pub fn merge_tag(existing: &[String], tag: &str) -> Vec<String> {
    let mut set: BTreeSet<String> = existing.iter().cloned().collect();
    set.insert(tag.to_string());
    set.into_iter().collect()
}

// ============================================
// In-memory implementations
// ============================================

/// In-memory entity store for tests and examples
#[derive(Default)]
pub struct InMemoryEntityStore {
    entities: RwLock<HashMap<i64, Entity>>,
    owners: RwLock<HashSet<i64>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, entity: Entity) {
        self.entities.write().await.insert(entity.id, entity);
    }

    pub async fn add_owner(&self, owner_id: i64) {
        self.owners.write().await.insert(owner_id);
    }

    async fn update<F>(&self, id: i64, apply: F) -> EngineResult<()>
    where
        F: FnOnce(&mut Entity),
    {
        let mut entities = self.entities.write().await;
        let entity = entities.get_mut(&id).ok_or(EngineError::EntityNotFound(id))?;
        apply(entity);
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_entity(&self, id: i64) -> EngineResult<Entity> {
        self.entities
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::EntityNotFound(id))
    }

    async fn set_tags(&self, id: i64, tags: Vec<String>) -> EngineResult<()> {
        self.update(id, |entity| entity.tags = tags).await
    }

    async fn set_status(&self, id: i64, status: &str) -> EngineResult<()> {
        let status = status.to_string();
        self.update(id, |entity| entity.status = status).await
    }

    async fn set_owner(&self, id: i64, owner_id: i64) -> EngineResult<()> {
        if !self.owners.read().await.contains(&owner_id) {
            return Err(EngineError::OwnerNotFound(owner_id));
        }
        self.update(id, |entity| entity.owner_id = Some(owner_id))
            .await
    }
}

/// Message dispatcher that records enqueued messages for assertions
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(i64, i64)>>,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every `(entity_id, template_id)` pair enqueued so far
    pub async fn sent(&self) -> Vec<(i64, i64)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MessageDispatcher for RecordingMailer {
    async fn enqueue(&self, entity_id: i64, template_id: i64) -> EngineResult<i64> {
        let mut sent = self.sent.lock().await;
        sent.push((entity_id, template_id));
        Ok(sent.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn merge_tag_deduplicates() {
        let tags = vec!["sales".to_string(), "vip".to_string()];
        let merged = merge_tag(&tags, "sales");
        assert_eq!(merged.len(), 2);

        let merged = merge_tag(&tags, "contacted");
        assert!(merged.contains(&"contacted".to_string()));
        assert_eq!(merged.len(), 3);
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryEntityStore::new();
        store.insert(Entity::new(1)).await;
        store.add_owner(42).await;

        store.set_status(1, "prospect").await.unwrap();
        store
            .set_tags(1, vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        store.set_owner(1, 42).await.unwrap();

        let entity = store.get_entity(1).await.unwrap();
        assert_eq!(entity.status, "prospect");
        assert_eq!(entity.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(entity.owner_id, Some(42));

        assert!(matches!(
            store.get_entity(2).await.unwrap_err(),
            EngineError::EntityNotFound(2)
        ));
        assert!(matches!(
            store.set_owner(1, 99).await.unwrap_err(),
            EngineError::OwnerNotFound(99)
        ));
    }
}
