//! Action registry and built-in action handlers
//!
//! The registry maps an action kind to a stateless handler. Handlers report
//! a per-step outcome (completed or failed with a reason); anything they
//! return as an error is treated as fatal to the execution attempt and left
//! to the job runtime's redelivery policy.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::external::{merge_tag, EntityStore, MessageDispatcher};
use crate::types::{ActionKind, ActionPayload};

/// Collaborator handles passed to every handler invocation
pub struct ActionContext {
    pub entities: Arc<dyn EntityStore>,
    pub mailer: Arc<dyn MessageDispatcher>,
}

/// Terminal outcome of one action execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed,
    Failed { reason: String },
}

impl ActionOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// One executable action kind
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> ActionKind;

    async fn execute(
        &self,
        ctx: &ActionContext,
        entity_id: i64,
        payload: &ActionPayload,
    ) -> EngineResult<ActionOutcome>;
}

/// Maps action kinds to handlers; pure and stateless
pub struct ActionRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with all five built-in actions
    pub fn with_builtin_actions() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SendMessageAction));
        registry.register(Arc::new(AddTagAction));
        registry.register(Arc::new(ChangeStatusAction));
        registry.register(Arc::new(AssignOwnerAction));
        registry.register(Arc::new(WaitAction));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: ActionKind) -> EngineResult<Arc<dyn ActionHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::UnsupportedAction(kind.as_str().to_string()))
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtin_actions()
    }
}

/// Hand the message off to the dispatcher; delivery is not awaited
pub struct SendMessageAction;

#[async_trait]
impl ActionHandler for SendMessageAction {
    fn kind(&self) -> ActionKind {
        ActionKind::SendMessage
    }

    async fn execute(
        &self,
        ctx: &ActionContext,
        entity_id: i64,
        payload: &ActionPayload,
    ) -> EngineResult<ActionOutcome> {
        let template_id = match payload {
            ActionPayload::SendMessage { template_id } => *template_id,
            _ => return Err(EngineError::internal("payload/handler kind mismatch")),
        };

        let Some(template_id) = template_id else {
            return Ok(ActionOutcome::failed("no template"));
        };

        let dispatch_id = ctx.mailer.enqueue(entity_id, template_id).await?;
        debug!(entity_id, template_id, dispatch_id, "message handed off");
        Ok(ActionOutcome::Completed)
    }
}

/// Merge a tag into the entity's tag set; a missing tag is a no-op
pub struct AddTagAction;

#[async_trait]
impl ActionHandler for AddTagAction {
    fn kind(&self) -> ActionKind {
        ActionKind::AddTag
    }

    async fn execute(
        &self,
        ctx: &ActionContext,
        entity_id: i64,
        payload: &ActionPayload,
    ) -> EngineResult<ActionOutcome> {
        let tag = match payload {
            ActionPayload::AddTag { tag } => tag.clone(),
            _ => return Err(EngineError::internal("payload/handler kind mismatch")),
        };

        match tag.as_deref() {
            Some(tag) if !tag.trim().is_empty() => {
                let entity = ctx.entities.get_entity(entity_id).await?;
                let tags = merge_tag(&entity.tags, tag.trim());
                ctx.entities.set_tags(entity_id, tags).await?;
            }
            _ => {}
        }

        Ok(ActionOutcome::Completed)
    }
}

/// Set the entity's status field; a missing value is a no-op
pub struct ChangeStatusAction;

#[async_trait]
impl ActionHandler for ChangeStatusAction {
    fn kind(&self) -> ActionKind {
        ActionKind::ChangeStatus
    }

    async fn execute(
        &self,
        ctx: &ActionContext,
        entity_id: i64,
        payload: &ActionPayload,
    ) -> EngineResult<ActionOutcome> {
        let status = match payload {
            ActionPayload::ChangeStatus { status } => status.clone(),
            _ => return Err(EngineError::internal("payload/handler kind mismatch")),
        };

        if let Some(status) = status.as_deref() {
            if !status.trim().is_empty() {
                ctx.entities.set_status(entity_id, status.trim()).await?;
            }
        }

        Ok(ActionOutcome::Completed)
    }
}

/// Assign the entity to an owner; an unknown owner fails the step
pub struct AssignOwnerAction;

#[async_trait]
impl ActionHandler for AssignOwnerAction {
    fn kind(&self) -> ActionKind {
        ActionKind::AssignOwner
    }

    async fn execute(
        &self,
        ctx: &ActionContext,
        entity_id: i64,
        payload: &ActionPayload,
    ) -> EngineResult<ActionOutcome> {
        let owner_id = match payload {
            ActionPayload::AssignOwner { owner_id } => *owner_id,
            _ => return Err(EngineError::internal("payload/handler kind mismatch")),
        };

        let Some(owner_id) = owner_id else {
            return Ok(ActionOutcome::Completed);
        };

        match ctx.entities.set_owner(entity_id, owner_id).await {
            Ok(()) => Ok(ActionOutcome::Completed),
            Err(EngineError::OwnerNotFound(_)) => Ok(ActionOutcome::failed(
                "invalid action data or owner not found",
            )),
            Err(err) => Err(err),
        }
    }
}

/// The delay was already enforced by the scheduled due time
pub struct WaitAction;

#[async_trait]
impl ActionHandler for WaitAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Wait
    }

    async fn execute(
        &self,
        _ctx: &ActionContext,
        _entity_id: i64,
        _payload: &ActionPayload,
    ) -> EngineResult<ActionOutcome> {
        Ok(ActionOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{Entity, InMemoryEntityStore, RecordingMailer};
    use pretty_assertions::assert_eq;

    async fn context() -> (Arc<InMemoryEntityStore>, Arc<RecordingMailer>, ActionContext) {
        let entities = InMemoryEntityStore::new();
        entities.insert(Entity::new(1)).await;
        entities.add_owner(42).await;
        let mailer = RecordingMailer::new();
        let ctx = ActionContext {
            entities: entities.clone(),
            mailer: mailer.clone(),
        };
        (entities, mailer, ctx)
    }

    #[tokio::test]
    async fn send_message_without_template_fails() {
        let (_, mailer, ctx) = context().await;
        let outcome = SendMessageAction
            .execute(&ctx, 1, &ActionPayload::SendMessage { template_id: None })
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::failed("no template"));
        assert!(mailer.sent().await.is_empty());
    }

    #[tokio::test]
    async fn send_message_hands_off_and_completes() {
        let (_, mailer, ctx) = context().await;
        let outcome = SendMessageAction
            .execute(
                &ctx,
                1,
                &ActionPayload::SendMessage {
                    template_id: Some(9),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(mailer.sent().await, vec![(1, 9)]);
    }

    #[tokio::test]
    async fn add_tag_merges_into_empty_set() {
        let (entities, _, ctx) = context().await;
        let outcome = AddTagAction
            .execute(
                &ctx,
                1,
                &ActionPayload::AddTag {
                    tag: Some("x".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(entities.get_entity(1).await.unwrap().tags, vec!["x"]);
    }

    #[tokio::test]
    async fn add_tag_deduplicates() {
        let (entities, _, ctx) = context().await;
        entities
            .set_tags(1, vec!["x".to_string()])
            .await
            .unwrap();
        AddTagAction
            .execute(
                &ctx,
                1,
                &ActionPayload::AddTag {
                    tag: Some("x".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(entities.get_entity(1).await.unwrap().tags, vec!["x"]);
    }

    #[tokio::test]
    async fn missing_tag_is_a_noop_completion() {
        let (entities, _, ctx) = context().await;
        let outcome = AddTagAction
            .execute(&ctx, 1, &ActionPayload::AddTag { tag: None })
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);
        assert!(entities.get_entity(1).await.unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn change_status_sets_the_field() {
        let (entities, _, ctx) = context().await;
        let outcome = ChangeStatusAction
            .execute(
                &ctx,
                1,
                &ActionPayload::ChangeStatus {
                    status: Some("prospect".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(entities.get_entity(1).await.unwrap().status, "prospect");
    }

    #[tokio::test]
    async fn assign_owner_unknown_owner_fails_the_step() {
        let (entities, _, ctx) = context().await;
        let outcome = AssignOwnerAction
            .execute(
                &ctx,
                1,
                &ActionPayload::AssignOwner { owner_id: Some(99) },
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::failed("invalid action data or owner not found")
        );
        assert_eq!(entities.get_entity(1).await.unwrap().owner_id, None);
    }

    #[tokio::test]
    async fn assign_owner_known_owner_completes() {
        let (entities, _, ctx) = context().await;
        let outcome = AssignOwnerAction
            .execute(
                &ctx,
                1,
                &ActionPayload::AssignOwner { owner_id: Some(42) },
            )
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(entities.get_entity(1).await.unwrap().owner_id, Some(42));
    }

    #[tokio::test]
    async fn wait_always_completes() {
        let (_, _, ctx) = context().await;
        let outcome = WaitAction
            .execute(&ctx, 1, &ActionPayload::Wait)
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);
    }

    #[test]
    fn builtin_registry_covers_every_kind() {
        let registry = ActionRegistry::with_builtin_actions();
        for kind in [
            ActionKind::SendMessage,
            ActionKind::AddTag,
            ActionKind::ChangeStatus,
            ActionKind::AssignOwner,
            ActionKind::Wait,
        ] {
            assert!(registry.get(kind).is_ok());
        }
    }
}
