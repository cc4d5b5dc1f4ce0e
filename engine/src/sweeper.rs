//! Due-step sweeping
//!
//! The recovery pass for delayed jobs lost to restarts or failed
//! submissions: any pending step run whose due time has passed is pushed
//! straight through the executor. Safe to run at any frequency, concurrently
//! with live delivery - the executor's replay guard makes a double pickup a
//! no-op.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::info;

use crate::database::DbConnection;
use crate::error::EngineResult;
use crate::executor::StepExecutor;
use crate::schedule::{Task, TaskResult};
use crate::store;

/// Result of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Step runs executed by this pass
    pub processed: usize,
    /// Per-step errors; the pass itself never aborts on one
    pub errors: Vec<String>,
}

/// Finds overdue pending step runs and executes them
pub struct DueStepSweeper {
    db: DbConnection,
    executor: Arc<StepExecutor>,
}

impl DueStepSweeper {
    pub fn new(db: DbConnection, executor: Arc<StepExecutor>) -> Self {
        Self { db, executor }
    }

    /// Execute every pending step run due at or before `now`
    pub async fn sweep_due(&self, now: NaiveDateTime) -> EngineResult<SweepOutcome> {
        let due = store::due_step_runs(&self.db, now).await?;
        let mut outcome = SweepOutcome::default();

        for step_run in due {
            match self.executor.execute(step_run.id).await {
                Ok(_) => outcome.processed += 1,
                Err(err) => outcome
                    .errors
                    .push(format!("step run {}: {}", step_run.id, err)),
            }
        }

        if outcome.processed > 0 || !outcome.errors.is_empty() {
            info!(
                processed = outcome.processed,
                errors = outcome.errors.len(),
                "due-step sweep finished"
            );
        }

        Ok(outcome)
    }
}

#[async_trait]
impl Task for DueStepSweeper {
    async fn handle(&self) -> TaskResult {
        self.sweep_due(store::utc_now()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::database::testing::TestDatabase;
    use crate::external::{Entity, EntityStore, InMemoryEntityStore, RecordingMailer};
    use crate::migrations::Migrator;
    use crate::store::{NewStep, NewWorkflow};
    use crate::types::{ActionKind, TriggerFilter, TriggerKind};
    use pretty_assertions::assert_eq;

    struct Setup {
        _db: TestDatabase,
        conn: DbConnection,
        entities: Arc<InMemoryEntityStore>,
        sweeper: DueStepSweeper,
        run_id: i64,
        step_id: i64,
    }

    async fn setup() -> Setup {
        let db = TestDatabase::fresh::<Migrator>().await.unwrap();
        let conn = db.conn();

        let entities = InMemoryEntityStore::new();
        entities.insert(Entity::new(1)).await;
        let executor = Arc::new(StepExecutor::new(
            conn.clone(),
            Arc::new(ActionRegistry::with_builtin_actions()),
            entities.clone(),
            RecordingMailer::new(),
        ));
        let sweeper = DueStepSweeper::new(conn.clone(), executor);

        let workflow = store::insert_workflow(
            &conn,
            NewWorkflow {
                name: "Welcome".to_string(),
                description: String::new(),
                trigger_kind: TriggerKind::EntityCreated,
                trigger_filter: TriggerFilter::default(),
                active: true,
            },
        )
        .await
        .unwrap();
        let step = store::insert_step(
            &conn,
            NewStep {
                workflow_id: workflow.id,
                step_order: 1,
                action_kind: ActionKind::AddTag,
                delay_seconds: 0,
                payload: r#"{"tag":"swept"}"#.to_string(),
                enabled: true,
            },
        )
        .await
        .unwrap();

        let (run, _) = store::get_or_create_run(&conn, workflow.id, 1, store::utc_now())
            .await
            .unwrap();
        let run = store::mark_run_in_progress(&conn, run).await.unwrap();

        Setup {
            _db: db,
            conn,
            entities,
            sweeper,
            run_id: run.id,
            step_id: step.id,
        }
    }

    #[tokio::test]
    async fn future_steps_are_left_untouched() {
        let s = setup().await;
        let now = store::utc_now();
        let step_run = store::insert_step_run(
            &s.conn,
            s.run_id,
            s.step_id,
            now + chrono::Duration::days(3),
        )
        .await
        .unwrap();

        let outcome = s.sweeper.sweep_due(now).await.unwrap();
        assert_eq!(outcome.processed, 0);

        let reloaded = store::get_step_run(&s.conn, step_run.id).await.unwrap();
        assert_eq!(reloaded.status, "pending");
        assert!(s.entities.get_entity(1).await.unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn past_steps_are_executed_as_the_job_would_have() {
        let s = setup().await;
        let now = store::utc_now();
        let step_run = store::insert_step_run(
            &s.conn,
            s.run_id,
            s.step_id,
            now + chrono::Duration::days(3),
        )
        .await
        .unwrap();

        // once the due time has passed, the sweep picks it up
        let outcome = s
            .sweeper
            .sweep_due(now + chrono::Duration::days(3))
            .await
            .unwrap();
        assert_eq!(outcome.processed, 1);
        assert!(outcome.errors.is_empty());

        let reloaded = store::get_step_run(&s.conn, step_run.id).await.unwrap();
        assert_eq!(reloaded.status, "completed");
        assert_eq!(s.entities.get_entity(1).await.unwrap().tags, vec!["swept"]);

        // the run is finalized by the sweep path too
        let run = store::get_run(&s.conn, s.run_id).await.unwrap();
        assert_eq!(run.status, "completed");
    }

    #[tokio::test]
    async fn sweeping_twice_is_harmless() {
        let s = setup().await;
        let now = store::utc_now();
        store::insert_step_run(&s.conn, s.run_id, s.step_id, now)
            .await
            .unwrap();

        let first = s.sweeper.sweep_due(now).await.unwrap();
        let second = s.sweeper.sweep_due(now).await.unwrap();
        assert_eq!(first.processed, 1);
        assert_eq!(second.processed, 0);
        assert_eq!(s.entities.get_entity(1).await.unwrap().tags, vec!["swept"]);
    }
}
