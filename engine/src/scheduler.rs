//! Run scheduling
//!
//! Turns a (workflow, entity) pair into a run plus one pending step run and
//! one delayed job per enabled step. Every step's due time is computed from
//! the shared trigger instant, never from the previous step, so steps stay
//! independently retryable.

use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::DbConnection;
use crate::error::{EngineError, EngineResult};
use crate::jobs::{JobRuntime, StepJob};
use crate::store;
use crate::types::RunStatus;

/// Result of a `start` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A run was scheduled with this many step jobs
    Scheduled {
        run_id: i64,
        steps: usize,
        /// Jobs whose submission failed; their step runs are recorded and
        /// recovered by the sweeper
        submit_failures: usize,
    },
    /// The run for this pair already executed; duplicate trigger swallowed
    AlreadyExecuted { run_id: i64 },
    /// The workflow has no enabled steps; the run completed immediately
    CompletedEmpty { run_id: i64 },
}

/// Creates runs and schedules their steps
pub struct RunScheduler {
    db: DbConnection,
    jobs: Arc<dyn JobRuntime>,
}

impl RunScheduler {
    pub fn new(db: DbConnection, jobs: Arc<dyn JobRuntime>) -> Self {
        Self { db, jobs }
    }

    /// Start a workflow against an entity
    ///
    /// `WorkflowNotFound` if the workflow is missing or inactive; callers
    /// must not retry that. A run observed as pending is treated as
    /// "schedule now", not as already done.
    pub async fn start(&self, workflow_id: i64, entity_id: i64) -> EngineResult<StartOutcome> {
        let workflow = store::get_workflow(&self.db, workflow_id)
            .await?
            .filter(|w| w.active)
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        let trigger_time = store::utc_now();
        let (run, created) =
            store::get_or_create_run(&self.db, workflow.id, entity_id, trigger_time).await?;

        if !created && run.status != RunStatus::Pending.as_str() {
            info!(
                run_id = run.id,
                workflow_id, entity_id, "workflow already executed for entity"
            );
            return Ok(StartOutcome::AlreadyExecuted { run_id: run.id });
        }

        let run = store::mark_run_in_progress(&self.db, run).await?;

        let steps = store::enabled_steps(&self.db, workflow.id).await?;
        if steps.is_empty() {
            store::complete_run(&self.db, run.id, trigger_time).await?;
            info!(
                run_id = run.id,
                workflow_id, "workflow has no enabled steps, run completed"
            );
            return Ok(StartOutcome::CompletedEmpty { run_id: run.id });
        }

        let mut submit_failures = 0usize;
        for step in &steps {
            let scheduled_for = trigger_time + Duration::seconds(step.delay_seconds.max(0));
            let step_run =
                store::insert_step_run(&self.db, run.id, step.id, scheduled_for).await?;

            // The step run row is already persisted; a lost submission is
            // recovered by the sweeper once the due time passes.
            if let Err(err) = self
                .jobs
                .submit(StepJob {
                    step_run_id: step_run.id,
                    fire_at: scheduled_for,
                })
                .await
            {
                warn!(
                    step_run_id = step_run.id,
                    run_id = run.id,
                    error = %err,
                    "job submission failed; step left to the sweeper"
                );
                submit_failures += 1;
            }
        }

        info!(
            run_id = run.id,
            workflow_id,
            entity_id,
            steps = steps.len(),
            "workflow run scheduled"
        );

        Ok(StartOutcome::Scheduled {
            run_id: run.id,
            steps: steps.len(),
            submit_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::TestDatabase;
    use crate::jobs::RecordingJobRuntime;
    use crate::migrations::Migrator;
    use crate::store::{NewStep, NewWorkflow};
    use crate::types::{ActionKind, TriggerFilter, TriggerKind};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FailingJobRuntime;

    #[async_trait]
    impl JobRuntime for FailingJobRuntime {
        async fn submit(&self, _job: StepJob) -> EngineResult<()> {
            Err(EngineError::internal("queue unavailable"))
        }
    }

    async fn workflow_with_delays(
        conn: &DbConnection,
        delays: &[i64],
    ) -> crate::entities::workflows::Model {
        let workflow = store::insert_workflow(
            conn,
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

        for (i, delay) in delays.iter().enumerate() {
            store::insert_step(
                conn,
                NewStep {
                    workflow_id: workflow.id,
                    step_order: i as i32 + 1,
                    action_kind: ActionKind::Wait,
                    delay_seconds: *delay,
                    payload: String::new(),
                    enabled: true,
                },
            )
            .await
            .unwrap();
        }

        workflow
    }

    #[tokio::test]
    async fn due_times_are_relative_to_the_trigger_instant() {
        let db = TestDatabase::fresh::<Migrator>().await.unwrap();
        let conn = db.conn();
        let jobs = RecordingJobRuntime::new();
        let scheduler = RunScheduler::new(conn.clone(), jobs.clone());

        let three_days = 3 * 24 * 60 * 60;
        let workflow = workflow_with_delays(&conn, &[0, three_days]).await;

        let outcome = scheduler.start(workflow.id, 1).await.unwrap();
        let StartOutcome::Scheduled { run_id, steps, submit_failures } = outcome else {
            panic!("expected scheduled outcome, got {:?}", outcome);
        };
        assert_eq!(steps, 2);
        assert_eq!(submit_failures, 0);

        let run = store::get_run(&conn, run_id).await.unwrap();
        assert_eq!(run.status, "in_progress");
        let trigger_time = run.started_at;

        let step_runs = store::step_runs_for_run(&conn, run_id).await.unwrap();
        assert_eq!(step_runs.len(), 2);
        assert_eq!(step_runs[0].scheduled_for, trigger_time);
        assert_eq!(
            step_runs[1].scheduled_for,
            trigger_time + Duration::seconds(three_days)
        );

        // the submitted jobs carry the same due times
        let submitted = jobs.submitted().await;
        assert_eq!(
            submitted.iter().map(|j| j.fire_at).collect::<Vec<_>>(),
            step_runs
                .iter()
                .map(|s| s.scheduled_for)
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn duplicate_start_is_swallowed() {
        let db = TestDatabase::fresh::<Migrator>().await.unwrap();
        let conn = db.conn();
        let jobs = RecordingJobRuntime::new();
        let scheduler = RunScheduler::new(conn.clone(), jobs.clone());

        let workflow = workflow_with_delays(&conn, &[60]).await;

        let first = scheduler.start(workflow.id, 1).await.unwrap();
        let StartOutcome::Scheduled { run_id, .. } = first else {
            panic!("expected scheduled");
        };

        let second = scheduler.start(workflow.id, 1).await.unwrap();
        assert_eq!(second, StartOutcome::AlreadyExecuted { run_id });

        // no second batch of jobs
        assert_eq!(jobs.submitted().await.len(), 1);
        assert_eq!(
            store::step_runs_for_run(&conn, run_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn empty_workflow_completes_immediately() {
        let db = TestDatabase::fresh::<Migrator>().await.unwrap();
        let conn = db.conn();
        let scheduler = RunScheduler::new(conn.clone(), RecordingJobRuntime::new());

        let workflow = workflow_with_delays(&conn, &[]).await;

        let outcome = scheduler.start(workflow.id, 1).await.unwrap();
        let StartOutcome::CompletedEmpty { run_id } = outcome else {
            panic!("expected empty completion");
        };

        let run = store::get_run(&conn, run_id).await.unwrap();
        assert_eq!(run.status, "completed");
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn inactive_or_missing_workflow_is_not_found() {
        let db = TestDatabase::fresh::<Migrator>().await.unwrap();
        let conn = db.conn();
        let scheduler = RunScheduler::new(conn.clone(), RecordingJobRuntime::new());

        let workflow = workflow_with_delays(&conn, &[0]).await;
        store::set_workflow_active(&conn, workflow.id, false)
            .await
            .unwrap();

        assert!(matches!(
            scheduler.start(workflow.id, 1).await.unwrap_err(),
            EngineError::WorkflowNotFound(_)
        ));
        assert!(matches!(
            scheduler.start(999, 1).await.unwrap_err(),
            EngineError::WorkflowNotFound(999)
        ));
    }

    #[tokio::test]
    async fn failed_submission_still_records_the_step_run() {
        let db = TestDatabase::fresh::<Migrator>().await.unwrap();
        let conn = db.conn();
        let scheduler = RunScheduler::new(conn.clone(), Arc::new(FailingJobRuntime));

        let workflow = workflow_with_delays(&conn, &[0, 60]).await;

        let outcome = scheduler.start(workflow.id, 1).await.unwrap();
        let StartOutcome::Scheduled {
            run_id,
            steps,
            submit_failures,
        } = outcome
        else {
            panic!("expected scheduled");
        };
        assert_eq!(steps, 2);
        assert_eq!(submit_failures, 2);

        // both step runs persisted pending, ready for the sweeper
        let step_runs = store::step_runs_for_run(&conn, run_id).await.unwrap();
        assert_eq!(step_runs.len(), 2);
        assert!(step_runs.iter().all(|s| s.status == "pending"));
    }
}
