//! Engine facade
//!
//! Wires the components together and exposes the operations the embedding
//! application calls: definition management, event dispatch, manual starts,
//! step execution, sweeping, and run cancellation.

use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::info;

use crate::actions::ActionRegistry;
use crate::config::AutomationConfig;
use crate::database::DbConnection;
use crate::entities::{workflow_runs, workflow_steps, workflows};
use crate::error::{EngineError, EngineResult};
use crate::executor::{ExecutionOutcome, StepExecutor};
use crate::external::{EntityStore, MessageDispatcher};
use crate::jobs::{JobRuntime, TokioJobRuntime};
use crate::scheduler::{RunScheduler, StartOutcome};
use crate::store::{self, NewStep, NewWorkflow, StepUpdate, WorkflowUpdate};
use crate::sweeper::{DueStepSweeper, SweepOutcome};
use crate::triggers::{BusinessEvent, DispatchSummary, TriggerDispatcher};
use crate::types::ActionPayload;

/// The assembled automation engine
pub struct AutomationEngine {
    db: DbConnection,
    dispatcher: TriggerDispatcher,
    scheduler: Arc<RunScheduler>,
    executor: Arc<StepExecutor>,
    sweeper: Arc<DueStepSweeper>,
    jobs: Arc<dyn JobRuntime>,
}

impl AutomationEngine {
    /// Build the engine with the in-process tokio job runtime
    pub fn new(
        db: DbConnection,
        entities: Arc<dyn EntityStore>,
        mailer: Arc<dyn MessageDispatcher>,
        config: &AutomationConfig,
    ) -> Self {
        let executor = Arc::new(StepExecutor::new(
            db.clone(),
            Arc::new(ActionRegistry::with_builtin_actions()),
            entities,
            mailer,
        ));
        let jobs: Arc<dyn JobRuntime> = Arc::new(TokioJobRuntime::new(executor.clone(), config));
        Self::assemble(db, executor, jobs)
    }

    /// Build the engine around a custom job runtime
    pub fn with_job_runtime(
        db: DbConnection,
        entities: Arc<dyn EntityStore>,
        mailer: Arc<dyn MessageDispatcher>,
        jobs: Arc<dyn JobRuntime>,
    ) -> Self {
        let executor = Arc::new(StepExecutor::new(
            db.clone(),
            Arc::new(ActionRegistry::with_builtin_actions()),
            entities,
            mailer,
        ));
        Self::assemble(db, executor, jobs)
    }

    fn assemble(db: DbConnection, executor: Arc<StepExecutor>, jobs: Arc<dyn JobRuntime>) -> Self {
        let scheduler = Arc::new(RunScheduler::new(db.clone(), jobs.clone()));
        let dispatcher = TriggerDispatcher::new(db.clone(), scheduler.clone());
        let sweeper = Arc::new(DueStepSweeper::new(db.clone(), executor.clone()));

        Self {
            db,
            dispatcher,
            scheduler,
            executor,
            sweeper,
            jobs,
        }
    }

    /// The sweeper, for registration on a schedule
    pub fn sweeper(&self) -> Arc<DueStepSweeper> {
        self.sweeper.clone()
    }

    /// Stop the job runtime; scheduled-but-unfired jobs fall to the sweeper
    pub async fn shutdown(&self) {
        self.jobs.shutdown().await;
    }

    // ============================================
    // Definition management
    // ============================================

    pub async fn create_workflow(&self, input: NewWorkflow) -> EngineResult<workflows::Model> {
        let workflow = store::insert_workflow(&self.db, input).await?;
        info!(workflow_id = workflow.id, name = %workflow.name, "workflow created");
        Ok(workflow)
    }

    pub async fn update_workflow(
        &self,
        id: i64,
        input: WorkflowUpdate,
    ) -> EngineResult<workflows::Model> {
        store::update_workflow(&self.db, id, input).await
    }

    pub async fn set_workflow_active(&self, id: i64, active: bool) -> EngineResult<()> {
        store::set_workflow_active(&self.db, id, active).await
    }

    /// Delete a workflow; refused while runs reference it
    pub async fn delete_workflow(&self, id: i64) -> EngineResult<()> {
        store::delete_workflow(&self.db, id).await
    }

    pub async fn list_workflows(&self) -> EngineResult<Vec<workflows::Model>> {
        store::list_workflows(&self.db).await
    }

    pub async fn workflow_steps(&self, workflow_id: i64) -> EngineResult<Vec<workflow_steps::Model>> {
        store::list_steps(&self.db, workflow_id).await
    }

    /// Add a step, validating the payload against its action kind
    ///
    /// Malformed payloads are rejected here rather than when the step fires.
    pub async fn add_step(&self, input: NewStep) -> EngineResult<workflow_steps::Model> {
        if input.delay_seconds < 0 {
            return Err(EngineError::invalid_data("delay must be non-negative"));
        }
        ActionPayload::parse(input.action_kind, &input.payload)?;

        store::insert_step(&self.db, input).await
    }

    /// Update a step, re-validating a replaced payload
    pub async fn update_step(
        &self,
        id: i64,
        input: StepUpdate,
    ) -> EngineResult<workflow_steps::Model> {
        if let Some(delay) = input.delay_seconds {
            if delay < 0 {
                return Err(EngineError::invalid_data("delay must be non-negative"));
            }
        }
        if let Some(payload) = &input.payload {
            let step = store::get_step(&self.db, id).await?;
            let kind = crate::types::ActionKind::from_str(&step.action_kind)
                .ok_or_else(|| EngineError::invalid_data("unknown action kind"))?;
            ActionPayload::parse(kind, payload)?;
        }

        store::update_step(&self.db, id, input).await
    }

    pub async fn delete_step(&self, id: i64) -> EngineResult<bool> {
        store::delete_step(&self.db, id).await
    }

    // ============================================
    // Execution
    // ============================================

    /// Dispatch a business event to every matching active workflow
    pub async fn dispatch(&self, event: &BusinessEvent) -> EngineResult<DispatchSummary> {
        self.dispatcher.dispatch(event).await
    }

    /// Start one workflow for one entity (manual trigger path)
    pub async fn start(&self, workflow_id: i64, entity_id: i64) -> EngineResult<StartOutcome> {
        self.scheduler.start(workflow_id, entity_id).await
    }

    /// Execute one step run immediately
    pub async fn execute_step(&self, step_run_id: i64) -> EngineResult<ExecutionOutcome> {
        self.executor.execute(step_run_id).await
    }

    /// Run a sweep pass for everything due at or before `now`
    pub async fn sweep_due(&self, now: NaiveDateTime) -> EngineResult<SweepOutcome> {
        self.sweeper.sweep_due(now).await
    }

    /// Cancel a run: skip its pending steps and finalize it
    ///
    /// Returns how many step runs were skipped. Cancelling an already
    /// terminal run only skips leftovers (normally zero) and changes nothing
    /// else.
    pub async fn cancel_run(&self, run_id: i64) -> EngineResult<u64> {
        store::get_run(&self.db, run_id).await?;

        let skipped = store::skip_pending_step_runs(&self.db, run_id, store::utc_now()).await?;
        let cancelled = store::mark_run_cancelled(&self.db, run_id).await?;
        if cancelled {
            info!(run_id, skipped, "workflow run cancelled");
        }

        Ok(skipped)
    }

    // ============================================
    // Inspection
    // ============================================

    pub async fn workflow_runs(&self, workflow_id: i64) -> EngineResult<Vec<workflow_runs::Model>> {
        store::runs_for_workflow(&self.db, workflow_id).await
    }

    /// A run and its step runs, in due-time order
    pub async fn run_detail(
        &self,
        run_id: i64,
    ) -> EngineResult<(workflow_runs::Model, Vec<crate::entities::step_runs::Model>)> {
        let run = store::get_run(&self.db, run_id).await?;
        let step_runs = store::step_runs_for_run(&self.db, run_id).await?;
        Ok((run, step_runs))
    }
}
