//! Step execution
//!
//! Executes one due step run: replay guard, payload parse, action dispatch,
//! terminal bookkeeping, completion recompute. Idempotent by construction -
//! a terminal step run is never executed again, and the terminal write
//! itself is conditional for the window where two deliveries race.

use std::sync::Arc;
use tracing::{info, warn};

use crate::actions::{ActionContext, ActionOutcome, ActionRegistry};
use crate::completion;
use crate::database::DbConnection;
use crate::error::EngineResult;
use crate::external::{EntityStore, MessageDispatcher};
use crate::store;
use crate::types::{ActionKind, ActionPayload, StepRunStatus};

/// Result of one `execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The step ran (or was raced) and holds this terminal status
    Executed(StepRunStatus),
    /// The step was already terminal when loaded; nothing was done
    AlreadyTerminal(StepRunStatus),
}

/// Executes one step run against one entity
pub struct StepExecutor {
    db: DbConnection,
    registry: Arc<ActionRegistry>,
    context: ActionContext,
}

impl StepExecutor {
    pub fn new(
        db: DbConnection,
        registry: Arc<ActionRegistry>,
        entities: Arc<dyn EntityStore>,
        mailer: Arc<dyn MessageDispatcher>,
    ) -> Self {
        Self {
            db,
            registry,
            context: ActionContext { entities, mailer },
        }
    }

    /// Execute a step run by id
    ///
    /// Errors loading the step run, its run, or from the entity store
    /// propagate to the caller; malformed payloads and unknown owners become
    /// a failed step instead.
    pub async fn execute(&self, step_run_id: i64) -> EngineResult<ExecutionOutcome> {
        let step_run = store::get_step_run(&self.db, step_run_id).await?;

        let current = StepRunStatus::from_str(&step_run.status)
            .unwrap_or(StepRunStatus::Pending);
        if current.is_terminal() {
            return Ok(ExecutionOutcome::AlreadyTerminal(current));
        }

        let run = store::get_run(&self.db, step_run.run_id).await?;
        let step = store::get_step(&self.db, step_run.step_id).await?;

        let outcome = match self.perform(&step, run.entity_id).await? {
            ActionOutcome::Completed => (StepRunStatus::Completed, None),
            ActionOutcome::Failed { reason } => (StepRunStatus::Failed, Some(reason)),
        };
        let (status, error_message) = outcome;

        let claimed = store::mark_step_run_terminal(
            &self.db,
            step_run.id,
            status,
            error_message.clone(),
            store::utc_now(),
        )
        .await?;

        if !claimed {
            // A concurrent delivery wrote first; its recompute already ran.
            let reloaded = store::get_step_run(&self.db, step_run.id).await?;
            let status = StepRunStatus::from_str(&reloaded.status)
                .unwrap_or(StepRunStatus::Pending);
            return Ok(ExecutionOutcome::Executed(status));
        }

        match status {
            StepRunStatus::Failed => warn!(
                step_run_id,
                run_id = step_run.run_id,
                action = %step.action_kind,
                error = error_message.as_deref().unwrap_or(""),
                "step failed"
            ),
            _ => info!(
                step_run_id,
                run_id = step_run.run_id,
                action = %step.action_kind,
                "step executed"
            ),
        }

        completion::recompute(&self.db, step_run.run_id).await?;

        Ok(ExecutionOutcome::Executed(status))
    }

    /// Dispatch the step's action, converting payload problems into a failed
    /// outcome rather than an error
    async fn perform(
        &self,
        step: &crate::entities::workflow_steps::Model,
        entity_id: i64,
    ) -> EngineResult<ActionOutcome> {
        let Some(kind) = ActionKind::from_str(&step.action_kind) else {
            return Ok(ActionOutcome::failed("invalid action data"));
        };

        let payload = match ActionPayload::parse(kind, &step.payload) {
            Ok(payload) => payload,
            Err(_) => return Ok(ActionOutcome::failed("invalid action data")),
        };

        let handler = self.registry.get(kind)?;
        handler.execute(&self.context, entity_id, &payload).await
    }
}
