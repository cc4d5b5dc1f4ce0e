//! Automation persistence helpers
//!
//! Thin operations over the four engine-owned tables. Status transitions
//! that may race (duplicate job delivery, concurrent completion, cancel vs.
//! complete) are expressed as single conditional updates so the database is
//! the arbiter, and run creation relies on the `(workflow_id, entity_id)`
//! unique index rather than check-then-create.

use chrono::{NaiveDateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    SqlErr,
};

use crate::database::DbConnection;
use crate::entities::{step_runs, workflow_runs, workflow_steps, workflows};
use crate::error::{EngineError, EngineResult};
use crate::types::{ActionKind, RunStatus, StepRunStatus, TriggerFilter, TriggerKind};

/// Current UTC timestamp in the naive form stored in the database
pub fn utc_now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

// ============================================
// Workflow definitions
// ============================================

/// Fields for a new workflow definition
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub name: String,
    pub description: String,
    pub trigger_kind: TriggerKind,
    pub trigger_filter: TriggerFilter,
    pub active: bool,
}

/// Partial update for a workflow definition
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger_kind: Option<TriggerKind>,
    pub trigger_filter: Option<TriggerFilter>,
}

pub async fn insert_workflow(
    db: &DbConnection,
    input: NewWorkflow,
) -> EngineResult<workflows::Model> {
    let now = utc_now();

    let model = workflows::ActiveModel {
        name: Set(input.name),
        description: Set(input.description),
        trigger_kind: Set(input.trigger_kind.as_str().to_string()),
        trigger_filter: Set(input.trigger_filter.to_raw()),
        active: Set(input.active),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    Ok(model.insert(db.inner()).await?)
}

pub async fn get_workflow(db: &DbConnection, id: i64) -> EngineResult<Option<workflows::Model>> {
    Ok(workflows::Entity::find_by_id(id).one(db.inner()).await?)
}

pub async fn list_workflows(db: &DbConnection) -> EngineResult<Vec<workflows::Model>> {
    Ok(workflows::Entity::find()
        .order_by_desc(workflows::Column::CreatedAt)
        .all(db.inner())
        .await?)
}

/// Active workflow definitions for a trigger kind
pub async fn active_workflows_for(
    db: &DbConnection,
    kind: TriggerKind,
) -> EngineResult<Vec<workflows::Model>> {
    Ok(workflows::Entity::find()
        .filter(workflows::Column::TriggerKind.eq(kind.as_str()))
        .filter(workflows::Column::Active.eq(true))
        .all(db.inner())
        .await?)
}

pub async fn update_workflow(
    db: &DbConnection,
    id: i64,
    input: WorkflowUpdate,
) -> EngineResult<workflows::Model> {
    let model = get_workflow(db, id)
        .await?
        .ok_or(EngineError::WorkflowNotFound(id))?;

    let mut active: workflows::ActiveModel = model.into();
    if let Some(name) = input.name {
        active.name = Set(name);
    }
    if let Some(description) = input.description {
        active.description = Set(description);
    }
    if let Some(kind) = input.trigger_kind {
        active.trigger_kind = Set(kind.as_str().to_string());
    }
    if let Some(filter) = input.trigger_filter {
        active.trigger_filter = Set(filter.to_raw());
    }
    active.updated_at = Set(utc_now());

    Ok(active.update(db.inner()).await?)
}

pub async fn set_workflow_active(db: &DbConnection, id: i64, active: bool) -> EngineResult<()> {
    let model = get_workflow(db, id)
        .await?
        .ok_or(EngineError::WorkflowNotFound(id))?;

    let mut am: workflows::ActiveModel = model.into();
    am.active = Set(active);
    am.updated_at = Set(utc_now());
    am.update(db.inner()).await?;

    Ok(())
}

/// Delete a workflow and its step definitions
///
/// Refused while any run references the workflow.
pub async fn delete_workflow(db: &DbConnection, id: i64) -> EngineResult<()> {
    if get_workflow(db, id).await?.is_none() {
        return Err(EngineError::WorkflowNotFound(id));
    }

    let runs = workflow_runs::Entity::find()
        .filter(workflow_runs::Column::WorkflowId.eq(id))
        .count(db.inner())
        .await?;
    if runs > 0 {
        return Err(EngineError::WorkflowInUse(id));
    }

    workflow_steps::Entity::delete_many()
        .filter(workflow_steps::Column::WorkflowId.eq(id))
        .exec(db.inner())
        .await?;
    workflows::Entity::delete_by_id(id).exec(db.inner()).await?;

    Ok(())
}

// ============================================
// Step definitions
// ============================================

/// Fields for a new workflow step
///
/// The payload is stored as given; callers validate it against the action
/// kind before inserting.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub workflow_id: i64,
    pub step_order: i32,
    pub action_kind: ActionKind,
    pub delay_seconds: i64,
    pub payload: String,
    pub enabled: bool,
}

/// Partial update for a workflow step
#[derive(Debug, Clone, Default)]
pub struct StepUpdate {
    pub delay_seconds: Option<i64>,
    pub payload: Option<String>,
    pub enabled: Option<bool>,
}

pub async fn insert_step(db: &DbConnection, input: NewStep) -> EngineResult<workflow_steps::Model> {
    let model = workflow_steps::ActiveModel {
        workflow_id: Set(input.workflow_id),
        step_order: Set(input.step_order),
        action_kind: Set(input.action_kind.as_str().to_string()),
        delay_seconds: Set(input.delay_seconds),
        payload: Set(input.payload),
        enabled: Set(input.enabled),
        created_at: Set(utc_now()),
        ..Default::default()
    };

    match model.insert(db.inner()).await {
        Ok(step) => Ok(step),
        Err(err) if is_unique_violation(&err) => Err(EngineError::DuplicateStepOrder {
            workflow_id: input.workflow_id,
            order: input.step_order,
        }),
        Err(err) => Err(err.into()),
    }
}

pub async fn get_step(db: &DbConnection, id: i64) -> EngineResult<workflow_steps::Model> {
    workflow_steps::Entity::find_by_id(id)
        .one(db.inner())
        .await?
        .ok_or(EngineError::StepNotFound(id))
}

pub async fn list_steps(
    db: &DbConnection,
    workflow_id: i64,
) -> EngineResult<Vec<workflow_steps::Model>> {
    Ok(workflow_steps::Entity::find()
        .filter(workflow_steps::Column::WorkflowId.eq(workflow_id))
        .order_by_asc(workflow_steps::Column::StepOrder)
        .all(db.inner())
        .await?)
}

/// Enabled steps of a workflow, in execution order
pub async fn enabled_steps(
    db: &DbConnection,
    workflow_id: i64,
) -> EngineResult<Vec<workflow_steps::Model>> {
    Ok(workflow_steps::Entity::find()
        .filter(workflow_steps::Column::WorkflowId.eq(workflow_id))
        .filter(workflow_steps::Column::Enabled.eq(true))
        .order_by_asc(workflow_steps::Column::StepOrder)
        .all(db.inner())
        .await?)
}

pub async fn update_step(
    db: &DbConnection,
    id: i64,
    input: StepUpdate,
) -> EngineResult<workflow_steps::Model> {
    let model = get_step(db, id).await?;

    if input.delay_seconds.is_none() && input.payload.is_none() && input.enabled.is_none() {
        return Ok(model);
    }

    let mut active: workflow_steps::ActiveModel = model.into();
    if let Some(delay) = input.delay_seconds {
        active.delay_seconds = Set(delay);
    }
    if let Some(payload) = input.payload {
        active.payload = Set(payload);
    }
    if let Some(enabled) = input.enabled {
        active.enabled = Set(enabled);
    }

    Ok(active.update(db.inner()).await?)
}

pub async fn delete_step(db: &DbConnection, id: i64) -> EngineResult<bool> {
    let result = workflow_steps::Entity::delete_by_id(id)
        .exec(db.inner())
        .await?;
    Ok(result.rows_affected > 0)
}

// ============================================
// Workflow runs
// ============================================

/// Atomically get or create the run for `(workflow_id, entity_id)`
///
/// Returns the run and whether it was created by this call. A concurrent
/// creator loses the insert on the unique index and reads the winner's row.
pub async fn get_or_create_run(
    db: &DbConnection,
    workflow_id: i64,
    entity_id: i64,
    started_at: NaiveDateTime,
) -> EngineResult<(workflow_runs::Model, bool)> {
    let model = workflow_runs::ActiveModel {
        workflow_id: Set(workflow_id),
        entity_id: Set(entity_id),
        status: Set(RunStatus::Pending.as_str().to_string()),
        started_at: Set(started_at),
        completed_at: Set(None),
        ..Default::default()
    };

    match model.insert(db.inner()).await {
        Ok(run) => Ok((run, true)),
        Err(err) if is_unique_violation(&err) => {
            let existing = run_for_target(db, workflow_id, entity_id)
                .await?
                .ok_or_else(|| {
                    EngineError::database("run vanished after unique-constraint conflict")
                })?;
            Ok((existing, false))
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn get_run(db: &DbConnection, id: i64) -> EngineResult<workflow_runs::Model> {
    workflow_runs::Entity::find_by_id(id)
        .one(db.inner())
        .await?
        .ok_or(EngineError::RunNotFound(id))
}

pub async fn run_for_target(
    db: &DbConnection,
    workflow_id: i64,
    entity_id: i64,
) -> EngineResult<Option<workflow_runs::Model>> {
    Ok(workflow_runs::Entity::find()
        .filter(workflow_runs::Column::WorkflowId.eq(workflow_id))
        .filter(workflow_runs::Column::EntityId.eq(entity_id))
        .one(db.inner())
        .await?)
}

pub async fn runs_for_workflow(
    db: &DbConnection,
    workflow_id: i64,
) -> EngineResult<Vec<workflow_runs::Model>> {
    Ok(workflow_runs::Entity::find()
        .filter(workflow_runs::Column::WorkflowId.eq(workflow_id))
        .order_by_desc(workflow_runs::Column::StartedAt)
        .all(db.inner())
        .await?)
}

pub async fn mark_run_in_progress(
    db: &DbConnection,
    run: workflow_runs::Model,
) -> EngineResult<workflow_runs::Model> {
    let mut active: workflow_runs::ActiveModel = run.into();
    active.status = Set(RunStatus::InProgress.as_str().to_string());
    Ok(active.update(db.inner()).await?)
}

/// Transition a run to completed, exactly once
///
/// Conditional on the run still being live, so concurrent completers write
/// once and a cancelled run is never overwritten.
pub async fn complete_run(
    db: &DbConnection,
    run_id: i64,
    completed_at: NaiveDateTime,
) -> EngineResult<bool> {
    let result = workflow_runs::Entity::update_many()
        .col_expr(
            workflow_runs::Column::Status,
            Expr::value(RunStatus::Completed.as_str()),
        )
        .col_expr(
            workflow_runs::Column::CompletedAt,
            Expr::value(Some(completed_at)),
        )
        .filter(workflow_runs::Column::Id.eq(run_id))
        .filter(workflow_runs::Column::Status.is_in([
            RunStatus::Pending.as_str(),
            RunStatus::InProgress.as_str(),
        ]))
        .exec(db.inner())
        .await?;

    Ok(result.rows_affected > 0)
}

/// Transition a run to cancelled unless it already reached a terminal state
pub async fn mark_run_cancelled(db: &DbConnection, run_id: i64) -> EngineResult<bool> {
    let result = workflow_runs::Entity::update_many()
        .col_expr(
            workflow_runs::Column::Status,
            Expr::value(RunStatus::Cancelled.as_str()),
        )
        .filter(workflow_runs::Column::Id.eq(run_id))
        .filter(workflow_runs::Column::Status.is_in([
            RunStatus::Pending.as_str(),
            RunStatus::InProgress.as_str(),
        ]))
        .exec(db.inner())
        .await?;

    Ok(result.rows_affected > 0)
}

// ============================================
// Step runs
// ============================================

pub async fn insert_step_run(
    db: &DbConnection,
    run_id: i64,
    step_id: i64,
    scheduled_for: NaiveDateTime,
) -> EngineResult<step_runs::Model> {
    let model = step_runs::ActiveModel {
        run_id: Set(run_id),
        step_id: Set(step_id),
        status: Set(StepRunStatus::Pending.as_str().to_string()),
        scheduled_for: Set(scheduled_for),
        executed_at: Set(None),
        error_message: Set(None),
        ..Default::default()
    };

    Ok(model.insert(db.inner()).await?)
}

pub async fn get_step_run(db: &DbConnection, id: i64) -> EngineResult<step_runs::Model> {
    step_runs::Entity::find_by_id(id)
        .one(db.inner())
        .await?
        .ok_or(EngineError::StepRunNotFound(id))
}

/// Step runs of a run, in due-time order
pub async fn step_runs_for_run(
    db: &DbConnection,
    run_id: i64,
) -> EngineResult<Vec<step_runs::Model>> {
    Ok(step_runs::Entity::find()
        .filter(step_runs::Column::RunId.eq(run_id))
        .order_by_asc(step_runs::Column::ScheduledFor)
        .all(db.inner())
        .await?)
}

/// Write a terminal status for a step run, exactly once
///
/// Returns false when the row was already terminal; duplicate deliveries and
/// the sweeper both funnel through this guard.
pub async fn mark_step_run_terminal(
    db: &DbConnection,
    id: i64,
    status: StepRunStatus,
    error_message: Option<String>,
    executed_at: NaiveDateTime,
) -> EngineResult<bool> {
    debug_assert!(status.is_terminal());

    let result = step_runs::Entity::update_many()
        .col_expr(step_runs::Column::Status, Expr::value(status.as_str()))
        .col_expr(
            step_runs::Column::ExecutedAt,
            Expr::value(Some(executed_at)),
        )
        .col_expr(step_runs::Column::ErrorMessage, Expr::value(error_message))
        .filter(step_runs::Column::Id.eq(id))
        .filter(step_runs::Column::Status.eq(StepRunStatus::Pending.as_str()))
        .exec(db.inner())
        .await?;

    Ok(result.rows_affected > 0)
}

/// Mark every pending step run of a run as skipped
pub async fn skip_pending_step_runs(
    db: &DbConnection,
    run_id: i64,
    executed_at: NaiveDateTime,
) -> EngineResult<u64> {
    let result = step_runs::Entity::update_many()
        .col_expr(
            step_runs::Column::Status,
            Expr::value(StepRunStatus::Skipped.as_str()),
        )
        .col_expr(
            step_runs::Column::ExecutedAt,
            Expr::value(Some(executed_at)),
        )
        .filter(step_runs::Column::RunId.eq(run_id))
        .filter(step_runs::Column::Status.eq(StepRunStatus::Pending.as_str()))
        .exec(db.inner())
        .await?;

    Ok(result.rows_affected)
}

pub async fn count_pending_step_runs(db: &DbConnection, run_id: i64) -> EngineResult<u64> {
    Ok(step_runs::Entity::find()
        .filter(step_runs::Column::RunId.eq(run_id))
        .filter(step_runs::Column::Status.eq(StepRunStatus::Pending.as_str()))
        .count(db.inner())
        .await?)
}

/// Pending step runs whose due time has passed, oldest first
pub async fn due_step_runs(
    db: &DbConnection,
    now: NaiveDateTime,
) -> EngineResult<Vec<step_runs::Model>> {
    Ok(step_runs::Entity::find()
        .filter(step_runs::Column::Status.eq(StepRunStatus::Pending.as_str()))
        .filter(step_runs::Column::ScheduledFor.lte(now))
        .order_by_asc(step_runs::Column::ScheduledFor)
        .all(db.inner())
        .await?)
}
