//! Trigger dispatch
//!
//! Subscribes the engine to business events: find every active workflow
//! whose trigger kind and filter match the event, and start it for the
//! event's entity. One workflow failing to schedule never blocks the others.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::DbConnection;
use crate::error::EngineResult;
use crate::scheduler::{RunScheduler, StartOutcome};
use crate::store;
use crate::types::{TriggerFilter, TriggerKind};

/// A business event produced by the surrounding CRM
#[derive(Debug, Clone)]
pub struct BusinessEvent {
    pub kind: TriggerKind,
    pub entity_id: i64,
    pub payload: Map<String, Value>,
}

impl BusinessEvent {
    pub fn new(kind: TriggerKind, entity_id: i64) -> Self {
        Self {
            kind,
            entity_id,
            payload: Map::new(),
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }
}

/// What one dispatch did, per matching workflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Workflows whose trigger kind and filter matched the event
    pub matched: usize,
    /// Runs scheduled (including empty workflows completed on the spot)
    pub started: usize,
    /// Duplicate deliveries swallowed by the run-per-target guard
    pub already_executed: usize,
    /// Workflows that failed to schedule; logged and skipped
    pub failed: usize,
}

/// Routes business events to matching workflows
pub struct TriggerDispatcher {
    db: DbConnection,
    scheduler: Arc<RunScheduler>,
}

impl TriggerDispatcher {
    pub fn new(db: DbConnection, scheduler: Arc<RunScheduler>) -> Self {
        Self { db, scheduler }
    }

    /// Dispatch an event to every matching active workflow
    ///
    /// Scheduling failures are isolated per workflow: logged, counted, and
    /// never allowed to prevent the remaining matches from starting.
    pub async fn dispatch(&self, event: &BusinessEvent) -> EngineResult<DispatchSummary> {
        let workflows = store::active_workflows_for(&self.db, event.kind).await?;
        let mut summary = DispatchSummary::default();

        for workflow in workflows {
            let filter = match TriggerFilter::parse(&workflow.trigger_filter) {
                Ok(filter) => filter,
                Err(err) => {
                    warn!(
                        workflow_id = workflow.id,
                        error = %err,
                        "skipping workflow with unreadable trigger filter"
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            if !filter.matches(&event.payload) {
                continue;
            }
            summary.matched += 1;

            match self.scheduler.start(workflow.id, event.entity_id).await {
                Ok(StartOutcome::Scheduled { .. }) | Ok(StartOutcome::CompletedEmpty { .. }) => {
                    summary.started += 1;
                }
                Ok(StartOutcome::AlreadyExecuted { .. }) => {
                    summary.already_executed += 1;
                }
                Err(err) => {
                    warn!(
                        workflow_id = workflow.id,
                        entity_id = event.entity_id,
                        error = %err,
                        "failed to start workflow for event"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            kind = event.kind.as_str(),
            entity_id = event.entity_id,
            matched = summary.matched,
            started = summary.started,
            "event dispatched"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::TestDatabase;
    use crate::entities::workflows;
    use crate::jobs::RecordingJobRuntime;
    use crate::migrations::Migrator;
    use crate::store::{NewStep, NewWorkflow};
    use crate::types::ActionKind;
    use pretty_assertions::assert_eq;
    use sea_orm::{ActiveModelTrait, Set};
    use serde_json::json;

    struct Setup {
        _db: TestDatabase,
        conn: DbConnection,
        dispatcher: TriggerDispatcher,
    }

    async fn setup() -> Setup {
        let db = TestDatabase::fresh::<Migrator>().await.unwrap();
        let conn = db.conn();
        let scheduler = Arc::new(RunScheduler::new(conn.clone(), RecordingJobRuntime::new()));
        let dispatcher = TriggerDispatcher::new(conn.clone(), scheduler);
        Setup {
            _db: db,
            conn,
            dispatcher,
        }
    }

    async fn add_workflow(conn: &DbConnection, name: &str, filter: &str) -> i64 {
        let workflow = store::insert_workflow(
            conn,
            NewWorkflow {
                name: name.to_string(),
                description: String::new(),
                trigger_kind: TriggerKind::TagAdded,
                trigger_filter: TriggerFilter::parse(filter).unwrap(),
                active: true,
            },
        )
        .await
        .unwrap();

        store::insert_step(
            conn,
            NewStep {
                workflow_id: workflow.id,
                step_order: 1,
                action_kind: ActionKind::Wait,
                delay_seconds: 60,
                payload: String::new(),
                enabled: true,
            },
        )
        .await
        .unwrap();

        workflow.id
    }

    fn tag_event(entity_id: i64, tag: &str) -> BusinessEvent {
        let payload = match json!({ "tag": tag }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        BusinessEvent::new(TriggerKind::TagAdded, entity_id).with_payload(payload)
    }

    #[tokio::test]
    async fn dispatch_matches_kind_and_filter() {
        let s = setup().await;
        let sales = add_workflow(&s.conn, "Sales follow-up", r#"{"tag":"sales"}"#).await;
        let _support = add_workflow(&s.conn, "Support follow-up", r#"{"tag":"support"}"#).await;
        let catch_all = add_workflow(&s.conn, "Any tag", "").await;

        let summary = s.dispatcher.dispatch(&tag_event(1, "sales")).await.unwrap();
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.started, 2);
        assert_eq!(summary.failed, 0);

        assert!(store::run_for_target(&s.conn, sales, 1)
            .await
            .unwrap()
            .is_some());
        assert!(store::run_for_target(&s.conn, catch_all, 1)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn events_of_other_kinds_do_not_match() {
        let s = setup().await;
        let workflow = add_workflow(&s.conn, "Tag only", "").await;

        let summary = s
            .dispatcher
            .dispatch(&BusinessEvent::new(TriggerKind::EntityCreated, 1))
            .await
            .unwrap();
        assert_eq!(summary.matched, 0);
        assert!(store::run_for_target(&s.conn, workflow, 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn concurrent_duplicate_dispatch_creates_one_run() {
        let s = setup().await;
        let workflow = add_workflow(&s.conn, "Welcome", "").await;
        let event = tag_event(5, "sales");

        let (a, b) = tokio::join!(s.dispatcher.dispatch(&event), s.dispatcher.dispatch(&event));
        let (a, b) = (a.unwrap(), b.unwrap());

        // Both deliveries are handled; a run still pending when the second
        // arrives is re-scheduled, never duplicated.
        assert_eq!(a.matched, 1);
        assert_eq!(b.matched, 1);
        assert!(a.started + b.started >= 1);
        assert_eq!(a.failed + b.failed, 0);

        let runs = store::runs_for_workflow(&s.conn, workflow).await.unwrap();
        assert_eq!(runs.len(), 1, "at most one run per (workflow, entity)");
    }

    #[tokio::test]
    async fn a_broken_workflow_does_not_block_the_others() {
        let s = setup().await;

        // a row with an unreadable filter, as definition-time validation
        // would have rejected
        let now = store::utc_now();
        workflows::ActiveModel {
            name: Set("Broken".to_string()),
            description: Set(String::new()),
            trigger_kind: Set(TriggerKind::TagAdded.as_str().to_string()),
            trigger_filter: Set("not-json".to_string()),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(s.conn.inner())
        .await
        .unwrap();

        let healthy = add_workflow(&s.conn, "Healthy", "").await;

        let summary = s.dispatcher.dispatch(&tag_event(1, "sales")).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.started, 1);
        assert!(store::run_for_target(&s.conn, healthy, 1)
            .await
            .unwrap()
            .is_some());
    }
}
