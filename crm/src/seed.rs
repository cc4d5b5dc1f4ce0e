//! Sample data for local development
//!
//! Seeds a few contacts, an owner, and a "Welcome" workflow wired to the
//! entity-created trigger, so a fresh database has something to automate.

use cadence_engine::store::{NewStep, NewWorkflow};
use cadence_engine::{ActionKind, EngineResult, TriggerFilter, TriggerKind};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};

use crate::bootstrap::App;
use crate::contacts::{contacts, owners};

const DAY_SECONDS: i64 = 24 * 60 * 60;

pub async fn run(app: &App) -> EngineResult<()> {
    let now = Utc::now().naive_utc();

    let owner = owners::ActiveModel {
        name: Set("Sam Seller".to_string()),
        email: Set("sam@example.com".to_string()),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(app.db.inner())
    .await
    .map_err(cadence_engine::EngineError::from)?;

    for (first, last, email) in [
        ("Ada", "Lovelace", "ada@example.com"),
        ("Alan", "Turing", "alan@example.com"),
        ("Grace", "Hopper", "grace@example.com"),
    ] {
        contacts::ActiveModel {
            first_name: Set(first.to_string()),
            last_name: Set(last.to_string()),
            email: Set(email.to_string()),
            phone: Set(None),
            status: Set("lead".to_string()),
            tags: Set(String::new()),
            owner_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(app.db.inner())
        .await
        .map_err(cadence_engine::EngineError::from)?;
    }

    let workflow = app
        .engine
        .create_workflow(NewWorkflow {
            name: "Welcome".to_string(),
            description: "Greets new leads and follows up after three days".to_string(),
            trigger_kind: TriggerKind::EntityCreated,
            trigger_filter: TriggerFilter::default(),
            active: true,
        })
        .await?;

    app.engine
        .add_step(NewStep {
            workflow_id: workflow.id,
            step_order: 1,
            action_kind: ActionKind::SendMessage,
            delay_seconds: 0,
            payload: r#"{"template_id":1}"#.to_string(),
            enabled: true,
        })
        .await?;
    app.engine
        .add_step(NewStep {
            workflow_id: workflow.id,
            step_order: 2,
            action_kind: ActionKind::AddTag,
            delay_seconds: 3 * DAY_SECONDS,
            payload: r#"{"tag":"contacted"}"#.to_string(),
            enabled: true,
        })
        .await?;
    app.engine
        .add_step(NewStep {
            workflow_id: workflow.id,
            step_order: 3,
            action_kind: ActionKind::AssignOwner,
            delay_seconds: 7 * DAY_SECONDS,
            payload: format!(r#"{{"owner_id":{}}}"#, owner.id),
            enabled: true,
        })
        .await?;

    println!("Seeded 3 contacts, 1 owner, and the 'Welcome' workflow (id {})", workflow.id);
    Ok(())
}
