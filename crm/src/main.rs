//! Cadence CLI
//!
//! Console entry points for the automation engine: migrations, the sweep
//! worker, manual triggers, and sample data.

mod bootstrap;
mod contacts;
mod mailer;
mod migrations;
mod seed;

use clap::{Parser, Subcommand};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use cadence_engine::schedule::Schedule;
use cadence_engine::{BusinessEvent, EngineError, EngineResult, TriggerKind};

use migrations::Migrator;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "CRM workflow automation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all pending database migrations
    Migrate,
    /// Drop all tables and re-run migrations
    #[command(name = "migrate:fresh")]
    MigrateFresh,
    /// Run one due-step sweep pass
    #[command(name = "sweep:run")]
    SweepRun,
    /// Run the schedule worker daemon (sweeps on an interval)
    #[command(name = "schedule:work")]
    ScheduleWork,
    /// Dispatch a business event, or start one workflow directly
    Trigger {
        /// Contact id the event is about
        #[arg(long)]
        contact: i64,

        /// Event kind: entity_created, stage_changed, manual, tag_added,
        /// entity_updated
        #[arg(long, default_value = "manual")]
        event: String,

        /// JSON object matched against workflow trigger filters
        #[arg(long)]
        payload: Option<String>,

        /// Start this workflow directly instead of matching by event
        #[arg(long)]
        workflow: Option<i64>,
    },
    /// Populate sample contacts and a Welcome workflow
    Seed,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(Cli::parse()).await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> EngineResult<()> {
    let app = bootstrap::bootstrap().await?;

    match cli.command {
        Commands::Migrate => {
            Migrator::up(app.db.inner(), None)
                .await
                .map_err(|e| EngineError::database(e.to_string()))?;
            println!("Migrations completed successfully");
        }
        Commands::MigrateFresh => {
            Migrator::fresh(app.db.inner())
                .await
                .map_err(|e| EngineError::database(e.to_string()))?;
            println!("Database refreshed successfully");
        }
        Commands::SweepRun => {
            let outcome = app
                .engine
                .sweep_due(chrono::Utc::now().naive_utc())
                .await?;
            println!(
                "Sweep finished: {} step(s) executed, {} error(s)",
                outcome.processed,
                outcome.errors.len()
            );
            for error in outcome.errors {
                eprintln!("  {}", error);
            }
        }
        Commands::ScheduleWork => {
            let mut schedule = Schedule::new();
            schedule.add(
                schedule
                    .task(app.engine.sweeper())
                    .every_seconds(app.config.sweep_interval_secs)
                    .name("automation:sweep")
                    .description("Recover and execute overdue workflow steps"),
            );
            schedule.work_loop(Duration::from_secs(1)).await
        }
        Commands::Trigger {
            contact,
            event,
            payload,
            workflow,
        } => {
            if let Some(workflow_id) = workflow {
                let outcome = app.engine.start(workflow_id, contact).await?;
                println!("Start outcome: {:?}", outcome);
            } else {
                let kind = TriggerKind::from_str(&event)
                    .ok_or_else(|| EngineError::invalid_data(format!("unknown event '{}'", event)))?;

                let mut business_event = BusinessEvent::new(kind, contact);
                if let Some(raw) = payload {
                    let value: serde_json::Value = serde_json::from_str(&raw)
                        .map_err(|e| EngineError::invalid_data(format!("payload: {}", e)))?;
                    match value {
                        serde_json::Value::Object(map) => {
                            business_event = business_event.with_payload(map);
                        }
                        _ => {
                            return Err(EngineError::invalid_data("payload must be a JSON object"))
                        }
                    }
                }

                let summary = app.engine.dispatch(&business_event).await?;
                println!(
                    "Dispatched: {} matched, {} started, {} already executed, {} failed",
                    summary.matched, summary.started, summary.already_executed, summary.failed
                );
            }

            // give immediate (zero-delay) steps a moment to fire
            tokio::time::sleep(Duration::from_millis(200)).await;
            app.engine.shutdown().await;
        }
        Commands::Seed => {
            seed::run(&app).await?;
        }
    }

    Ok(())
}
