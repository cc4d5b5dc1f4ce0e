//! Cadence: a rule-driven workflow automation engine for CRM systems
//!
//! When a business event occurs (an entity is created, a pipeline stage
//! changes, a tag is applied), the engine finds every active workflow whose
//! trigger matches and runs its steps - send a message, mutate a field,
//! wait - against the triggering entity, each at its own delay from the
//! trigger instant.
//!
//! The engine owns four tables (workflow definitions, step definitions,
//! runs, step runs) and talks to the surrounding CRM only through the
//! [`external::EntityStore`] and [`external::MessageDispatcher`] traits.
//! Delayed delivery goes through a [`jobs::JobRuntime`]; the
//! [`sweeper::DueStepSweeper`] recovers anything the runtime loses to a
//! restart or a failed submission.
//!
//! ```rust,ignore
//! use cadence_engine::{AutomationEngine, BusinessEvent, TriggerKind};
//!
//! let engine = AutomationEngine::new(db, entities, mailer, &config);
//! engine
//!     .dispatch(&BusinessEvent::new(TriggerKind::EntityCreated, contact_id))
//!     .await?;
//! ```

pub mod actions;
pub mod completion;
pub mod config;
pub mod database;
pub mod engine;
pub mod entities;
pub mod error;
pub mod executor;
pub mod external;
pub mod jobs;
pub mod migrations;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod sweeper;
pub mod triggers;
pub mod types;

pub use config::AutomationConfig;
pub use database::{DatabaseConfig, DbConnection};
pub use engine::AutomationEngine;
pub use error::{EngineError, EngineResult};
pub use external::{Entity, EntityStore, MessageDispatcher};
pub use jobs::{JobRuntime, StepJob};
pub use scheduler::StartOutcome;
pub use triggers::{BusinessEvent, DispatchSummary};
pub use types::{ActionKind, ActionPayload, RunStatus, StepRunStatus, TriggerFilter, TriggerKind};
