//! Engine-wide error types
//!
//! A single error enum is used across the engine, in the spirit of the
//! lookup/validation/database split the callers care about: not-found errors
//! are never retried, invalid action data is recovered into a failed step,
//! and database errors are left to the job runtime's redelivery policy.

use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors that can occur inside the automation engine
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Workflow missing or inactive at lookup time
    #[error("Workflow {0} not found or inactive")]
    WorkflowNotFound(i64),

    /// Workflow run missing at lookup time
    #[error("Workflow run {0} not found")]
    RunNotFound(i64),

    /// Step definition missing at lookup time
    #[error("Workflow step {0} not found")]
    StepNotFound(i64),

    /// Step run missing at lookup time
    #[error("Step run {0} not found")]
    StepRunNotFound(i64),

    /// Entity missing in the entity store
    #[error("Entity {0} not found")]
    EntityNotFound(i64),

    /// Owner referenced by an assign action does not exist
    #[error("Owner {0} not found")]
    OwnerNotFound(i64),

    /// Malformed action payload or trigger filter
    #[error("Invalid action data: {0}")]
    InvalidActionData(String),

    /// A step with the same order already exists in the workflow
    #[error("Workflow {workflow_id} already has a step with order {order}")]
    DuplicateStepOrder { workflow_id: i64, order: i32 },

    /// Deletion refused while runs still reference the workflow
    #[error("Workflow {0} has runs and cannot be deleted")]
    WorkflowInUse(i64),

    /// No handler registered for an action kind
    #[error("No handler registered for action '{0}'")]
    UnsupportedAction(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Message dispatcher error
    #[error("Message dispatch error: {0}")]
    Dispatch(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create an InvalidActionData error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidActionData(message.into())
    }

    /// Create a Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a Dispatch error
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch(message.into())
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for the not-found family, which callers must not retry
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::WorkflowNotFound(_)
                | Self::RunNotFound(_)
                | Self::StepNotFound(_)
                | Self::StepRunNotFound(_)
                | Self::EntityNotFound(_)
                | Self::OwnerNotFound(_)
        )
    }
}

impl From<sea_orm::DbErr> for EngineError {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::Database(e.to_string())
    }
}
