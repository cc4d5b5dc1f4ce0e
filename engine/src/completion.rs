//! Run completion tracking
//!
//! Recomputed after every terminal step transition. The check is a pending-
//! sibling count followed by a single conditional update, so two steps
//! finishing at the same instant cannot complete the run twice and a
//! cancelled run is left alone.

use tracing::info;

use crate::database::DbConnection;
use crate::error::EngineResult;
use crate::store;

/// Complete the run if no step run is still pending
///
/// Returns true when this call performed the transition.
pub async fn recompute(db: &DbConnection, run_id: i64) -> EngineResult<bool> {
    let pending = store::count_pending_step_runs(db, run_id).await?;
    if pending > 0 {
        return Ok(false);
    }

    let completed = store::complete_run(db, run_id, store::utc_now()).await?;
    if completed {
        info!(run_id, "workflow run completed");
    }
    Ok(completed)
}
