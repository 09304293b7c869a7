//! Admin operations feeding the dashboards.

use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::HEALTH_SCORE_PROCEDURE,
    dto::admin::{HealthScoreResult, RecalculateHealthScoresResponse},
    error::ServiceError,
    services::{event_bus::EVENT_HEALTH_SCORES_RECALCULATED, guard_service::ensure_writable},
    state::SharedState,
};

/// Recompute the health score of every user in `user_ids`, then signal dashboards to refresh.
///
/// Individual failures are reported per user and do not abort the batch.
pub async fn recalculate_health_scores(
    state: &SharedState,
    user_ids: Vec<Uuid>,
) -> Result<RecalculateHealthScoresResponse, ServiceError> {
    ensure_writable(state)?;

    let backend = state.backend();
    let calls = user_ids.iter().map(|user_id| {
        backend.call_procedure(HEALTH_SCORE_PROCEDURE, json!({ "user_id": user_id }))
    });
    let outcomes = join_all(calls).await;

    let results: Vec<HealthScoreResult> = user_ids
        .into_iter()
        .zip(outcomes)
        .map(|(user_id, outcome)| match outcome {
            Ok(score) => HealthScoreResult {
                user_id,
                score: Some(score),
                error: None,
            },
            Err(err) => {
                warn!(%user_id, error = %err, "health score recalculation failed");
                HealthScoreResult {
                    user_id,
                    score: None,
                    error: Some(err.to_string()),
                }
            }
        })
        .collect();

    let failed = results.iter().filter(|result| result.error.is_some()).count();
    let response = RecalculateHealthScoresResponse {
        processed: results.len() - failed,
        failed,
        results,
    };
    info!(
        processed = response.processed,
        failed = response.failed,
        "health scores recalculated"
    );
    state.bus().emit(
        EVENT_HEALTH_SCORES_RECALCULATED,
        json!({ "processed": response.processed, "failed": response.failed }),
    );

    Ok(response)
}
