//! DTO definitions used by the admin REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Users whose CRM health score should be recomputed.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RecalculateHealthScoresRequest {
    /// Between 1 and 500 user ids.
    #[validate(length(min = 1, max = 500))]
    pub user_ids: Vec<Uuid>,
}

/// Outcome for one user of a batch recalculation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthScoreResult {
    /// User the result belongs to.
    pub user_id: Uuid,
    /// Value returned by the scoring procedure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Value>,
    /// Failure reported by the backend, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a batch recalculation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RecalculateHealthScoresResponse {
    /// Users whose score was recomputed.
    pub processed: usize,
    /// Users whose recomputation failed.
    pub failed: usize,
    /// Per-user outcome, in request order.
    pub results: Vec<HealthScoreResult>,
}
