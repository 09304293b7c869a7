use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the group coordination service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::admin_stream,
        crate::routes::sse::group_stream,
        crate::routes::groups::get_group,
        crate::routes::groups::resync_group,
        crate::routes::groups::get_votes,
        crate::routes::groups::cast_vote,
        crate::routes::groups::send_message,
        crate::routes::groups::join_group,
        crate::routes::groups::leave_group,
        crate::routes::guards::throttle_status,
        crate::routes::guards::reset_throttle,
        crate::routes::guards::reset_rate_limit,
        crate::routes::admin::recalculate_health_scores,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::groups::GroupViewResponse,
            crate::dto::groups::TallyResponse,
            crate::dto::groups::VoteResponse,
            crate::dto::groups::MessageSummary,
            crate::dto::groups::ParticipantSummary,
            crate::dto::guards::ThrottleStatusResponse,
            crate::dto::guards::ActionResponse,
            crate::dto::admin::RecalculateHealthScoresResponse,
            crate::dao::models::GroupStatus,
            crate::dao::models::ParticipantStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "groups", description = "Group views, membership and chat"),
        (name = "votes", description = "Force-confirm voting"),
        (name = "guards", description = "Rate limiter and request throttler administration"),
        (name = "admin", description = "Dashboard operations"),
    )
)]
pub struct ApiDoc;
