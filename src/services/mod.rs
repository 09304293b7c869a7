/// Admin operations such as batch health-score recalculation.
pub mod admin_service;
/// Backend health supervision and degraded mode.
pub mod backend_supervisor;
/// OpenAPI documentation generation.
pub mod documentation;
/// In-process analytics/debug signal bus.
pub mod event_bus;
/// Group views, membership and chat.
pub mod group_service;
/// Realtime synchronisation of mounted group views.
pub mod group_sync;
/// Rate limiting and throttling gates.
pub mod guard_service;
/// Health check service.
pub mod health_service;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Force-confirm voting.
pub mod voting;
