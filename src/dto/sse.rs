use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// A named frame queued for SSE delivery; `data` is already JSON.
#[derive(Clone, Debug)]
pub struct ServerEvent {
    /// SSE `event:` field.
    pub name: String,
    /// JSON payload for the `data:` field.
    pub data: String,
}

impl ServerEvent {
    /// Encode `payload` as the data of an event called `name`.
    pub fn encode<T>(name: impl Into<String>, payload: &T) -> serde_json::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self {
            name: name.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

/// First frame of every stream.
#[derive(Debug, Serialize, ToSchema)]
pub struct Handshake {
    /// `admin` or `group`.
    pub stream: String,
    /// Group whose views follow, for group streams.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    /// Whether backend health checks are currently failing.
    pub degraded: bool,
    /// RFC 3339 time at which the subscription was opened.
    pub connected_at: String,
}

/// Sent on the admin stream when degraded mode toggles.
#[derive(Debug, Serialize, ToSchema)]
pub struct SystemStatus {
    /// Whether the service is now degraded.
    pub degraded: bool,
    /// Consecutive failed health checks; zero once recovered.
    pub failed_checks: u32,
}
