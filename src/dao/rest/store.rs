use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, Response, header::HeaderValue};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::dao::{
    backend::{BackendResult, GroupBackend},
    models::{
        GROUPS_TABLE, GroupEntity, MESSAGES_TABLE, MessageEntity, PARTICIPANTS_TABLE,
        ParticipantEntity, VOTES_TABLE, VoteEntity,
    },
};

use super::{
    config::RestConfig,
    error::{ErrorBody, RestDaoError, RestResult},
};

const REST_PREFIX: &str = "rest/v1";
const RETURN_MINIMAL: &str = "return=minimal";
const MERGE_DUPLICATES: &str = "return=minimal,resolution=merge-duplicates";

/// Backend speaking the managed backend's PostgREST-style HTTP API.
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    base_url: Arc<str>,
    api_key: Arc<str>,
    bearer: Arc<str>,
}

impl RestBackend {
    /// Build the HTTP client for the configured project.
    pub fn connect(config: RestConfig) -> RestResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| RestDaoError::ClientBuilder { source })?;

        let bearer = config
            .bearer_token
            .clone()
            .unwrap_or_else(|| config.api_key.clone());

        Ok(Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            api_key: Arc::from(config.api_key),
            bearer: Arc::from(bearer),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, REST_PREFIX, path);
        self.client
            .request(method, url)
            .header("apikey", self.api_key.as_ref())
            .bearer_auth(self.bearer.as_ref())
    }

    async fn select<T>(&self, table: &str, query: &[(&str, String)]) -> RestResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, table)
            .query(query)
            .send()
            .await
            .map_err(|source| RestDaoError::RequestSend {
                path: table.to_string(),
                source,
            })?;

        let response = ensure_success(table, response).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|source| RestDaoError::DecodeResponse {
                path: table.to_string(),
                source,
            })
    }

    async fn insert<T>(&self, table: &str, row: &T, prefer: &'static str) -> RestResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::POST, table)
            .header("Prefer", HeaderValue::from_static(prefer))
            .json(row)
            .send()
            .await
            .map_err(|source| RestDaoError::RequestSend {
                path: table.to_string(),
                source,
            })?;

        ensure_success(table, response).await.map(|_| ())
    }

    async fn rpc(&self, name: &str, args: &Value) -> RestResult<Value> {
        let path = format!("rpc/{name}");
        let response = self
            .request(Method::POST, &path)
            .json(args)
            .send()
            .await
            .map_err(|source| RestDaoError::RequestSend {
                path: path.clone(),
                source,
            })?;

        let response = ensure_success(&path, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| RestDaoError::DecodeResponse {
                path: path.clone(),
                source,
            })?;
        // void procedures answer with an empty body
        Ok(serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

/// Turn error statuses into [`RestDaoError`], preferring the structured error body.
async fn ensure_success(path: &str, response: Response) -> RestResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match response.json::<ErrorBody>().await {
        Ok(ErrorBody {
            code: Some(code),
            message,
        }) => Err(RestDaoError::Rejected {
            path: path.to_string(),
            status,
            code,
            message: message.unwrap_or_default(),
        }),
        _ => Err(RestDaoError::RequestStatus {
            path: path.to_string(),
            status,
        }),
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

fn format_timestamp(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".into())
}

impl GroupBackend for RestBackend {
    fn fetch_group(&self, group_id: Uuid) -> BoxFuture<'static, BackendResult<Option<GroupEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rows = store
                .select::<GroupEntity>(
                    GROUPS_TABLE,
                    &[
                        ("select", "*".into()),
                        ("id", eq(group_id)),
                        ("limit", "1".into()),
                    ],
                )
                .await?;
            Ok(rows.into_iter().next())
        })
    }

    fn fetch_participants(
        &self,
        group_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rows = store
                .select(
                    PARTICIPANTS_TABLE,
                    &[
                        ("select", "*".into()),
                        ("group_id", eq(group_id)),
                        ("order", "joined_at.asc".into()),
                    ],
                )
                .await?;
            Ok(rows)
        })
    }

    fn fetch_messages(
        &self,
        group_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Vec<MessageEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rows = store
                .select(
                    MESSAGES_TABLE,
                    &[
                        ("select", "*".into()),
                        ("group_id", eq(group_id)),
                        ("order", "created_at.asc".into()),
                    ],
                )
                .await?;
            Ok(rows)
        })
    }

    fn fetch_votes(
        &self,
        group_id: Uuid,
        since: OffsetDateTime,
    ) -> BoxFuture<'static, BackendResult<Vec<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rows = store
                .select(
                    VOTES_TABLE,
                    &[
                        ("select", "*".into()),
                        ("group_id", eq(group_id)),
                        ("voted_at", format!("gte.{}", format_timestamp(since))),
                    ],
                )
                .await?;
            Ok(rows)
        })
    }

    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, BackendResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert(VOTES_TABLE, &vote, MERGE_DUPLICATES)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_message(&self, message: MessageEntity) -> BoxFuture<'static, BackendResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert(MESSAGES_TABLE, &message, RETURN_MINIMAL)
                .await
                .map_err(Into::into)
        })
    }

    fn upsert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, BackendResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert(PARTICIPANTS_TABLE, &participant, MERGE_DUPLICATES)
                .await
                .map_err(Into::into)
        })
    }

    fn call_procedure(&self, name: &str, args: Value) -> BoxFuture<'static, BackendResult<Value>> {
        let store = self.clone();
        let name = name.to_string();
        Box::pin(async move { store.rpc(&name, &args).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, BackendResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let response = store
                .request(Method::GET, "")
                .send()
                .await
                .map_err(|source| RestDaoError::RequestSend {
                    path: REST_PREFIX.to_string(),
                    source,
                })?;
            ensure_success(REST_PREFIX, response).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_use_postgrest_operators() {
        let id = Uuid::nil();
        assert_eq!(eq(id), "eq.00000000-0000-0000-0000-000000000000");
        assert_eq!(
            format_timestamp(OffsetDateTime::UNIX_EPOCH),
            "1970-01-01T00:00:00Z"
        );
    }

    #[test]
    fn connect_trims_trailing_slash_and_prefers_bearer_token() {
        let backend = RestBackend::connect(
            RestConfig::new("https://project.example.co/", "anon").with_bearer_token("service"),
        )
        .unwrap();
        assert_eq!(backend.base_url.as_ref(), "https://project.example.co");
        assert_eq!(backend.bearer.as_ref(), "service");
        assert_eq!(backend.api_key.as_ref(), "anon");
    }
}
