//! Remote graph-protocol backend
//!
//! Talks JSON over HTTP to a graph server exposing the store primitives
//! (`/v1/entities`, `/v1/sources`, `/v1/mentions`, `/v1/graph/export`).
//! Transport failures are retried with bounded exponential backoff before
//! surfacing as `BackendUnavailable`; `NotFound`, `Conflict`, and
//! `Validation` responses are mapped back onto the error taxonomy and are
//! never retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    Entity, EntityId, EventType, GraphExport, MentionStats, Source, SourceId,
};

use super::GraphStore;

/// Remote graph store client
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    user: Option<String>,
    password: Option<String>,
    retry_attempts: u32,
    retry_base_ms: u64,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

/// Map a non-success response onto the error taxonomy.
fn error_for_status(status: StatusCode, detail: String) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::not_found(detail),
        StatusCode::CONFLICT => Error::conflict(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::validation(detail),
        _ => Error::backend_unavailable(format!("remote returned {status}: {detail}")),
    }
}

impl RemoteStore {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: config.remote_url.trim_end_matches('/').to_string(),
            user: config.remote_user.clone(),
            password: config.remote_password.clone(),
            retry_attempts: config.remote_retry_attempts.max(1),
            retry_base_ms: config.remote_retry_base_ms,
        })
    }

    fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_base_ms << attempt)
    }

    /// Issue one request, retrying transport-level failures (connect or
    /// timeout, where the request may never have reached the server) with
    /// bounded backoff. Protocol errors are mapped and returned immediately.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..self.retry_attempts {
            let mut req = self.client.request(method.clone(), &url);
            if let Some(user) = &self.user {
                req = req.basic_auth(user, self.password.as_deref());
            }
            if let Some(body) = &body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(resp) => {
                    if resp.status().is_success() {
                        return Ok(resp);
                    }
                    let status = resp.status();
                    let detail = resp.text().await.unwrap_or_default();
                    return Err(error_for_status(status, detail));
                }
                Err(err) if (err.is_connect() || err.is_timeout())
                    && attempt + 1 < self.retry_attempts =>
                {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        url = %url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "remote graph unreachable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(Error::backend_unavailable(format!(
            "remote graph unreachable after {} attempts: {url}",
            self.retry_attempts
        )))
    }
}

#[async_trait]
impl GraphStore for RemoteStore {
    async fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        now: DateTime<Utc>,
    ) -> Result<EntityId> {
        // Validate locally so malformed keys never travel.
        EntityId::derive(name, entity_type)?;
        let resp = self
            .request(
                Method::POST,
                "/v1/entities/upsert",
                Some(json!({ "name": name, "entity_type": entity_type, "now": now })),
            )
            .await?;
        let body: IdResponse = resp.json().await?;
        EntityId::from_raw(body.id)
    }

    async fn add_mention(
        &self,
        entity_id: &EntityId,
        source_id: &SourceId,
        weight: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.request(
            Method::POST,
            "/v1/mentions",
            Some(json!({
                "entity_id": entity_id,
                "source_id": source_id,
                "weight": weight,
                "now": now,
            })),
        )
        .await?;
        Ok(())
    }

    async fn create_source(
        &self,
        id: &SourceId,
        payload: &str,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> Result<SourceId> {
        self.request(
            Method::POST,
            "/v1/sources",
            Some(json!({
                "id": id,
                "payload": payload,
                "event_type": event_type,
                "now": now,
            })),
        )
        .await?;
        Ok(id.clone())
    }

    async fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        match self
            .request(Method::GET, &format!("/v1/entities/{id}"), None)
            .await
        {
            Ok(resp) => Ok(Some(resp.json().await?)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get_source(&self, id: &SourceId) -> Result<Option<Source>> {
        match self
            .request(Method::GET, &format!("/v1/sources/{id}"), None)
            .await
        {
            Ok(resp) => Ok(Some(resp.json().await?)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list_entities(&self, include_archived: bool) -> Result<Vec<Entity>> {
        let resp = self
            .request(
                Method::GET,
                &format!("/v1/entities?include_archived={include_archived}"),
                None,
            )
            .await?;
        Ok(resp.json().await?)
    }

    async fn sources_for(&self, entity_id: &EntityId, limit: usize) -> Result<Vec<Source>> {
        let resp = self
            .request(
                Method::GET,
                &format!("/v1/entities/{entity_id}/sources?limit={limit}"),
                None,
            )
            .await?;
        Ok(resp.json().await?)
    }

    async fn mention_stats(&self, entity_id: &EntityId) -> Result<MentionStats> {
        let resp = self
            .request(
                Method::GET,
                &format!("/v1/entities/{entity_id}/mentions/stats"),
                None,
            )
            .await?;
        Ok(resp.json().await?)
    }

    async fn update_scores(
        &self,
        entity_id: &EntityId,
        decay: f64,
        importance: f64,
    ) -> Result<()> {
        self.request(
            Method::PUT,
            &format!("/v1/entities/{entity_id}/scores"),
            Some(json!({ "decay_score": decay, "importance": importance })),
        )
        .await?;
        Ok(())
    }

    async fn set_archived(&self, entity_id: &EntityId, archived: bool) -> Result<()> {
        self.request(
            Method::PUT,
            &format!("/v1/entities/{entity_id}/archived"),
            Some(json!({ "archived": archived })),
        )
        .await?;
        Ok(())
    }

    async fn export_graph(&self) -> Result<GraphExport> {
        let resp = self.request(Method::GET, "/v1/graph/export", None).await?;
        let export: GraphExport = resp.json().await?;
        Ok(export.normalize())
    }
}
