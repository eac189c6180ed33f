//! [`RemoteStore`] over HTTP.
//!
//! Routes, relative to the configured base URL:
//!
//! - `GET    /owners/{owner}/{collection}` returns a JSON array of entities
//! - `PUT    /owners/{owner}/{collection}/{id}` upserts one entity
//! - `DELETE /owners/{owner}/{collection}/{id}` removes one entity; 404 counts
//!   as already deleted
//!
//! Entities travel in their tagged form (`"entityType": "book"`, ...).

use crate::config::{Config, ConfigError};
use crate::error::NetworkError;
use crate::store::RemoteStore;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use shelf_engine::{Entity, EntityType};
use std::time::Duration;

/// Client for the canonical service.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url).map_err(|_| ConfigError::Invalid("SHELF_REMOTE_URL"))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid("SHELF_REMOTE_URL"));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(
            &config.remote_url,
            config.auth_token.clone(),
            config.request_timeout,
        )
    }

    fn url(&self, entity_type: EntityType, owner_id: &str, entity_id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        // `cannot_be_a_base` was rejected in `new`, so segments are always available.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("owners")
                .push(owner_id)
                .push(entity_type.collection_name());
            if let Some(id) = entity_id {
                segments.push(id);
            }
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn put(&self, entity: &Entity) -> Result<(), NetworkError> {
        let url = self.url(entity.entity_type(), entity.owner_id(), Some(entity.id()));
        let response = self
            .authorized(self.client.put(url))
            .json(entity)
            .send()
            .await?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<(), NetworkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(rejected(status, response).await)
}

async fn rejected(status: StatusCode, response: reqwest::Response) -> NetworkError {
    let message = response.text().await.unwrap_or_default();
    NetworkError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create(&self, entity: &Entity) -> Result<(), NetworkError> {
        self.put(entity).await
    }

    async fn update(&self, entity: &Entity) -> Result<(), NetworkError> {
        self.put(entity).await
    }

    async fn delete(
        &self,
        entity_type: EntityType,
        owner_id: &str,
        entity_id: &str,
    ) -> Result<(), NetworkError> {
        let url = self.url(entity_type, owner_id, Some(entity_id));
        let response = self.authorized(self.client.delete(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await
    }

    async fn fetch_all(
        &self,
        entity_type: EntityType,
        owner_id: &str,
    ) -> Result<Vec<Entity>, NetworkError> {
        let url = self.url(entity_type, owner_id, None);
        let response = self.authorized(self.client.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(rejected(status, response).await);
        }

        let entities: Vec<Entity> = response.json().await?;
        if let Some(stray) = entities.iter().find(|e| e.entity_type() != entity_type) {
            return Err(NetworkError::Decode(format!(
                "expected {} entities, got {} '{}'",
                entity_type,
                stray.entity_type(),
                stray.id()
            )));
        }
        Ok(entities)
    }
}
