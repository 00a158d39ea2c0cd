//! HTTP Remote Backend
//!
//! `RemoteBackend` over a REST API:
//!
//! - `POST   {base}/{table}` with an `Idempotency-Key` header
//! - `PATCH  {base}/{table}/{id}`
//! - `DELETE {base}/{table}/{id}`
//!
//! 5xx and 429 responses are transient; any other non-success status is a
//! rejection of the payload.

use crate::client::sync::executor::{RemoteBackend, RemoteError};
use crate::shared::{ConfigError, EntityTable, FieldMap, Record, SyncConfig};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use uuid::Uuid;

/// Header carrying the create correlation id
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// REST client for the remote tables
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Build a client from `server_url`, `api_token` and `request_timeout`
    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        let base_url = config
            .server_url
            .clone()
            .ok_or(ConfigError::MissingValue("server_url"))?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "request_timeout",
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn table_url(&self, table: EntityTable) -> String {
        format!("{}/{}", self.base_url, table.as_str())
    }

    fn record_url(&self, table: EntityTable, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, table.as_str(), id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| status.to_string());

        Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            RemoteError::Server {
                status: status.as_u16(),
                message,
            }
        } else {
            RemoteError::Rejected {
                status: status.as_u16(),
                message,
            }
        })
    }

    /// Accept a bare record or a one-element array of records
    async fn read_record(response: Response) -> Result<Record, RemoteError> {
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        let value = match value {
            serde_json::Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
            other => other,
        };

        serde_json::from_value(value).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteBackend for HttpRemote {
    async fn insert(
        &self,
        table: EntityTable,
        payload: FieldMap,
        idempotency_key: Uuid,
    ) -> Result<Record, RemoteError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header(IDEMPOTENCY_HEADER, idempotency_key.to_string())
            .json(&payload);
        let response = self.send(request).await?;
        Self::read_record(response).await
    }

    async fn update(
        &self,
        table: EntityTable,
        id: &str,
        payload: FieldMap,
    ) -> Result<Record, RemoteError> {
        let request = self.client.patch(self.record_url(table, id)).json(&payload);
        let response = self.send(request).await?;
        Self::read_record(response).await
    }

    async fn delete(&self, table: EntityTable, id: &str) -> Result<(), RemoteError> {
        let request = self.client.delete(self.record_url(table, id));
        self.send(request).await?;
        Ok(())
    }
}
