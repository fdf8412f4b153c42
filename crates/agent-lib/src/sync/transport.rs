//! Sync transport: pushes host and container state to the central API
//!
//! Container sync follows probe-then-create-or-update:
//! 1. ignore-list membership probe; an ignored identity is a no-op
//! 2. `GET containers/{id}`
//! 3. found -> `PUT`, anything else (404, 401, transport error) -> `POST`
//!
//! A create answered with 409 falls back to re-probing with backoff and
//! updating once the record is readable.

use super::client::ApiClient;
use super::ignore::IgnoreList;
use crate::error::SyncError;
use crate::models::{ContainerRecord, HostMetrics, HostRecord, IgnoreListEntry, Task, TaskResult};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a container sync ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    /// The identity is on the ignore list; nothing was sent
    Ignored,
}

/// Every central API operation the agent performs
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Single authenticated request made before any other work
    async fn check_auth(&self) -> Result<(), SyncError>;

    async fn register_host(&self, host: &HostRecord) -> Result<(), SyncError>;

    async fn sync_container(&self, record: &ContainerRecord) -> Result<SyncOutcome, SyncError>;

    /// Delete the central record; an already absent record is success
    async fn delete_container(&self, id: &str) -> Result<(), SyncError>;

    async fn is_ignored(&self, id: &str) -> Result<bool, SyncError>;

    async fn remove_ignored(&self, id: &str) -> Result<(), SyncError>;

    async fn list_ignored(&self) -> Result<Vec<IgnoreListEntry>, SyncError>;

    async fn push_metrics(&self, host_id: &str, metrics: &HostMetrics) -> Result<(), SyncError>;

    async fn pending_tasks(&self, host_id: &str) -> Result<Vec<Task>, SyncError>;

    async fn report_task_result(&self, task_id: &str, result: &TaskResult)
        -> Result<(), SyncError>;
}

/// Configuration for the HTTP transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Central API base URL (e.g., "http://fleet-api:8080/api/v1/")
    pub base_url: String,
    /// Bearer token sent with every request when set
    pub token: Option<String>,
    pub request_timeout: Duration,
    /// TTL for cached "not ignored" answers; zero disables the cache
    pub ignore_cache_ttl: Duration,
    /// Re-probe attempts after a create conflict
    pub conflict_retries: u32,
    /// Initial backoff between conflict re-probes, doubled each attempt
    pub conflict_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1/".to_string(),
            token: None,
            request_timeout: Duration::from_secs(30),
            ignore_cache_ttl: Duration::ZERO,
            conflict_retries: 3,
            conflict_backoff: Duration::from_millis(100),
        }
    }
}

/// HTTP implementation of [`SyncTransport`]
pub struct HttpSyncTransport {
    client: Arc<ApiClient>,
    ignore_list: IgnoreList,
    config: TransportConfig,
}

impl HttpSyncTransport {
    pub fn new(config: TransportConfig) -> Result<Self, SyncError> {
        let client = Arc::new(ApiClient::new(
            &config.base_url,
            config.token.clone(),
            config.request_timeout,
        )?);
        let ignore_list = IgnoreList::new(Arc::clone(&client), config.ignore_cache_ttl);

        debug!(
            base_url = %client.base_url(),
            authenticated = client.has_token(),
            "Central API client configured"
        );

        Ok(Self {
            client,
            ignore_list,
            config,
        })
    }

    /// Existence probe; only a 2xx answer counts as found
    async fn probe(&self, id: &str) -> bool {
        match self
            .client
            .status_of(Method::GET, &format!("containers/{}", id))
            .await
        {
            Ok(status) if status.is_success() => true,
            Ok(status) => {
                debug!(container_id = %id, status = status.as_u16(), "Container probe did not find record");
                false
            }
            Err(e) => {
                debug!(container_id = %id, error = %e, "Container probe failed, falling back to create");
                false
            }
        }
    }

    async fn update(&self, record: &ContainerRecord) -> Result<SyncOutcome, SyncError> {
        self.client
            .send_json(Method::PUT, &format!("containers/{}", record.id), record)
            .await?;
        Ok(SyncOutcome::Updated)
    }

    async fn create(&self, record: &ContainerRecord) -> Result<SyncOutcome, SyncError> {
        let (status, body) = self
            .client
            .send_json_status(Method::POST, "containers", record)
            .await?;

        if status.is_success() {
            return Ok(SyncOutcome::Created);
        }
        if status == StatusCode::CONFLICT {
            return self.resolve_conflict(record).await;
        }

        Err(super::client::status_error(
            &Method::POST,
            &self.client.url("containers")?,
            status,
            body,
        ))
    }

    /// The server rejected a duplicate create; wait for the record to be
    /// readable and update it instead
    async fn resolve_conflict(&self, record: &ContainerRecord) -> Result<SyncOutcome, SyncError> {
        let mut backoff = self.config.conflict_backoff;
        for attempt in 1..=self.config.conflict_retries {
            tokio::time::sleep(backoff).await;
            if self.probe(&record.id).await {
                debug!(container_id = %record.id, attempt, "Record readable after conflict, updating");
                return self.update(record).await;
            }
            backoff = backoff.saturating_mul(2);
        }

        warn!(
            container_id = %record.id,
            retries = self.config.conflict_retries,
            "Create conflicted and record never became readable"
        );
        Err(SyncError::Conflict(record.id.clone()))
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn check_auth(&self) -> Result<(), SyncError> {
        let _: serde_json::Value = self.client.get_json("auth/verify").await?;
        Ok(())
    }

    async fn register_host(&self, host: &HostRecord) -> Result<(), SyncError> {
        let (status, body) = self
            .client
            .send_json_status(Method::POST, "hosts", host)
            .await?;

        // A repeated registration of the same host is a success
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }
        Err(super::client::status_error(
            &Method::POST,
            &self.client.url("hosts")?,
            status,
            body,
        ))
    }

    async fn sync_container(&self, record: &ContainerRecord) -> Result<SyncOutcome, SyncError> {
        if self.ignore_list.is_ignored(&record.id).await? {
            debug!(container_id = %record.id, "Container is on the ignore list, skipping sync");
            return Ok(SyncOutcome::Ignored);
        }

        if self.probe(&record.id).await {
            self.update(record).await
        } else {
            self.create(record).await
        }
    }

    async fn delete_container(&self, id: &str) -> Result<(), SyncError> {
        self.client.delete(&format!("containers/{}", id)).await
    }

    async fn is_ignored(&self, id: &str) -> Result<bool, SyncError> {
        self.ignore_list.is_ignored(id).await
    }

    async fn remove_ignored(&self, id: &str) -> Result<(), SyncError> {
        self.ignore_list.remove(id).await
    }

    async fn list_ignored(&self) -> Result<Vec<IgnoreListEntry>, SyncError> {
        self.ignore_list.list_all().await
    }

    async fn push_metrics(&self, host_id: &str, metrics: &HostMetrics) -> Result<(), SyncError> {
        self.client
            .send_json(Method::PUT, &format!("hosts/{}/metrics", host_id), metrics)
            .await
    }

    async fn pending_tasks(&self, host_id: &str) -> Result<Vec<Task>, SyncError> {
        self.client
            .get_json_with_query("tasks/pending", &[("host_id", host_id)])
            .await
    }

    async fn report_task_result(
        &self,
        task_id: &str,
        result: &TaskResult,
    ) -> Result<(), SyncError> {
        self.client
            .send_json(Method::POST, &format!("tasks/{}/result", task_id), result)
            .await
    }
}
