//! Server-resident ignore list of intentionally removed containers
//!
//! The server is the source of truth. The optional negative cache only
//! remembers "not ignored" answers for a short TTL; positive answers are
//! always re-probed.

use super::client::{status_error, ApiClient};
use crate::error::SyncError;
use crate::models::IgnoreListEntry;
use dashmap::DashMap;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct IgnoreList {
    client: Arc<ApiClient>,
    negative_ttl: Duration,
    negative_cache: DashMap<String, Instant>,
}

impl IgnoreList {
    pub fn new(client: Arc<ApiClient>, negative_ttl: Duration) -> Self {
        Self {
            client,
            negative_ttl,
            negative_cache: DashMap::new(),
        }
    }

    fn path(id: &str) -> String {
        format!("containers/{}/ignored", id)
    }

    /// Membership probe: 200 means ignored, 404 means not ignored
    pub async fn is_ignored(&self, id: &str) -> Result<bool, SyncError> {
        if self.cached_negative(id) {
            debug!(container_id = %id, "Ignore probe answered from cache");
            return Ok(false);
        }

        let path = Self::path(id);
        let status = self.client.status_of(Method::HEAD, &path).await?;
        match status {
            s if s.is_success() => {
                self.negative_cache.remove(id);
                Ok(true)
            }
            StatusCode::NOT_FOUND => {
                if !self.negative_ttl.is_zero() {
                    self.negative_cache.insert(id.to_string(), Instant::now());
                }
                Ok(false)
            }
            other => Err(status_error(
                &Method::HEAD,
                &self.client.url(&path)?,
                other,
                String::new(),
            )),
        }
    }

    /// Clear the entry for `id`; an absent entry is not an error
    pub async fn remove(&self, id: &str) -> Result<(), SyncError> {
        self.invalidate(id);
        self.client.delete(&Self::path(id)).await
    }

    pub async fn list_all(&self) -> Result<Vec<IgnoreListEntry>, SyncError> {
        self.client.get_json("containers/ignored").await
    }

    pub fn invalidate(&self, id: &str) {
        self.negative_cache.remove(id);
    }

    fn cached_negative(&self, id: &str) -> bool {
        if self.negative_ttl.is_zero() {
            return false;
        }
        match self.negative_cache.get(id).map(|seen| seen.elapsed()) {
            Some(age) if age < self.negative_ttl => true,
            Some(_) => {
                self.negative_cache.remove(id);
                false
            }
            None => false,
        }
    }
}
